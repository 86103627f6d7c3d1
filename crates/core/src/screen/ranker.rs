use crate::domain::event::{LimitUpEvent, TimeBucket};
use crate::domain::watchlist::{
    BenefitTier, ExcludedCandidate, ExclusionReason, ScoredCandidate,
};
use chrono::NaiveTime;
use std::cmp::Ordering;

const STREAK_WEIGHT: i64 = 20;
const DISCLOSURE_BONUS: i64 = 25;

/// Score contribution of the first seal time.
pub fn time_bucket_score(bucket: TimeBucket) -> i64 {
    match bucket {
        TimeBucket::OpeningRush => 30,
        TimeBucket::EarlyMorning => 20,
        TimeBucket::MidMorning => 10,
        TimeBucket::Late => 5,
    }
}

pub fn popularity_score(event: &LimitUpEvent) -> i64 {
    let mut score = i64::from(event.streak) * STREAK_WEIGHT;
    score += time_bucket_score(TimeBucket::of(event.limit_up_time));
    if event.on_disclosure_list {
        score += DISCLOSURE_BONUS;
    }
    score
}

#[derive(Debug)]
pub struct RankOutcome {
    /// Descending by score; rank is 1-based and gap-free.
    pub ranked: Vec<ScoredCandidate>,
    /// Events rejected on validation, with their recorded reason.
    pub rejected: Vec<ExcludedCandidate>,
}

/// Scores and ranks one day's events. Pure and deterministic: the tiebreak
/// chain (score, streak, seal time, code) always terminates in the unique
/// stock code, so two runs over the same input produce identical output.
pub fn rank(events: Vec<LimitUpEvent>) -> RankOutcome {
    let mut rejected = Vec::new();
    let mut scored: Vec<(i64, LimitUpEvent)> = Vec::with_capacity(events.len());

    for event in events {
        if event.code.trim().is_empty() {
            tracing::warn!(name = %event.name, "rejecting event without a stock code");
            rejected.push(ExcludedCandidate {
                code: String::new(),
                name: event.name.clone(),
                streak: event.streak,
                rank: None,
                reason: ExclusionReason::MalformedEvent {
                    detail: "missing stock code".to_string(),
                },
            });
            continue;
        }
        let score = popularity_score(&event);
        scored.push((score, event));
    }

    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then_with(|| b.1.streak.cmp(&a.1.streak))
            .then_with(|| cmp_seal_time(a.1.limit_up_time, b.1.limit_up_time))
            .then_with(|| a.1.code.cmp(&b.1.code))
    });

    let ranked = scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, event))| {
            let rank = (i + 1) as u32;
            let rationale = format!(
                "popularity rank {rank} (score {score}, {} boards)",
                event.streak
            );
            ScoredCandidate {
                event,
                popularity_score: score,
                rank,
                matched: None,
                benefit_tier: BenefitTier::Unmatched,
                position_tier: None,
                rationale,
            }
        })
        .collect();

    RankOutcome { ranked, rejected }
}

/// Earlier seal first; never-sealed sorts last.
fn cmp_seal_time(a: Option<NaiveTime>, b: Option<NaiveTime>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn event(code: &str, streak: u32, seal: Option<(u32, u32)>, disclosed: bool) -> LimitUpEvent {
        LimitUpEvent {
            code: code.to_string(),
            name: format!("stock {code}"),
            trade_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            limit_up_time: seal.and_then(|(h, m)| NaiveTime::from_hms_opt(h, m, 0)),
            streak,
            on_disclosure_list: disclosed,
            industry: "电子元件".to_string(),
            concepts: BTreeSet::new(),
        }
    }

    #[test]
    fn three_boards_early_seal_on_disclosure_scores_115() {
        let e = event("002104", 3, Some((9, 20)), true);
        assert_eq!(popularity_score(&e), 3 * 20 + 30 + 25);
    }

    #[test]
    fn never_sealed_gets_the_floor_time_score() {
        let e = event("600519", 1, None, false);
        assert_eq!(popularity_score(&e), 20 + 5);
    }

    #[test]
    fn ranks_descending_with_one_based_ranks() {
        let out = rank(vec![
            event("000001", 1, None, false),
            event("000002", 3, Some((9, 20)), true),
            event("000003", 2, Some((9, 50)), false),
        ]);
        let codes: Vec<&str> = out.ranked.iter().map(|c| c.event.code.as_str()).collect();
        assert_eq!(codes, ["000002", "000003", "000001"]);
        assert_eq!(
            out.ranked.iter().map(|c| c.rank).collect::<Vec<_>>(),
            [1, 2, 3]
        );
        assert!(out.ranked.iter().all(|c| !c.rationale.is_empty()));
    }

    #[test]
    fn tiebreak_chain_ends_in_the_stock_code() {
        // Identical score, streak, and seal time: code decides.
        let out = rank(vec![
            event("600200", 2, Some((9, 40)), false),
            event("600100", 2, Some((9, 40)), false),
        ]);
        let codes: Vec<&str> = out.ranked.iter().map(|c| c.event.code.as_str()).collect();
        assert_eq!(codes, ["600100", "600200"]);
    }

    #[test]
    fn equal_scores_prefer_higher_streak_then_earlier_seal() {
        // streak 2 + late (5) + disclosure (25) = 70 vs streak 3 + mid (10) = 70.
        let a = event("000010", 2, None, true);
        let b = event("000011", 3, Some((10, 10)), false);
        assert_eq!(popularity_score(&a), popularity_score(&b));
        let out = rank(vec![a, b]);
        assert_eq!(out.ranked[0].event.code, "000011");

        // Same score and streak: earlier seal wins; never-sealed sorts last.
        let c = event("000020", 2, Some((9, 40)), false);
        let d = event("000021", 2, Some((9, 41)), false);
        assert_eq!(popularity_score(&c), popularity_score(&d));
        let out = rank(vec![d, c]);
        assert_eq!(out.ranked[0].event.code, "000020");
    }

    #[test]
    fn ranking_twice_is_byte_identical() {
        let events = vec![
            event("000001", 1, Some((13, 0)), false),
            event("000002", 4, Some((9, 21)), true),
            event("000003", 2, None, false),
            event("000004", 2, Some((9, 59)), false),
        ];
        let a = rank(events.clone());
        let b = rank(events);
        let a_json = serde_json::to_string(&a.ranked).unwrap();
        let b_json = serde_json::to_string(&b.ranked).unwrap();
        assert_eq!(a_json, b_json);
    }

    #[test]
    fn missing_code_is_rejected_and_the_rest_continue() {
        let out = rank(vec![
            event("", 3, Some((9, 20)), false),
            event("000002", 1, None, false),
        ]);
        assert_eq!(out.ranked.len(), 1);
        assert_eq!(out.rejected.len(), 1);
        assert!(matches!(
            out.rejected[0].reason,
            ExclusionReason::MalformedEvent { .. }
        ));
    }
}
