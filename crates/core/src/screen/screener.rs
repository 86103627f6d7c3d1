use crate::domain::logic::LogicLibrary;
use crate::domain::market::Regime;
use crate::domain::watchlist::{
    BenefitTier, ExcludedCandidate, ExclusionReason, LeaderState, LogicMatch, PositionTier,
    ScoredCandidate, WatchList,
};
use crate::error::EngineError;
use crate::ingest::provider::MarketDataProvider;
use crate::screen::market_state::{self, MarketInputs};
use crate::screen::matcher::{self, MatchDecision};
use crate::screen::ranker;
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

const DEFAULT_TOP_N: usize = 30;
const DEFAULT_MIN_LOGIC_STRENGTH: u8 = 4;

/// Under an ice-point recovery, low boards need a compensating signal;
/// a top-10 popularity rank counts as one.
const ICE_POINT_RANK_CUTOFF: u32 = 10;

/// Screening run phases, logged at every transition so an aborted run
/// shows exactly where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Loading,
    Scoring,
    Matching,
    Classifying,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Scoring => "scoring",
            Self::Matching => "matching",
            Self::Classifying => "classifying",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScreenOptions {
    /// Popularity floor: only the top `top_n` ranked events are matched.
    pub top_n: usize,
    /// Minimum logic strength for opportunistic (overlap-only) candidates.
    pub min_logic_strength: u8,
}

impl Default for ScreenOptions {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            min_logic_strength: DEFAULT_MIN_LOGIC_STRENGTH,
        }
    }
}

impl ScreenOptions {
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Some(n) = env_parse::<usize>("SCREEN_TOP_N") {
            opts.top_n = n;
        }
        if let Some(s) = env_parse::<u8>("SCREEN_MIN_LOGIC_STRENGTH") {
            opts.min_logic_strength = s;
        }
        opts
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Produces the daily watch-list. One instance per run; the stage field is
/// the run's lifecycle and never moves backwards.
pub struct Screener {
    provider: Arc<dyn MarketDataProvider>,
    library: LogicLibrary,
    options: ScreenOptions,
    /// Yesterday's leader per logic group, for stall detection.
    prev_leaders: BTreeMap<String, LeaderState>,
    stage: Stage,
}

impl Screener {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        library: LogicLibrary,
        options: ScreenOptions,
    ) -> Self {
        Self {
            provider,
            library,
            options,
            prev_leaders: BTreeMap::new(),
            stage: Stage::Idle,
        }
    }

    pub fn with_previous_leaders(mut self, leaders: Vec<LeaderState>) -> Self {
        self.prev_leaders = leaders
            .into_iter()
            .map(|l| (l.logic_name.clone(), l))
            .collect();
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn transition(&mut self, next: Stage) {
        tracing::info!(from = %self.stage, to = %next, "screening stage");
        self.stage = next;
    }

    pub async fn run(
        &mut self,
        as_of_date: NaiveDate,
        prev_trade_date: NaiveDate,
    ) -> anyhow::Result<WatchList> {
        match self.run_inner(as_of_date, prev_trade_date).await {
            Ok(list) => {
                self.transition(Stage::Done);
                Ok(list)
            }
            Err(err) => {
                self.transition(Stage::Failed);
                Err(err)
            }
        }
    }

    async fn run_inner(
        &mut self,
        as_of_date: NaiveDate,
        prev_trade_date: NaiveDate,
    ) -> anyhow::Result<WatchList> {
        self.transition(Stage::Loading);
        let events = self.provider.limit_up_events(as_of_date).await?;
        if events.is_empty() {
            return Err(anyhow::Error::new(EngineError::data_unavailable(format!(
                "no limit-up events for {as_of_date}"
            ))));
        }
        let total_limit_up = events.len();

        // The previous day's down-limit count feeds regime detection only;
        // a gap there must not abort the screen.
        let prev_down = match self.provider.down_limit_count(prev_trade_date).await {
            Ok(count) => Some(count),
            Err(err) => {
                tracing::warn!(%prev_trade_date, error = %err, "down-limit count unavailable");
                None
            }
        };

        self.transition(Stage::Scoring);
        let outcome = ranker::rank(events);
        let mut excluded = outcome.rejected;
        let max_streak = outcome.ranked.iter().map(|c| c.event.streak).max();

        // Popularity floor: only the top N stay eligible.
        let mut survivors = Vec::with_capacity(self.options.top_n);
        for candidate in outcome.ranked {
            if candidate.rank as usize > self.options.top_n {
                excluded.push(ExcludedCandidate {
                    code: candidate.event.code.clone(),
                    name: candidate.event.name.clone(),
                    streak: candidate.event.streak,
                    rank: Some(candidate.rank),
                    reason: ExclusionReason::BelowPopularityFloor {
                        rank: candidate.rank,
                        floor: self.options.top_n,
                    },
                });
            } else {
                survivors.push(candidate);
            }
        }

        self.transition(Stage::Matching);
        let mut matched = Vec::new();
        for candidate in survivors {
            match self.match_candidate(candidate) {
                Ok(candidate) => matched.push(candidate),
                Err(drop) => excluded.push(drop),
            }
        }

        self.transition(Stage::Classifying);
        let market_state = market_state::classify(
            as_of_date,
            MarketInputs {
                up_limit_count: Some(total_limit_up as u32),
                prev_down_limit_count: prev_down,
                max_streak,
            },
        );
        tracing::info!(
            regime = %market_state.regime,
            up_limit_count = market_state.up_limit_count,
            prev_down_limit_count = market_state.prev_down_limit_count,
            max_streak = market_state.max_streak,
            "market regime classified"
        );

        let mut kept = Vec::new();
        for candidate in matched {
            if regime_profile_passes(&candidate, market_state.regime) {
                kept.push(candidate);
            } else {
                excluded.push(ExcludedCandidate {
                    code: candidate.event.code.clone(),
                    name: candidate.event.name.clone(),
                    streak: candidate.event.streak,
                    rank: Some(candidate.rank),
                    reason: ExclusionReason::RegimeIneligible {
                        regime: market_state.regime,
                    },
                });
            }
        }

        self.transition(Stage::Finalizing);
        let entries = self.finalize(kept);
        anyhow::ensure!(
            entries.iter().all(|c| !c.rationale.is_empty()),
            "finalized watch-list entry without rationale"
        );

        tracing::info!(
            %as_of_date,
            entries = entries.len(),
            excluded = excluded.len(),
            total_limit_up,
            "watch-list assembled"
        );

        Ok(WatchList {
            trade_date: as_of_date,
            generated_at: Utc::now(),
            market_state,
            entries,
            excluded,
            total_limit_up,
        })
    }

    /// Matches one floor-surviving candidate against the logic library.
    /// Every drop carries its reason.
    fn match_candidate(
        &self,
        mut candidate: ScoredCandidate,
    ) -> Result<ScoredCandidate, ExcludedCandidate> {
        let reject = |candidate: &ScoredCandidate, reason: ExclusionReason| ExcludedCandidate {
            code: candidate.event.code.clone(),
            name: candidate.event.name.clone(),
            streak: candidate.event.streak,
            rank: Some(candidate.rank),
            reason,
        };

        match matcher::match_event(&candidate.event, &self.library) {
            MatchDecision::Unmatched => {
                return Err(reject(&candidate, ExclusionReason::Unmatched));
            }
            MatchDecision::Bandwagon { entry_name } => {
                return Err(reject(&candidate, ExclusionReason::Bandwagon { entry_name }));
            }
            MatchDecision::Matched {
                entry_name,
                strength,
                overlap,
                tier,
            } => {
                if tier == BenefitTier::Opportunistic && strength < self.options.min_logic_strength
                {
                    return Err(reject(
                        &candidate,
                        ExclusionReason::StrengthBelowThreshold {
                            strength,
                            minimum: self.options.min_logic_strength,
                        },
                    ));
                }
                candidate.benefit_tier = tier;
                candidate.matched = Some(LogicMatch {
                    entry_name,
                    strength,
                    overlap,
                });
            }
        }

        Ok(candidate)
    }

    /// Assigns position tiers within each logic group, enriches rationale,
    /// and orders the final list by logic strength then streak.
    fn finalize(&self, mut kept: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
        // Group leader = the highest streak (>= 2) per logic entry; ties go
        // to the better popularity rank.
        let mut group_leader: BTreeMap<String, (u32, u32, String)> = BTreeMap::new();
        for c in &kept {
            let Some(m) = &c.matched else { continue };
            if c.event.streak < 2 {
                continue;
            }
            let slot = group_leader
                .entry(m.entry_name.clone())
                .or_insert((0, u32::MAX, String::new()));
            if c.event.streak > slot.0 || (c.event.streak == slot.0 && c.rank < slot.1) {
                *slot = (c.event.streak, c.rank, c.event.code.clone());
            }
        }

        for c in &mut kept {
            let Some(m) = c.matched.clone() else { continue };
            let entry = self.library.get(&m.entry_name);

            let tier = if group_leader
                .get(&m.entry_name)
                .is_some_and(|(_, _, code)| *code == c.event.code)
            {
                PositionTier::Leader
            } else if c.event.streak <= 1 {
                PositionTier::FirstBoard
            } else {
                PositionTier::CatchUp
            };
            c.position_tier = Some(tier);

            let mut rationale = match entry {
                Some(entry) => format!("{}: {}", entry.name, entry.rationale),
                None => m.entry_name.clone(),
            };
            rationale.push_str(&format!(
                " [{:?} beneficiary, strength {}, {} boards, rank {}]",
                c.benefit_tier, m.strength, c.event.streak, c.rank
            ));

            if tier == PositionTier::CatchUp {
                if let Some(prev) = self.prev_leaders.get(&m.entry_name) {
                    let leader_today = group_leader.get(&m.entry_name);
                    let leader_advanced = leader_today
                        .is_some_and(|(streak, _, code)| *code == prev.code && *streak > prev.streak);
                    if !leader_advanced {
                        rationale.push_str(&format!(
                            "; group leader {} stalling, catch-up window open",
                            prev.code
                        ));
                    }
                }
            }

            c.rationale = rationale;
        }

        // Strength dominates, streak breaks within a strength band, then
        // the popularity rank keeps the order total.
        kept.sort_by(|a, b| {
            watch_order_key(b)
                .cmp(&watch_order_key(a))
                .then_with(|| a.rank.cmp(&b.rank))
        });
        kept
    }
}

/// Streak-height eligibility per regime. A surge chases height, so only
/// streaks of three and up qualify. An ice-point tape is fragile: low
/// boards stay only with a compensating signal (disclosure flag or a top
/// rank). Consolidation imposes no extra bar.
fn regime_profile_passes(candidate: &ScoredCandidate, regime: Regime) -> bool {
    match regime {
        Regime::IncrementalSurge => candidate.event.streak >= 3,
        Regime::IcePointRecovery => {
            candidate.event.streak >= 3
                || candidate.event.on_disclosure_list
                || candidate.rank <= ICE_POINT_RANK_CUTOFF
        }
        Regime::Consolidation => true,
    }
}

fn watch_order_key(c: &ScoredCandidate) -> i64 {
    let strength = c.matched.as_ref().map(|m| i64::from(m.strength)).unwrap_or(0);
    strength * 100 + i64::from(c.event.streak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::LimitUpEvent;
    use crate::domain::logic::LogicEntry;
    use crate::ingest::types::ForwardSessionsResponse;
    use chrono::NaiveTime;
    use std::collections::BTreeSet;

    struct StubProvider {
        events: Vec<LimitUpEvent>,
        down_count: anyhow::Result<u32>,
    }

    #[async_trait::async_trait]
    impl MarketDataProvider for StubProvider {
        fn provider_name(&self) -> &'static str {
            "stub"
        }

        async fn trading_days(
            &self,
            end: NaiveDate,
            count: usize,
        ) -> anyhow::Result<Vec<NaiveDate>> {
            Ok(crate::time::cn_market::recent_weekdays(end, count))
        }

        async fn limit_up_events(&self, _date: NaiveDate) -> anyhow::Result<Vec<LimitUpEvent>> {
            Ok(self.events.clone())
        }

        async fn down_limit_count(&self, _date: NaiveDate) -> anyhow::Result<u32> {
            match &self.down_count {
                Ok(n) => Ok(*n),
                Err(_) => Err(anyhow::Error::new(EngineError::data_unavailable(
                    "stub outage",
                ))),
            }
        }

        async fn forward_sessions(
            &self,
            _code: &str,
            _date: NaiveDate,
            _horizon: usize,
        ) -> anyhow::Result<ForwardSessionsResponse> {
            anyhow::bail!("not used in screening")
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn prev_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 27).unwrap()
    }

    fn event(
        code: &str,
        name: &str,
        streak: u32,
        seal: (u32, u32),
        concepts: &[&str],
    ) -> LimitUpEvent {
        LimitUpEvent {
            code: code.to_string(),
            name: name.to_string(),
            trade_date: date(),
            limit_up_time: NaiveTime::from_hms_opt(seal.0, seal.1, 0),
            streak,
            on_disclosure_list: false,
            industry: "电子元件".to_string(),
            concepts: concepts.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn entry(name: &str, leader_code: &str, strength: u8, related: &[&str]) -> LogicEntry {
        LogicEntry {
            name: name.to_string(),
            leader_name: format!("{name}-leader"),
            leader_code: leader_code.to_string(),
            rationale: "policy catalyst in play".to_string(),
            related_concepts: related.iter().map(|s| s.to_string()).collect(),
            core_concepts: BTreeSet::new(),
            strength,
            duration: String::new(),
            driver: String::new(),
            patterns: Vec::new(),
            risk_note: String::new(),
            secondary_stocks: BTreeSet::new(),
            bandwagon_stocks: BTreeSet::new(),
        }
    }

    fn screener(events: Vec<LimitUpEvent>, entries: Vec<LogicEntry>) -> Screener {
        let provider = Arc::new(StubProvider {
            events,
            down_count: Ok(3),
        });
        Screener::new(
            provider,
            LogicLibrary::from_entries(entries).unwrap(),
            ScreenOptions::default(),
        )
    }

    #[tokio::test]
    async fn empty_day_fails_with_data_unavailable() {
        let mut s = screener(Vec::new(), vec![entry("ai", "000100", 5, &["ai"])]);
        let err = s.run(date(), prev_date()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::DataUnavailable { .. })
        ));
        assert_eq!(s.stage(), Stage::Failed);
    }

    #[tokio::test]
    async fn matched_candidates_are_kept_and_drops_are_recorded() {
        let mut s = screener(
            vec![
                event("000100", "龙头一号", 2, (9, 20), &["ai"]),
                event("000200", "跟随二号", 2, (9, 50), &["ai"]),
                event("000300", "无关三号", 1, (10, 40), &["bank"]),
            ],
            vec![entry("ai", "000100", 5, &["ai"])],
        );
        let list = s.run(date(), prev_date()).await.unwrap();

        assert_eq!(s.stage(), Stage::Done);
        assert_eq!(list.total_limit_up, 3);
        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.entries[0].event.code, "000100");
        assert_eq!(list.entries[0].position_tier, Some(PositionTier::Leader));
        assert_eq!(list.entries[0].benefit_tier, BenefitTier::Core);
        assert_eq!(list.entries[1].position_tier, Some(PositionTier::CatchUp));
        assert!(list.entries.iter().all(|c| !c.rationale.is_empty()));

        assert_eq!(list.excluded.len(), 1);
        assert_eq!(list.excluded[0].code, "000300");
        assert_eq!(list.excluded[0].reason, ExclusionReason::Unmatched);
    }

    #[tokio::test]
    async fn weak_logic_drops_opportunistic_but_not_core_candidates() {
        let mut entries = vec![entry("fading", "000900", 3, &["meta"])];
        entries[0].core_concepts = ["meta"].iter().map(|s| s.to_string()).collect();
        let weak_plain = entry("fading-plain", "000901", 3, &["plain"]);
        entries.push(weak_plain);

        let mut s = screener(
            vec![
                event("000500", "核心五号", 2, (9, 40), &["meta"]),
                event("000600", "顺风六号", 2, (9, 41), &["plain"]),
            ],
            entries,
        );
        let list = s.run(date(), prev_date()).await.unwrap();

        // Core-tier candidate survives a strength-3 entry; the plain
        // overlap does not.
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].event.code, "000500");
        assert!(matches!(
            list.excluded[0].reason,
            ExclusionReason::StrengthBelowThreshold { strength: 3, minimum: 4 }
        ));
    }

    #[tokio::test]
    async fn popularity_floor_cuts_the_tail() {
        // Distinct seal minutes keep the ranking (and so the floor
        // boundary) deterministic.
        let events: Vec<LimitUpEvent> = (0..15)
            .map(|i| {
                event(
                    &format!("{:06}", 100 + i),
                    &format!("s{i}"),
                    1,
                    (13, i as u32),
                    &["ai"],
                )
            })
            .collect();

        let provider = Arc::new(StubProvider {
            events,
            down_count: Ok(3),
        });
        let mut s = Screener::new(
            provider,
            LogicLibrary::from_entries(vec![entry("ai", "000100", 5, &["ai"])]).unwrap(),
            ScreenOptions {
                top_n: 10,
                ..ScreenOptions::default()
            },
        );
        let list = s.run(date(), prev_date()).await.unwrap();

        assert_eq!(list.entries.len(), 10);
        let floored = list
            .excluded
            .iter()
            .filter(|e| matches!(e.reason, ExclusionReason::BelowPopularityFloor { floor: 10, .. }))
            .count();
        assert_eq!(floored, 5);
    }

    #[tokio::test]
    async fn surge_regime_requires_height() {
        let mut s = screener(
            vec![
                event("000100", "高度股", 4, (9, 20), &["ai"]),
                event("000200", "首板股", 1, (9, 30), &["ai"]),
            ],
            vec![entry("ai", "000100", 5, &["ai"])],
        );
        let list = s.run(date(), prev_date()).await.unwrap();

        assert_eq!(list.market_state.regime, Regime::IncrementalSurge);
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].event.code, "000100");
        assert!(list.excluded.iter().any(|e| e.code == "000200"
            && matches!(e.reason, ExclusionReason::RegimeIneligible { .. })));
    }

    #[tokio::test]
    async fn ice_point_keeps_low_boards_only_with_a_signal() {
        // All streaks <= 2 and 20 down-limits yesterday: ice-point tape.
        let mut events = vec![
            event("000100", "高度一号", 2, (9, 20), &["ai"]),
            {
                let mut e = event("000200", "公告二号", 1, (9, 30), &["ai"]);
                e.on_disclosure_list = true;
                e
            },
            // Low board, no disclosure. Pad the pool so it lands outside
            // the top-10 rank cutoff.
            event("000300", "裸板三号", 1, (14, 30), &["ai"]),
        ];
        for i in 0..12 {
            events.push(event(
                &format!("{:06}", 400 + i),
                &format!("p{i}"),
                2,
                (9, 40),
                &["ai"],
            ));
        }

        let provider = Arc::new(StubProvider {
            events,
            down_count: Ok(20),
        });
        let mut s = Screener::new(
            provider,
            LogicLibrary::from_entries(vec![entry("ai", "000100", 5, &["ai"])]).unwrap(),
            ScreenOptions::default(),
        );
        let list = s.run(date(), prev_date()).await.unwrap();

        assert_eq!(list.market_state.regime, Regime::IcePointRecovery);
        assert!(list.entries.iter().any(|c| c.event.code == "000200"));
        assert!(list
            .excluded
            .iter()
            .any(|e| e.code == "000300"
                && matches!(e.reason, ExclusionReason::RegimeIneligible { .. })));
    }

    #[tokio::test]
    async fn down_limit_outage_degrades_to_consolidation_not_failure() {
        let provider = Arc::new(StubProvider {
            events: vec![event("000100", "一号", 2, (9, 30), &["ai"])],
            down_count: Err(anyhow::anyhow!("outage")),
        });
        let mut s = Screener::new(
            provider,
            LogicLibrary::from_entries(vec![entry("ai", "000100", 5, &["ai"])]).unwrap(),
            ScreenOptions::default(),
        );
        let list = s.run(date(), prev_date()).await.unwrap();
        assert_eq!(list.market_state.prev_down_limit_count, 0);
        assert_eq!(list.entries.len(), 1);
    }

    #[tokio::test]
    async fn stalling_previous_leader_opens_the_catch_up_window() {
        let mut s = screener(
            vec![
                // Yesterday's leader repeats its streak (did not advance).
                event("000100", "旧龙头", 2, (9, 30), &["ai"]),
                event("000200", "补涨股", 2, (9, 40), &["ai"]),
            ],
            vec![entry("ai", "000100", 5, &["ai"])],
        )
        .with_previous_leaders(vec![LeaderState {
            logic_name: "ai".to_string(),
            code: "000100".to_string(),
            streak: 2,
        }]);
        let list = s.run(date(), prev_date()).await.unwrap();

        let catch_up = list
            .entries
            .iter()
            .find(|c| c.event.code == "000200")
            .unwrap();
        assert_eq!(catch_up.position_tier, Some(PositionTier::CatchUp));
        assert!(catch_up.rationale.contains("stalling"));
    }

    #[tokio::test]
    async fn final_order_is_strength_then_streak() {
        let mut s = screener(
            vec![
                event("000100", "强主题股", 2, (9, 25), &["ai"]),
                event("000200", "弱主题股", 2, (9, 20), &["robot"]),
            ],
            vec![
                entry("ai", "000100", 5, &["ai"]),
                entry("robot", "000200", 4, &["robot"]),
            ],
        );
        let list = s.run(date(), prev_date()).await.unwrap();
        // Strength dominates the final order even against a better rank.
        assert_eq!(list.entries[0].event.code, "000100");
        assert_eq!(list.entries[1].event.code, "000200");
    }
}
