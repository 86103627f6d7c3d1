use crate::domain::logic::LogicLibrary;
use crate::domain::report::{
    BacktestSample, InsufficientGroup, PatternKey, PatternReport, PatternStat, SuggestionRecord,
    SuggestionTarget,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
    /// Groups below this size are reported but never aggregated.
    pub min_samples: usize,
    /// Losing groups below this size produce no cut suggestions.
    pub confidence_samples: usize,
    pub top_k: usize,
    pub bottom_k: usize,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            min_samples: 5,
            confidence_samples: 15,
            top_k: 5,
            bottom_k: 3,
        }
    }
}

const WINNING_WEIGHT_DELTA: f64 = 20.0;
const LOSING_WEIGHT_DELTA: f64 = -30.0;

/// Mines the sampled outcomes for patterns by seal-time bucket and by
/// industry. Incomplete samples are counted but contribute to no average;
/// thin groups surface as insufficient instead of skewing the report.
pub fn analyze(
    samples: &[BacktestSample],
    library: &LogicLibrary,
    options: &AnalyzeOptions,
) -> PatternReport {
    let incomplete_samples = samples.iter().filter(|s| s.incomplete).count();
    let complete: Vec<&BacktestSample> = samples.iter().filter(|s| !s.incomplete).collect();

    let mut groups: BTreeMap<PatternKey, Vec<&BacktestSample>> = BTreeMap::new();
    for s in &complete {
        groups
            .entry(PatternKey::TimeBucket(s.time_bucket()))
            .or_default()
            .push(s);
        if !s.industry.is_empty() {
            groups
                .entry(PatternKey::Industry(s.industry.clone()))
                .or_default()
                .push(s);
        }
    }

    let mut stats = Vec::new();
    let mut insufficient = Vec::new();
    for (key, members) in groups {
        if members.len() < options.min_samples {
            insufficient.push(InsufficientGroup {
                key,
                samples: members.len(),
                minimum: options.min_samples,
            });
            continue;
        }
        stats.push(group_stat(key, &members));
    }

    // Winning is relative: the top of the board by forward return, even on
    // a window where everything bled.
    let mut winning: Vec<PatternStat> = stats.clone();
    winning.sort_by(|a, b| {
        b.avg_ret_1d
            .partial_cmp(&a.avg_ret_1d)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    winning.truncate(options.top_k);

    let mut losing: Vec<PatternStat> =
        stats.iter().filter(|s| s.avg_ret_1d < 0.0).cloned().collect();
    losing.sort_by(|a, b| {
        a.avg_ret_1d
            .partial_cmp(&b.avg_ret_1d)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    losing.truncate(options.bottom_k);

    let suggestions = build_suggestions(&winning, &losing, library, options);

    tracing::info!(
        total = samples.len(),
        incomplete = incomplete_samples,
        winning = winning.len(),
        losing = losing.len(),
        insufficient = insufficient.len(),
        suggestions = suggestions.len(),
        "pattern analysis finished"
    );

    PatternReport {
        total_samples: samples.len(),
        incomplete_samples,
        min_samples: options.min_samples,
        winning,
        losing,
        insufficient,
        suggestions,
    }
}

fn group_stat(key: PatternKey, members: &[&BacktestSample]) -> PatternStat {
    let n = members.len() as f64;
    let mean = |f: &dyn Fn(&BacktestSample) -> f64| members.iter().map(|s| f(s)).sum::<f64>() / n;

    PatternStat {
        key,
        samples: members.len(),
        avg_ret_1d: mean(&|s| s.ret_1d.unwrap_or(0.0)),
        avg_ret_3d: mean(&|s| s.ret_3d.unwrap_or(0.0)),
        win_rate: members
            .iter()
            .filter(|s| s.ret_1d.is_some_and(|r| r > 0.0))
            .count() as f64
            / n,
        continuation_rate: members
            .iter()
            .filter(|s| s.continued == Some(true))
            .count() as f64
            / n,
    }
}

/// Advisory deltas for the operator. A winning bucket suggests a raise as
/// soon as it clears the minimum sample bar; cuts demand the higher
/// confidence count, and logic entries are flagged when a losing industry
/// reads as one of their related concepts.
fn build_suggestions(
    winning: &[PatternStat],
    losing: &[PatternStat],
    library: &LogicLibrary,
    options: &AnalyzeOptions,
) -> Vec<SuggestionRecord> {
    let mut out = Vec::new();

    for stat in winning {
        if stat.avg_ret_1d <= 0.0 {
            continue;
        }
        if let PatternKey::TimeBucket(bucket) = &stat.key {
            out.push(SuggestionRecord {
                target: SuggestionTarget::TimeBucketWeight(*bucket),
                delta: WINNING_WEIGHT_DELTA,
                rationale: format!(
                    "{} averaged {:+.2}% next session over {} samples (win rate {:.0}%)",
                    stat.key,
                    stat.avg_ret_1d * 100.0,
                    stat.samples,
                    stat.win_rate * 100.0
                ),
            });
        }
    }

    for stat in losing {
        if stat.samples < options.confidence_samples {
            continue;
        }
        match &stat.key {
            PatternKey::TimeBucket(bucket) => {
                out.push(SuggestionRecord {
                    target: SuggestionTarget::TimeBucketWeight(*bucket),
                    delta: LOSING_WEIGHT_DELTA,
                    rationale: format!(
                        "{} averaged {:+.2}% next session over {} samples",
                        stat.key,
                        stat.avg_ret_1d * 100.0,
                        stat.samples
                    ),
                });
            }
            PatternKey::Industry(industry) => {
                for entry in library.entries() {
                    if entry.related_concepts.contains(industry) {
                        out.push(SuggestionRecord {
                            target: SuggestionTarget::LogicEntry(entry.name.clone()),
                            delta: -1.0,
                            rationale: format!(
                                "related industry {industry} averaged {:+.2}% next session over {} samples",
                                stat.avg_ret_1d * 100.0,
                                stat.samples
                            ),
                        });
                    }
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::TimeBucket;
    use crate::domain::logic::LogicEntry;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::BTreeSet;

    fn sample(
        code: &str,
        seal: (u32, u32),
        industry: &str,
        ret_1d: f64,
        continued: bool,
    ) -> BacktestSample {
        BacktestSample {
            code: code.to_string(),
            name: format!("s{code}"),
            trade_date: NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(),
            limit_up_time: NaiveTime::from_hms_opt(seal.0, seal.1, 0),
            streak: 2,
            industry: industry.to_string(),
            ret_1d: Some(ret_1d),
            ret_3d: Some(ret_1d * 2.0),
            continued: Some(continued),
            incomplete: false,
        }
    }

    fn empty_library() -> LogicLibrary {
        LogicLibrary::from_entries(Vec::new()).unwrap()
    }

    fn defaults() -> AnalyzeOptions {
        AnalyzeOptions::default()
    }

    #[test]
    fn small_groups_are_reported_not_aggregated() {
        // Three opening-rush samples: below the minimum of five.
        let samples: Vec<BacktestSample> = (0..3)
            .map(|i| sample(&format!("00010{i}"), (9, 21), "", 0.05, true))
            .collect();

        let report = analyze(&samples, &empty_library(), &defaults());
        assert!(report.winning.is_empty());
        assert!(report.losing.is_empty());
        assert_eq!(report.insufficient.len(), 1);
        assert_eq!(report.insufficient[0].samples, 3);
        assert_eq!(report.insufficient[0].minimum, 5);

        let err = report.require_conclusive().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::EngineError>(),
            Some(crate::error::EngineError::InsufficientSample { samples: 3, .. })
        ));
    }

    #[test]
    fn winning_and_losing_groups_split_by_forward_return() {
        let mut samples = Vec::new();
        for i in 0..6 {
            samples.push(sample(&format!("10{i:04}"), (9, 21), "半导体", 0.04, true));
        }
        for i in 0..6 {
            samples.push(sample(&format!("20{i:04}"), (14, 0), "房地产", -0.03, false));
        }

        let report = analyze(&samples, &empty_library(), &defaults());
        let winning_keys: Vec<&PatternKey> = report.winning.iter().map(|s| &s.key).collect();
        assert!(winning_keys.contains(&&PatternKey::TimeBucket(TimeBucket::OpeningRush)));
        assert!(winning_keys.contains(&&PatternKey::Industry("半导体".to_string())));

        let losing_keys: Vec<&PatternKey> = report.losing.iter().map(|s| &s.key).collect();
        assert!(losing_keys.contains(&&PatternKey::TimeBucket(TimeBucket::Late)));

        let rush = report
            .winning
            .iter()
            .find(|s| s.key == PatternKey::TimeBucket(TimeBucket::OpeningRush))
            .unwrap();
        assert_eq!(rush.samples, 6);
        assert!((rush.win_rate - 1.0).abs() < 1e-9);
        assert!((rush.continuation_rate - 1.0).abs() < 1e-9);
        assert!(report.require_conclusive().is_ok());
    }

    #[test]
    fn incomplete_samples_never_reach_an_aggregate() {
        let mut samples: Vec<BacktestSample> = (0..5)
            .map(|i| sample(&format!("00020{i}"), (9, 21), "", 0.02, true))
            .collect();
        for i in 0..5 {
            let mut s = sample(&format!("00030{i}"), (9, 21), "", -0.10, false);
            s.ret_1d = None;
            s.ret_3d = None;
            s.incomplete = true;
            samples.push(s);
        }

        let report = analyze(&samples, &empty_library(), &defaults());
        assert_eq!(report.total_samples, 10);
        assert_eq!(report.incomplete_samples, 5);
        let rush = report
            .winning
            .iter()
            .find(|s| s.key == PatternKey::TimeBucket(TimeBucket::OpeningRush))
            .unwrap();
        // Only the five complete samples count.
        assert_eq!(rush.samples, 5);
        assert!((rush.avg_ret_1d - 0.02).abs() < 1e-9);
    }

    #[test]
    fn confident_groups_produce_weight_suggestions() {
        let mut samples = Vec::new();
        for i in 0..16 {
            samples.push(sample(&format!("10{i:04}"), (9, 21), "", 0.04, true));
        }
        for i in 0..16 {
            samples.push(sample(&format!("20{i:04}"), (14, 0), "", -0.03, false));
        }

        let report = analyze(&samples, &empty_library(), &defaults());
        let up = report
            .suggestions
            .iter()
            .find(|s| s.target == SuggestionTarget::TimeBucketWeight(TimeBucket::OpeningRush))
            .unwrap();
        assert_eq!(up.delta, 20.0);
        assert!(!up.rationale.is_empty());

        let down = report
            .suggestions
            .iter()
            .find(|s| s.target == SuggestionTarget::TimeBucketWeight(TimeBucket::Late))
            .unwrap();
        assert_eq!(down.delta, -30.0);
    }

    #[test]
    fn winning_buckets_suggest_on_the_minimum_bar_cuts_need_confidence() {
        // Six samples per side: both aggregated, both short of the
        // confidence count of fifteen.
        let mut samples: Vec<BacktestSample> = (0..6)
            .map(|i| sample(&format!("00040{i}"), (9, 21), "", 0.04, true))
            .collect();
        for i in 0..6 {
            samples.push(sample(&format!("00050{i}"), (14, 0), "", -0.03, false));
        }

        let report = analyze(&samples, &empty_library(), &defaults());

        // A raise follows the winning bucket as soon as it aggregates.
        assert!(report.suggestions.iter().any(|s| {
            s.target == SuggestionTarget::TimeBucketWeight(TimeBucket::OpeningRush)
                && s.delta > 0.0
        }));
        // The cut waits for the confidence count.
        assert!(!report.suggestions.iter().any(|s| s.delta < 0.0));
    }

    #[test]
    fn all_negative_window_still_ranks_the_least_bad_patterns() {
        let mut samples = Vec::new();
        for i in 0..16 {
            samples.push(sample(&format!("60{i:04}"), (9, 21), "", -0.01, false));
        }
        for i in 0..16 {
            samples.push(sample(&format!("70{i:04}"), (14, 0), "", -0.05, false));
        }

        let report = analyze(&samples, &empty_library(), &defaults());

        // The board still has a top: the least-bad group leads it.
        assert!(!report.winning.is_empty());
        assert_eq!(
            report.winning[0].key,
            PatternKey::TimeBucket(TimeBucket::OpeningRush)
        );
        // Nothing earns a raise, but the worst bucket still earns a cut.
        assert!(report.suggestions.iter().all(|s| s.delta < 0.0));
        assert!(report.suggestions.iter().any(|s| {
            s.target == SuggestionTarget::TimeBucketWeight(TimeBucket::Late) && s.delta == -30.0
        }));
    }

    #[test]
    fn losing_industry_flags_matching_logic_entries() {
        let entry = LogicEntry {
            name: "property-revival".to_string(),
            leader_name: "X".to_string(),
            leader_code: "000002".to_string(),
            rationale: "r".to_string(),
            related_concepts: ["房地产"].iter().map(|s| s.to_string()).collect(),
            core_concepts: BTreeSet::new(),
            strength: 3,
            duration: String::new(),
            driver: String::new(),
            patterns: Vec::new(),
            risk_note: String::new(),
            secondary_stocks: BTreeSet::new(),
            bandwagon_stocks: BTreeSet::new(),
        };
        let library = LogicLibrary::from_entries(vec![entry]).unwrap();

        let samples: Vec<BacktestSample> = (0..16)
            .map(|i| sample(&format!("30{i:04}"), (14, 0), "房地产", -0.05, false))
            .collect();
        let report = analyze(&samples, &library, &defaults());
        assert!(report.suggestions.iter().any(|s| matches!(
            &s.target,
            SuggestionTarget::LogicEntry(name) if name == "property-revival"
        ) && s.delta < 0.0));
    }
}
