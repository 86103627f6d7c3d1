use crate::domain::event::LimitUpEvent;
use crate::domain::logic::{LogicEntry, LogicLibrary};
use crate::domain::watchlist::BenefitTier;
use std::collections::BTreeSet;

/// Outcome of matching one candidate against the logic library.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    Matched {
        entry_name: String,
        strength: u8,
        overlap: BTreeSet<String>,
        tier: BenefitTier,
    },
    /// Matched an entry that explicitly lists the stock as a rider.
    Bandwagon { entry_name: String },
    Unmatched,
}

/// Picks the single best logic entry for the event. Candidates are entries
/// whose related concepts intersect the event's concept tags, or which name
/// the stock as leader or secondary beneficiary. Ties resolve by strength,
/// then overlap cardinality, then entry name, so the decision is stable
/// across runs.
pub fn match_event(event: &LimitUpEvent, library: &LogicLibrary) -> MatchDecision {
    let mut best: Option<(&LogicEntry, BTreeSet<String>)> = None;

    for entry in library.entries() {
        let overlap: BTreeSet<String> = entry
            .related_concepts
            .intersection(&event.concepts)
            .cloned()
            .collect();
        let named = is_leader(event, entry)
            || entry.secondary_stocks.contains(&event.name)
            || entry.secondary_stocks.contains(&event.code)
            || is_bandwagon(event, entry);
        if overlap.is_empty() && !named {
            continue;
        }

        let better = match &best {
            None => true,
            Some((current, current_overlap)) => {
                entry
                    .strength
                    .cmp(&current.strength)
                    .then_with(|| overlap.len().cmp(&current_overlap.len()))
                    .then_with(|| current.name.cmp(&entry.name))
                    .is_gt()
            }
        };
        if better {
            best = Some((entry, overlap));
        }
    }

    let Some((entry, overlap)) = best else {
        return MatchDecision::Unmatched;
    };

    if is_bandwagon(event, entry) {
        return MatchDecision::Bandwagon {
            entry_name: entry.name.clone(),
        };
    }

    let tier = benefit_tier(event, entry, &overlap);
    MatchDecision::Matched {
        entry_name: entry.name.clone(),
        strength: entry.strength,
        overlap,
        tier,
    }
}

fn is_leader(event: &LimitUpEvent, entry: &LogicEntry) -> bool {
    event.code == entry.leader_code || event.name == entry.leader_name
}

fn is_bandwagon(event: &LimitUpEvent, entry: &LogicEntry) -> bool {
    entry.bandwagon_stocks.contains(&event.name) || entry.bandwagon_stocks.contains(&event.code)
}

/// The designated leader and anything overlapping a core-flagged concept
/// are core beneficiaries. Listed secondary stocks come next; a bare
/// related-concept overlap is opportunistic.
fn benefit_tier(event: &LimitUpEvent, entry: &LogicEntry, overlap: &BTreeSet<String>) -> BenefitTier {
    if is_leader(event, entry) {
        return BenefitTier::Core;
    }
    if overlap.iter().any(|c| entry.core_concepts.contains(c)) {
        return BenefitTier::Core;
    }
    if entry.secondary_stocks.contains(&event.name) || entry.secondary_stocks.contains(&event.code)
    {
        return BenefitTier::Secondary;
    }
    BenefitTier::Opportunistic
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(name: &str, strength: u8, related: &[&str], core: &[&str]) -> LogicEntry {
        LogicEntry {
            name: name.to_string(),
            leader_name: format!("{name}-leader"),
            leader_code: format!("9{name}"),
            rationale: "test narrative".to_string(),
            related_concepts: related.iter().map(|s| s.to_string()).collect(),
            core_concepts: core.iter().map(|s| s.to_string()).collect(),
            strength,
            duration: String::new(),
            driver: String::new(),
            patterns: Vec::new(),
            risk_note: String::new(),
            secondary_stocks: BTreeSet::new(),
            bandwagon_stocks: BTreeSet::new(),
        }
    }

    fn event(code: &str, name: &str, concepts: &[&str]) -> LimitUpEvent {
        LimitUpEvent {
            code: code.to_string(),
            name: name.to_string(),
            trade_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            limit_up_time: None,
            streak: 2,
            on_disclosure_list: false,
            industry: "综合".to_string(),
            concepts: concepts.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn core_concept_overlap_makes_a_core_beneficiary() {
        let lib = LogicLibrary::from_entries(vec![entry(
            "stablecoin",
            5,
            &["digital-currency", "fintech-card"],
            &["digital-currency"],
        )])
        .unwrap();
        let e = event("300468", "四方精创", &["digital-currency", "software"]);
        match match_event(&e, &lib) {
            MatchDecision::Matched { tier, overlap, .. } => {
                assert_eq!(tier, BenefitTier::Core);
                assert!(overlap.contains("digital-currency"));
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn plain_overlap_is_opportunistic() {
        let lib = LogicLibrary::from_entries(vec![entry(
            "stablecoin",
            5,
            &["digital-currency", "fintech-card"],
            &["digital-currency"],
        )])
        .unwrap();
        let e = event("000001", "平安银行", &["fintech-card"]);
        match match_event(&e, &lib) {
            MatchDecision::Matched { tier, .. } => assert_eq!(tier, BenefitTier::Opportunistic),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn designated_leader_is_core_without_any_overlap() {
        let mut le = entry("robotics", 4, &["robotics"], &[]);
        le.leader_code = "002104".to_string();
        let lib = LogicLibrary::from_entries(vec![le]).unwrap();
        let e = event("002104", "恒宝股份", &[]);
        match match_event(&e, &lib) {
            MatchDecision::Matched { tier, .. } => assert_eq!(tier, BenefitTier::Core),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn listed_secondary_stock_is_secondary_tier() {
        let mut le = entry("ai", 4, &["ai"], &[]);
        le.secondary_stocks.insert("中科曙光".to_string());
        let lib = LogicLibrary::from_entries(vec![le]).unwrap();
        let e = event("603019", "中科曙光", &["server"]);
        match match_event(&e, &lib) {
            MatchDecision::Matched { tier, .. } => assert_eq!(tier, BenefitTier::Secondary),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn strongest_entry_wins_then_overlap_then_name() {
        let lib = LogicLibrary::from_entries(vec![
            entry("weak", 3, &["ai", "server"], &[]),
            entry("strong", 5, &["ai"], &[]),
        ])
        .unwrap();
        let e = event("000100", "x", &["ai", "server"]);
        match match_event(&e, &lib) {
            MatchDecision::Matched { entry_name, .. } => assert_eq!(entry_name, "strong"),
            other => panic!("expected a match, got {other:?}"),
        }

        // Equal strength: wider overlap wins.
        let lib = LogicLibrary::from_entries(vec![
            entry("narrow", 4, &["ai"], &[]),
            entry("wide", 4, &["ai", "server"], &[]),
        ])
        .unwrap();
        match match_event(&e, &lib) {
            MatchDecision::Matched { entry_name, .. } => assert_eq!(entry_name, "wide"),
            other => panic!("expected a match, got {other:?}"),
        }

        // Equal strength and overlap: lexical entry name decides.
        let lib = LogicLibrary::from_entries(vec![
            entry("beta", 4, &["ai"], &[]),
            entry("alpha", 4, &["ai"], &[]),
        ])
        .unwrap();
        match match_event(&e, &lib) {
            MatchDecision::Matched { entry_name, .. } => assert_eq!(entry_name, "alpha"),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn bandwagon_listing_overrides_the_match() {
        let mut le = entry("theme", 5, &["ai"], &[]);
        le.bandwagon_stocks.insert("跟风科技".to_string());
        let lib = LogicLibrary::from_entries(vec![le]).unwrap();
        let e = event("300999", "跟风科技", &["ai"]);
        assert_eq!(
            match_event(&e, &lib),
            MatchDecision::Bandwagon {
                entry_name: "theme".to_string()
            }
        );
    }

    #[test]
    fn no_overlap_and_no_listing_is_unmatched() {
        let lib = LogicLibrary::from_entries(vec![entry("theme", 5, &["ai"], &[])]).unwrap();
        let e = event("600000", "浦发银行", &["bank"]);
        assert_eq!(match_event(&e, &lib), MatchDecision::Unmatched);
    }
}
