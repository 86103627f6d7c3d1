use crate::error::EngineError;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// One curated thematic narrative from the human-maintained logic library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicEntry {
    pub name: String,
    /// Designated leading stock for the narrative.
    pub leader_name: String,
    pub leader_code: String,
    /// Why the theme is being traded right now.
    pub rationale: String,
    /// Concept tags that tie a candidate to this narrative.
    pub related_concepts: BTreeSet<String>,
    /// Subset of related concepts marking core beneficiaries.
    #[serde(default)]
    pub core_concepts: BTreeSet<String>,
    /// 1 (fading) to 5 (market-defining).
    pub strength: u8,
    /// Expected duration of the theme, free text.
    #[serde(default)]
    pub duration: String,
    /// Driver-type label (policy, event, earnings, ...).
    #[serde(default)]
    pub driver: String,
    /// Playbook pattern names this narrative supports.
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub risk_note: String,
    /// Stocks benefiting second-hand (by name or code).
    #[serde(default)]
    pub secondary_stocks: BTreeSet<String>,
    /// Stocks merely riding the theme; matched but never watch-list worthy.
    #[serde(default)]
    pub bandwagon_stocks: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct LogicFile {
    entries: Vec<LogicEntry>,
}

/// Immutable snapshot of the logic library for one run. The file is edited
/// by a human operator between runs; a run either loads the whole file or
/// fails with `ConfigInvalid` — it never sees a partial update.
#[derive(Debug, Clone)]
pub struct LogicLibrary {
    entries: Vec<LogicEntry>,
}

impl LogicLibrary {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::Error::new(EngineError::config_invalid(
                None,
                format!("cannot read {}: {e}", path.display()),
            ))
        })?;
        Self::from_yaml_str(&raw).with_context(|| format!("loading {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let file: LogicFile = serde_yaml::from_str(raw).map_err(|e| {
            anyhow::Error::new(EngineError::config_invalid(None, format!("yaml: {e}")))
        })?;

        let mut seen = BTreeSet::new();
        for entry in &file.entries {
            validate_entry(entry)?;
            if !seen.insert(entry.name.clone()) {
                return Err(anyhow::Error::new(EngineError::config_invalid(
                    Some(&entry.name),
                    "duplicate entry name",
                )));
            }
        }

        tracing::info!(entries = file.entries.len(), "logic library loaded");
        Ok(Self {
            entries: file.entries,
        })
    }

    pub fn from_entries(entries: Vec<LogicEntry>) -> anyhow::Result<Self> {
        for entry in &entries {
            validate_entry(entry)?;
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[LogicEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&LogicEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn invalid(entry: &LogicEntry, detail: &str) -> anyhow::Error {
    anyhow::Error::new(EngineError::config_invalid(Some(&entry.name), detail))
}

fn validate_entry(entry: &LogicEntry) -> anyhow::Result<()> {
    if entry.name.trim().is_empty() {
        return Err(anyhow::Error::new(EngineError::config_invalid(
            None,
            "entry name must be non-empty",
        )));
    }
    if entry.leader_code.trim().is_empty() {
        return Err(invalid(entry, "leader_code must be non-empty"));
    }
    if !(1..=5).contains(&entry.strength) {
        return Err(invalid(
            entry,
            &format!("strength must be 1..=5 (got {})", entry.strength),
        ));
    }
    if entry.related_concepts.is_empty() {
        return Err(invalid(entry, "related_concepts must be non-empty"));
    }
    if !entry.core_concepts.is_subset(&entry.related_concepts) {
        return Err(invalid(
            entry,
            "core_concepts must be a subset of related_concepts",
        ));
    }
    Ok(())
}
