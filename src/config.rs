// src/config.rs
//! Runtime configuration for a curation run.
//!
//! Lookup order (first hit wins):
//! 1) `$CURATOR_CONFIG_PATH`
//! 2) `config/curator.toml`
//! 3) `config/curator.json`
//! 4) built-in defaults
//!
//! Every field has a default, so a partial file only overrides what it names.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::candidate::{Section, MAX_AGE_HOURS};
use crate::error::CurationError;

pub const ENV_CONFIG_PATH: &str = "CURATOR_CONFIG_PATH";
pub const ENV_TIERS_PATH: &str = "CURATOR_TIERS_PATH";
pub const ENV_RULES_PATH: &str = "CURATOR_RULES_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuratorConfig {
    pub gate: GateConfig,
    pub chronology: ChronologyConfig,
    pub distribution: DistributionConfig,
    pub selection: SelectionConfig,
    pub fetch: FetchConfig,
    /// Where phase1/selection/reconciliation artifacts land.
    pub output_dir: PathBuf,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            gate: GateConfig::default(),
            chronology: ChronologyConfig::default(),
            distribution: DistributionConfig::default(),
            selection: SelectionConfig::default(),
            fetch: FetchConfig::default(),
            output_dir: PathBuf::from("out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub max_age_hours: u32,
    /// Dates further than this in the future count as unverifiable.
    pub future_skew_hours: u32,
    pub min_extraordinary_corroboration: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_age_hours: MAX_AGE_HOURS,
            future_skew_hours: 2,
            min_extraordinary_corroboration: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChronologyConfig {
    pub max_delta: u64,
}

impl Default for ChronologyConfig {
    fn default() -> Self {
        Self { max_delta: 500_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Items from one publisher within a section above this are a violation.
    pub hard_source_cap: usize,
    /// Above this a warning is recorded.
    pub soft_source_cap: usize,
    #[serde(deserialize_with = "min_sources_over_defaults")]
    pub min_distinct_sources: PerSection,
    pub ga_min_regions: usize,
    pub ga_max_per_region: usize,
    pub default_region: String,
    pub social_topic_cap: usize,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            hard_source_cap: 3,
            soft_source_cap: 2,
            min_distinct_sources: PerSection {
                tier1: 2,
                general_awareness: 3,
                local: 1,
                social_highlight: 1,
            },
            ga_min_regions: 2,
            ga_max_per_region: 4,
            default_region: "US".to_string(),
            social_topic_cap: 1,
        }
    }
}

impl DistributionConfig {
    pub fn min_sources_for(&self, section: Section) -> usize {
        self.min_distinct_sources.get(section)
    }
}

/// One number per output section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerSection {
    pub tier1: usize,
    pub general_awareness: usize,
    pub local: usize,
    pub social_highlight: usize,
}

/// A per-section table as written in a file; missing sections keep the base value.
#[derive(Debug, Default, Deserialize)]
struct PartialPerSection {
    tier1: Option<usize>,
    general_awareness: Option<usize>,
    local: Option<usize>,
    social_highlight: Option<usize>,
}

impl PartialPerSection {
    fn over(self, base: PerSection) -> PerSection {
        PerSection {
            tier1: self.tier1.unwrap_or(base.tier1),
            general_awareness: self.general_awareness.unwrap_or(base.general_awareness),
            local: self.local.unwrap_or(base.local),
            social_highlight: self.social_highlight.unwrap_or(base.social_highlight),
        }
    }
}

fn min_sources_over_defaults<'de, D>(d: D) -> std::result::Result<PerSection, D::Error>
where
    D: Deserializer<'de>,
{
    let base = DistributionConfig::default().min_distinct_sources;
    Ok(PartialPerSection::deserialize(d)?.over(base))
}

fn quotas_over_defaults<'de, D>(d: D) -> std::result::Result<PerSection, D::Error>
where
    D: Deserializer<'de>,
{
    let base = SelectionConfig::default().quotas;
    Ok(PartialPerSection::deserialize(d)?.over(base))
}

impl PerSection {
    pub fn get(&self, section: Section) -> usize {
        match section {
            Section::Tier1 => self.tier1,
            Section::GeneralAwareness => self.general_awareness,
            Section::Local => self.local,
            Section::SocialHighlight => self.social_highlight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    #[serde(deserialize_with = "quotas_over_defaults")]
    pub quotas: PerSection,
    pub tier1_min_score: i32,
    /// Per-source cap inside Tier1 (per handle for SocialHighlight).
    pub tier1_per_source: usize,
    pub social_per_handle: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            quotas: PerSection {
                tier1: 6,
                general_awareness: 10,
                local: 5,
                social_highlight: 4,
            },
            tier1_min_score: 10,
            tier1_per_source: 2,
            social_per_handle: 2,
        }
    }
}

impl SelectionConfig {
    pub fn quota_for(&self, section: Section) -> usize {
        self.quotas.get(section)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub workers: usize,
    pub per_host: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            per_host: 2,
            timeout_secs: 15,
            user_agent: "Mozilla/5.0 (compatible; digest-curator/0.1)".to_string(),
        }
    }
}

impl CuratorConfig {
    /// Load from an explicit path. TOML or JSON, chosen by extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading curator config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, &ext)
            .with_context(|| format!("parsing curator config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        for candidate in ["config/curator.toml", "config/curator.json"] {
            let p = PathBuf::from(candidate);
            if p.exists() {
                return Self::load_from(&p);
            }
        }
        Ok(Self::default())
    }

    /// Reject settings that would break the PASS/selection invariants.
    pub fn validate(&self) -> Result<()> {
        if self.gate.max_age_hours > MAX_AGE_HOURS {
            return Err(invalid(format!(
                "gate.max_age_hours={} exceeds the {MAX_AGE_HOURS} h ceiling",
                self.gate.max_age_hours
            )));
        }
        if self.gate.min_extraordinary_corroboration == 0 {
            return Err(invalid("gate.min_extraordinary_corroboration must be >= 1"));
        }
        let d = &self.distribution;
        if d.soft_source_cap > d.hard_source_cap || d.hard_source_cap == 0 {
            return Err(invalid(format!(
                "distribution caps inconsistent (soft={}, hard={})",
                d.soft_source_cap,
                d.hard_source_cap
            )));
        }
        if d.ga_max_per_region == 0 || d.social_topic_cap == 0 {
            return Err(invalid("distribution per-bucket caps must be >= 1"));
        }
        if d.default_region.trim().is_empty() {
            return Err(invalid("distribution.default_region must not be empty"));
        }
        if self.fetch.workers == 0 || self.fetch.per_host == 0 {
            return Err(invalid("fetch.workers and fetch.per_host must be >= 1"));
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> anyhow::Error {
    CurationError::config(message).into()
}

fn parse_config(s: &str, hint_ext: &str) -> Result<CuratorConfig> {
    if hint_ext == "json" {
        return Ok(serde_json::from_str(s)?);
    }
    match toml::from_str::<CuratorConfig>(s) {
        Ok(c) => Ok(c),
        Err(toml_err) => {
            serde_json::from_str(s).map_err(|_| anyhow!("unsupported config format: {toml_err}"))
        }
    }
}

/// Resolve an optional JSON table path: env var, then `config/<file>`.
pub fn table_path(env_key: &str, fallback: &str) -> Result<Option<PathBuf>> {
    if let Ok(p) = std::env::var(env_key) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Some(pb));
        }
        return Err(anyhow!("{env_key} points to non-existent path"));
    }
    let pb = PathBuf::from("config").join(fallback);
    Ok(pb.exists().then_some(pb))
}
