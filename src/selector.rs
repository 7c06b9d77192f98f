//! Phase 2: rank and place the PASS pool.
//!
//! Reads only a [`PersistedPool`]. Each PASS candidate gets exactly one
//! decision: INCLUDE with a global sequence number, or CUT with a reason.
//! Placement is greedy in score order within each section, sections in the
//! fixed order Tier 1, General Awareness, Local, Social Highlight.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audit::{artifact_path, write_once, PersistedPool};
use crate::candidate::{normalize_url, Candidate, CandidateKind, Section, SourceTier};
use crate::chronology::is_reference_account;
use crate::config::{CuratorConfig, DistributionConfig, SelectionConfig};
use crate::error::{CurationError, Result};
use crate::rules::RuleBook;
use crate::scoring::{score, Signal};

pub const SELECTION_PREFIX: &str = "selection";

/// Multi-topic bundles that cannot stand as one story.
const DIGEST_URL_PATTERNS: &[&str] = &[
    "up-first", "newsletter", "daily-briefing", "morning-rundown", "news-roundup",
    "5-things", "five-things", "the-daily-digest", "morning-edition-highlights",
    "evening-briefing", "daily-recap", "week-in-review", "news-wrap", "headlines-today",
];

const NON_ENGLISH_URL_SEGMENTS: &[&str] = &["/es/", "/spanish/", "/espanol/"];

const SPANISH_MARKERS: &[&str] = &[
    "el", "la", "los", "las", "de", "del", "en", "que", "por", "para", "con", "una", "como",
    "pero", "sobre", "entre", "hasta", "desde", "más", "según", "también", "después", "durante",
    "antes", "impacto", "costos", "inscripciones", "conocerá", "varios", "meses", "trabajadores",
    "renuncian", "salud", "pública", "consulta", "médico", "atención", "primaria", "registra",
    "inesperadamente", "altas", "pese", "reducción", "subsidios", "retención", "incierta",
    "aumento",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Include,
    Cut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionDecision {
    pub candidate_id: String,
    pub url: String,
    pub source: String,
    /// None when the candidate was cut before a section was confirmed.
    pub final_section: Option<Section>,
    pub sequence_number: Option<u32>,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cut_reason: Option<String>,
    pub score: i32,
    #[serde(default)]
    pub signals: Vec<Signal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedItem {
    pub sequence_number: u32,
    pub section: Section,
    pub candidate_id: String,
    pub headline: String,
    pub url: String,
    pub source: String,
    pub verified_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutEntry {
    pub candidate_id: String,
    pub reason: String,
}

/// A whole section dropped at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionCut {
    pub section: Section,
    pub reason: String,
    pub candidate_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub run_date: NaiveDate,
    /// Digest of the Phase 1 artifact this selection was computed from.
    pub pool_digest: String,
    pub items: Vec<SelectedItem>,
    pub cut_log: Vec<CutEntry>,
    pub decisions: Vec<SelectionDecision>,
    #[serde(default)]
    pub section_cuts: Vec<SectionCut>,
}

impl Selection {
    pub fn included(&self) -> usize {
        self.items.len()
    }

    pub fn section_counts(&self) -> BTreeMap<String, usize> {
        let mut m = BTreeMap::new();
        for it in &self.items {
            *m.entry(it.section.to_string()).or_default() += 1;
        }
        m
    }

    /// Write `selection-YYYY-MM-DD.json`; refuses to replace an existing file.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| CurationError::io(dir, e))?;
        let path = artifact_path(dir, SELECTION_PREFIX, self.run_date);
        write_once(&path, &serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

/// Working row: one per PASS candidate.
struct Row<'a> {
    c: &'a Candidate,
    score: i32,
    signals: Vec<Signal>,
    section: Option<Section>,
    local_category: Option<String>,
    included: bool,
    cut_reason: Option<String>,
}

impl Row<'_> {
    fn cut(&mut self, reason: impl Into<String>) {
        self.included = false;
        self.cut_reason = Some(reason.into());
    }
}

pub fn is_digest_url(url: &str) -> bool {
    let u = url.to_lowercase();
    DIGEST_URL_PATTERNS.iter().any(|p| u.contains(p))
}

/// URL language segments, or more than 30% Spanish marker words in a headline of 3+ words.
pub fn is_non_english(headline: &str, url: &str) -> bool {
    if NON_ENGLISH_URL_SEGMENTS.iter().any(|s| url.contains(s)) {
        return true;
    }
    let lower = headline.to_lowercase();
    let words: Vec<&str> = lower
        .split(|ch: char| !ch.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    if words.len() < 3 {
        return false;
    }
    let marked = words.iter().filter(|w| SPANISH_MARKERS.contains(w)).count();
    marked as f64 / words.len() as f64 > 0.30
}

/// Run Phase 2 against a persisted pool.
pub fn select(pool: &PersistedPool, cfg: &CuratorConfig, rules: &RuleBook) -> Result<Selection> {
    let record = pool.record();
    let unresolved = record.tally.unresolved_hard();
    if !unresolved.is_empty() {
        let detail: Vec<String> = unresolved.iter().map(|v| v.describe()).collect();
        return Err(CurationError::DistributionCapExceeded(detail.join("; ")));
    }

    let mut passed: Vec<&Candidate> = pool.passed().collect();
    passed.sort_by(|a, b| a.id().cmp(b.id()));

    let mut rows: Vec<Row> = passed
        .into_iter()
        .map(|c| {
            let card = score(c.headline(), c.source(), &rules.scoring);
            Row {
                c,
                score: card.score,
                signals: card.signals,
                section: None,
                local_category: None,
                included: false,
                cut_reason: None,
            }
        })
        .collect();

    for row in rows.iter_mut() {
        confirm_section(row, &cfg.selection, rules);
    }

    let mut used_urls: BTreeSet<String> = BTreeSet::new();
    let section_cuts: Vec<SectionCut> = Section::ORDER
        .into_iter()
        .filter_map(|section| place_section(section, &mut rows, cfg, &mut used_urls))
        .collect();

    let mut items = Vec::new();
    let mut seq: u32 = 0;
    let mut numbers: HashMap<&str, u32> = HashMap::new();
    for section in Section::ORDER {
        let mut in_section: Vec<&Row> = rows
            .iter()
            .filter(|r| r.included && r.section == Some(section))
            .collect();
        in_section.sort_by(|a, b| rank_order(a, b));
        for r in in_section {
            seq += 1;
            numbers.insert(r.c.id(), seq);
            items.push(SelectedItem {
                sequence_number: seq,
                section,
                candidate_id: r.c.id().to_string(),
                headline: r.c.headline().to_string(),
                url: r.c.url().to_string(),
                source: r.c.source().to_string(),
                verified_date: r.c.verified_date(),
            });
        }
    }

    let decisions: Vec<SelectionDecision> = rows
        .iter()
        .map(|r| SelectionDecision {
            candidate_id: r.c.id().to_string(),
            url: r.c.url().to_string(),
            source: r.c.source().to_string(),
            final_section: r.section,
            sequence_number: numbers.get(r.c.id()).copied(),
            decision: if r.included {
                Decision::Include
            } else {
                Decision::Cut
            },
            cut_reason: if r.included { None } else { r.cut_reason.clone() },
            score: r.score,
            signals: r.signals.clone(),
            local_category: r.local_category.clone(),
        })
        .collect();

    let cut_log: Vec<CutEntry> = decisions
        .iter()
        .filter(|d| d.decision == Decision::Cut)
        .map(|d| CutEntry {
            candidate_id: d.candidate_id.clone(),
            reason: d.cut_reason.clone().unwrap_or_default(),
        })
        .collect();

    counter!("curator_selection_include_total").increment(items.len() as u64);
    counter!("curator_selection_cut_total").increment(cut_log.len() as u64);
    info!(
        target: "phase2",
        included = items.len(),
        cut = cut_log.len(),
        "selection complete"
    );

    Ok(Selection {
        run_date: pool.run_date(),
        pool_digest: pool.digest().to_string(),
        items,
        cut_log,
        decisions,
        section_cuts,
    })
}

/// Decide the final section, or cut. Rows start not-included.
fn confirm_section(row: &mut Row<'_>, sel: &SelectionConfig, rules: &RuleBook) {
    let c = row.c;
    if is_digest_url(c.url()) {
        row.cut("multi-topic digest url");
        return;
    }
    if c.kind() == CandidateKind::SocialPost {
        if c.handle().is_some_and(is_reference_account) {
            row.cut("reference account post");
            return;
        }
        row.section = Some(Section::SocialHighlight);
        row.included = true;
        return;
    }
    if c.is_local() {
        match rules.local_allowlist.category_for(&c.match_text()) {
            Some(cat) => {
                row.local_category = Some(cat.to_string());
                row.section = Some(Section::Local);
                row.included = true;
            }
            None => row.cut("no local allowlist category"),
        }
        return;
    }
    if is_non_english(c.headline(), c.url()) {
        row.cut("non-English headline");
        return;
    }
    if row.score >= sel.tier1_min_score {
        row.section = Some(Section::Tier1);
        row.included = true;
    } else if c.ga_eligible() {
        row.section = Some(Section::GeneralAwareness);
        row.included = true;
    } else if c.source_tier() == SourceTier::Unknown {
        let err = CurationError::TierUnknown {
            source_name: c.publisher(),
        };
        row.cut(format!(
            "{err}; score {} below Tier 1 threshold {}",
            row.score, sel.tier1_min_score
        ));
    } else {
        row.cut(format!(
            "score {} below Tier 1 threshold {} and not GA-eligible",
            row.score, sel.tier1_min_score
        ));
    }
}

/// Highest score first; ties by tier, freshness, then id.
fn rank_order(a: &Row<'_>, b: &Row<'_>) -> std::cmp::Ordering {
    b.score
        .cmp(&a.score)
        .then(a.c.source_tier().rank().cmp(&b.c.source_tier().rank()))
        .then(a.c.age_hours().cmp(&b.c.age_hours()))
        .then(a.c.id().cmp(b.c.id()))
}

fn per_source_cap(section: Section, cfg: &CuratorConfig) -> usize {
    match section {
        Section::Tier1 => cfg.selection.tier1_per_source,
        Section::SocialHighlight => cfg.selection.social_per_handle,
        Section::GeneralAwareness | Section::Local => cfg.distribution.hard_source_cap,
    }
}

fn source_key(c: &Candidate) -> String {
    match (c.kind(), c.handle()) {
        (CandidateKind::SocialPost, Some(h)) => format!("@{}", h.to_ascii_lowercase()),
        _ => c.publisher(),
    }
}

fn place_section(
    section: Section,
    rows: &mut [Row<'_>],
    cfg: &CuratorConfig,
    used_urls: &mut BTreeSet<String>,
) -> Option<SectionCut> {
    let mut order: Vec<usize> = (0..rows.len())
        .filter(|&i| rows[i].included && rows[i].section == Some(section))
        .collect();
    order.sort_by(|&a, &b| rank_order(&rows[a], &rows[b]));

    let quota = cfg.selection.quota_for(section);
    let cap = per_source_cap(section, cfg);
    let dist: &DistributionConfig = &cfg.distribution;

    let mut taken = 0usize;
    let mut per_source: HashMap<String, usize> = HashMap::new();
    let mut per_region: HashMap<String, usize> = HashMap::new();
    let mut topics: BTreeSet<String> = BTreeSet::new();
    let mut section_urls: Vec<String> = Vec::new();

    for i in order {
        let row = &mut rows[i];
        let url = normalize_url(row.c.url());
        let src = source_key(row.c);
        if taken >= quota {
            row.cut(format!("{section} quota reached ({quota})"));
            continue;
        }
        if used_urls.contains(&url) {
            row.cut("url already selected");
            continue;
        }
        if per_source.get(&src).copied().unwrap_or(0) >= cap {
            row.cut(format!("per-source cap reached for {src} ({cap})"));
            continue;
        }
        if section == Section::GeneralAwareness {
            let region = row.c.region().unwrap_or(dist.default_region.as_str()).to_string();
            if per_region.get(&region).copied().unwrap_or(0) >= dist.ga_max_per_region {
                row.cut(format!(
                    "region bucket {region} full ({})",
                    dist.ga_max_per_region
                ));
                continue;
            }
            *per_region.entry(region).or_default() += 1;
        }
        if section == Section::SocialHighlight {
            let topic = row
                .c
                .cluster_id()
                .map(str::to_string)
                .unwrap_or_else(|| row.c.id().to_string());
            if !topics.insert(topic.clone()) {
                row.cut(format!("topic {topic} already covered"));
                continue;
            }
        }
        taken += 1;
        *per_source.entry(src).or_default() += 1;
        used_urls.insert(url.clone());
        section_urls.push(url);
        debug!(target: "phase2", candidate = %row.c.id(), %section, score = row.score, "included");
    }

    if taken == 0 {
        return None;
    }
    let required = dist.min_sources_for(section);
    let distinct = per_source.len();
    let reason = if distinct < required {
        format!("section below minimum distinct-source count ({distinct} < {required})")
    } else if section == Section::GeneralAwareness && per_region.len() < dist.ga_min_regions {
        format!(
            "section below minimum distinct-region count ({} < {})",
            per_region.len(),
            dist.ga_min_regions
        )
    } else {
        return None;
    };

    info!(target: "phase2", %section, %reason, "cutting section");
    let mut candidate_ids = Vec::new();
    for row in rows
        .iter_mut()
        .filter(|r| r.included && r.section == Some(section))
    {
        candidate_ids.push(row.c.id().to_string());
        row.cut(reason.clone());
    }
    for u in section_urls {
        used_urls.remove(&u);
    }
    Some(SectionCut {
        section,
        reason,
        candidate_ids,
    })
}
