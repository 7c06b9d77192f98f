//! # Source Tiers
//!
//! Maps a publisher (by name, or by URL when the name is missing or ambiguous)
//! to a fixed trust tier.
//!
//! - Built-in `default_seed()` covers the known Tier 1/2/3 and local publishers.
//! - Case-insensitive lookup; punctuation, dashes and a trailing parenthetical
//!   such as `(AFP)` are ignored.
//! - Aliases fold spellings of one publisher onto a canonical key, so per-source
//!   caps count "NYT" and "The New York Times" as the same outlet.
//! - Operator overrides (JSON) win over the seed and are the only way to lift a
//!   source out of `Unknown`.
//!
//! Unseen sources are `Unknown` and never GA-eligible. Local sources are never
//! GA-eligible either, whatever the headline.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};

use crate::candidate::{CandidateKind, Section, SourceTier};
use crate::config::{table_path, ENV_TIERS_PATH};

/// Classification result attached to a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInfo {
    pub tier: SourceTier,
    pub ga_eligible: bool,
    pub is_local: bool,
    /// Canonical publisher key (normalized, alias-folded).
    pub publisher: String,
    /// Empty for Tier 1/2; explains the flag otherwise.
    pub note: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TierTable {
    /// Normalized publisher name → tier.
    #[serde(default)]
    pub tiers: HashMap<String, SourceTier>,
    /// Host (or host suffix) → publisher display name.
    #[serde(default)]
    pub domains: HashMap<String, String>,
    /// Alternative spelling → canonical publisher name.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    /// Operator reclassifications; checked before `tiers`.
    #[serde(default)]
    pub overrides: HashMap<String, SourceTier>,
}

impl TierTable {
    /// Seed plus overrides from `$CURATOR_TIERS_PATH` or `config/tiers.json`.
    pub fn load_default() -> Result<Self> {
        let mut table = Self::default_seed();
        if let Some(p) = table_path(ENV_TIERS_PATH, "tiers.json")? {
            table.merge(Self::load_from_file(&p)?);
        }
        Ok(table)
    }

    /// Parse a JSON tier file. Unlike the seed, a broken file is an error:
    /// silently dropping an operator override would misclassify sources.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("reading tier table from {}", path.display()))?;
        let mut t: Self = serde_json::from_str(&s)
            .with_context(|| format!("parsing tier table {}", path.display()))?;
        t.normalize_keys();
        Ok(t)
    }

    /// Layer `other` on top of `self`; entries in `other` win.
    pub fn merge(&mut self, other: TierTable) {
        self.tiers.extend(other.tiers);
        self.domains.extend(other.domains);
        self.aliases.extend(other.aliases);
        self.overrides.extend(other.overrides);
    }

    fn normalize_keys(&mut self) {
        self.tiers = std::mem::take(&mut self.tiers)
            .into_iter()
            .map(|(k, v)| (normalize(&k), v))
            .collect();
        self.aliases = std::mem::take(&mut self.aliases)
            .into_iter()
            .map(|(k, v)| (normalize(&k), normalize(&v)))
            .collect();
        self.overrides = std::mem::take(&mut self.overrides)
            .into_iter()
            .map(|(k, v)| (normalize(&k), v))
            .collect();
        self.domains = std::mem::take(&mut self.domains)
            .into_iter()
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v))
            .collect();
    }

    /// Publisher display name for a URL, from the domain map.
    pub fn infer_source(&self, url: &str) -> Option<String> {
        let host = host_of(url)?;
        // Longest matching fragment wins ("sports.yahoo.com" over "yahoo.com").
        self.domains
            .iter()
            .filter(|(frag, _)| host == frag.as_str() || host.ends_with(&format!(".{frag}")))
            .max_by_key(|(frag, _)| frag.len())
            .map(|(_, name)| name.clone())
    }

    /// Alias-folded normalized key used for per-publisher counting.
    pub fn publisher_key(&self, source: &str) -> String {
        let n = normalize(source);
        match self.aliases.get(&n) {
            Some(canon) => canon.clone(),
            None => n,
        }
    }

    pub fn classify(&self, source: &str, url: Option<&str>) -> TierInfo {
        let mut names: Vec<String> = Vec::with_capacity(3);
        let base = self.publisher_key(source);
        if !base.is_empty() {
            names.push(base);
        }
        let raw_lower = normalize_keep_parens(source);
        if !raw_lower.is_empty() && !names.contains(&raw_lower) {
            names.push(raw_lower);
        }
        if let Some(from_url) = url.and_then(|u| self.infer_source(u)) {
            let k = self.publisher_key(&from_url);
            if !names.contains(&k) {
                names.push(k);
            }
        }

        for n in &names {
            if let Some(&tier) = self.overrides.get(n) {
                return info_for(tier, n, source, "operator override");
            }
        }
        for tier in [
            SourceTier::Tier1,
            SourceTier::Tier2,
            SourceTier::Tier3,
            SourceTier::Local,
        ] {
            if let Some(n) = names.iter().find(|n| self.tiers.get(*n) == Some(&tier)) {
                return info_for(tier, n, source, "");
            }
        }
        let publisher = names.into_iter().next().unwrap_or_default();
        info_for(SourceTier::Unknown, &publisher, source, "")
    }

    /// Built-in seed with the known publisher lists.
    pub fn default_seed() -> Self {
        let mut t = Self::default();

        for k in [
            "bbc", "reuters", "associated press", "al jazeera", "npr",
            "new york times", "wall street journal", "the guardian",
        ] {
            t.tiers.insert(normalize(k), SourceTier::Tier1);
        }
        for k in [
            "bloomberg", "cnbc", "financial times", "politico", "washington post",
            "cnn", "pbs", "abc news", "cbs news", "nbc news", "espn", "techcrunch",
            "the verge", "fortune", "wired", "time", "axios", "the atlantic",
            "the economist", "foreign affairs", "foreign policy",
        ] {
            t.tiers.insert(normalize(k), SourceTier::Tier2);
        }
        for k in [
            "olympics.com", "nbc olympics", "yahoo sports", "bleacher report",
            "unhcr", "balkan insight", "just security", "defense one",
            "ukrainian pravda", "military times", "space.com", "the diplomat",
            "pr newswire", "globenewswire", "business wire", "ramaonhealthcare",
            "times of israel", "healthcare dive", "fierce healthcare",
            "modern healthcare", "becker's hospital review", "stat news",
            "kff health news", "mit technology review", "ars technica",
            "the information", "techmeme",
        ] {
            t.tiers.insert(normalize(k), SourceTier::Tier3);
        }
        for k in [
            "east bay times", "mercury news", "patch", "danville san ramon",
            "sf standard", "sf chronicle", "abc7", "kqed", "pleasanton weekly",
            "tri valley herald", "oakland tribune", "bay area news group",
            "marin independent journal",
        ] {
            t.tiers.insert(normalize(k), SourceTier::Local);
        }

        for (a, c) in [
            ("bbc world", "bbc"),
            ("bbc news", "bbc"),
            ("bbc sport", "bbc"),
            ("reuters business", "reuters"),
            ("ap", "associated press"),
            ("ap news", "associated press"),
            ("npr news", "npr"),
            ("nyt", "new york times"),
            ("the new york times", "new york times"),
            ("nytimes", "new york times"),
            ("wsj", "wall street journal"),
            ("the wall street journal", "wall street journal"),
            ("guardian", "the guardian"),
            ("ft", "financial times"),
            ("the washington post", "washington post"),
            ("wapo", "washington post"),
            ("pbs newshour", "pbs"),
            ("techcrunch ai", "techcrunch"),
            ("the verge ai", "the verge"),
            ("time magazine", "time"),
            ("nbcolympics", "nbc olympics"),
            ("ukr pravda", "ukrainian pravda"),
            ("prnewswire", "pr newswire"),
            ("beckers hospital review", "becker's hospital review"),
            ("san jose mercury news", "mercury news"),
            ("danville sanramon", "danville san ramon"),
            ("san francisco standard", "sf standard"),
            ("san francisco chronicle", "sf chronicle"),
            ("sfchronicle", "sf chronicle"),
            ("abc7 san francisco", "abc7"),
            ("abc7 news", "abc7"),
        ] {
            t.aliases.insert(normalize(a), normalize(c));
        }

        for (d, name) in [
            ("nbcolympics.com", "NBC Olympics"),
            ("olympics.com", "Olympics.com"),
            ("sports.yahoo.com", "Yahoo Sports"),
            ("bleacherreport.com", "Bleacher Report"),
            ("prnewswire.com", "PR Newswire"),
            ("globenewswire.com", "GlobeNewswire"),
            ("businesswire.com", "Business Wire"),
            ("timesofisrael.com", "Times of Israel"),
            ("ramaonhealthcare.com", "RamaOnHealthcare"),
            ("statnews.com", "STAT News"),
            ("healthcaredive.com", "Healthcare Dive"),
            ("fiercehealthcare.com", "Fierce Healthcare"),
            ("modernhealthcare.com", "Modern Healthcare"),
            ("beckershospitalreview.com", "Becker's Hospital Review"),
            ("kffhealthnews.org", "KFF Health News"),
            ("techcrunch.com", "TechCrunch"),
            ("theverge.com", "The Verge"),
            ("arstechnica.com", "Ars Technica"),
            ("technologyreview.com", "MIT Technology Review"),
            ("techmeme.com", "Techmeme"),
            ("theinformation.com", "The Information"),
            ("bbc.com", "BBC"),
            ("bbc.co.uk", "BBC"),
            ("reuters.com", "Reuters"),
            ("apnews.com", "AP News"),
            ("npr.org", "NPR"),
            ("aljazeera.com", "Al Jazeera"),
            ("aljazeera.net", "Al Jazeera"),
            ("france24.com", "France24"),
            ("dw.com", "DW News"),
            ("nytimes.com", "New York Times"),
            ("wsj.com", "Wall Street Journal"),
            ("cnbc.com", "CNBC"),
            ("bloomberg.com", "Bloomberg"),
            ("washingtonpost.com", "Washington Post"),
            ("politico.com", "Politico"),
            ("espn.com", "ESPN"),
            ("nbcnews.com", "NBC News"),
            ("cbsnews.com", "CBS News"),
            ("abcnews.go.com", "ABC News"),
            ("cnn.com", "CNN"),
            ("theguardian.com", "The Guardian"),
            ("ft.com", "Financial Times"),
            ("fortune.com", "Fortune"),
            ("wired.com", "Wired"),
            ("axios.com", "Axios"),
            ("sfchronicle.com", "SF Chronicle"),
            ("sfstandard.com", "SF Standard"),
            ("eastbaytimes.com", "East Bay Times"),
            ("mercurynews.com", "Mercury News"),
            ("kqed.org", "KQED"),
            ("abc7news.com", "ABC7"),
            ("patch.com", "Patch"),
            ("pbs.org", "PBS"),
        ] {
            t.domains.insert(d.to_string(), name.to_string());
        }

        t
    }
}

fn info_for(tier: SourceTier, publisher: &str, source: &str, why: &str) -> TierInfo {
    let ga_eligible = tier.is_high_trust();
    let note = match tier {
        SourceTier::Tier1 | SourceTier::Tier2 if why.is_empty() => String::new(),
        SourceTier::Tier1 | SourceTier::Tier2 => why.to_string(),
        SourceTier::Tier3 => format!(
            "flagged: '{source}' is Tier 3 (niche/single-topic); needs Tier 1/2 coverage for GA"
        ),
        SourceTier::Local => format!("blocked: '{source}' is a local outlet; never GA"),
        SourceTier::Unknown => {
            format!("unknown: '{source}' not in tier table; needs operator classification")
        }
    };
    TierInfo {
        tier,
        ga_eligible,
        is_local: tier == SourceTier::Local,
        publisher: publisher.to_string(),
        note,
    }
}

/// Intended placement decided at classification time.
pub fn intended_section(kind: CandidateKind, info: &TierInfo) -> Section {
    if kind == CandidateKind::SocialPost {
        Section::SocialHighlight
    } else if info.is_local {
        Section::Local
    } else if info.ga_eligible {
        Section::GeneralAwareness
    } else {
        Section::Tier1
    }
}

fn host_of(url: &str) -> Option<String> {
    let u = url::Url::parse(url.trim()).ok()?;
    let host = u.host_str()?.to_ascii_lowercase();
    Some(host.trim_start_matches("www.").to_string())
}

/// Lowercase, drop a trailing parenthetical, fold punctuation/dashes into single spaces.
pub fn normalize(s: &str) -> String {
    let trimmed = s.trim();
    let without_paren = match (trimmed.ends_with(')'), trimmed.rfind('(')) {
        (true, Some(i)) => &trimmed[..i],
        _ => trimmed,
    };
    normalize_keep_parens(without_paren)
}

fn normalize_keep_parens(s: &str) -> String {
    let mut out = s.trim().to_lowercase();

    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['\n', '\r', '\t', '.', ',', '’', '\'', '(', ')'], " ");

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
