//! Declarative rule tables used by the gate and the selector.
//!
//! Conditions share one small JSON DSL over the candidate text (case-insensitive):
//! - `any_contains`: match if ANY phrase appears as a substring
//! - `all_contains`: match if ALL phrases appear
//! - `not_contains`: match if NONE of the phrases appear
//! - `any_word`:     match if ANY phrase appears on word boundaries
//! - `min_len`:      match if the text has at least this many chars
//!
//! Three tables are built from it:
//! - [`ScoringRules`]: keyword tiers, decision relevance, source boosts and
//!   anti-pattern penalties, plus free-form `extra` rules with a point delta.
//! - [`LocalAllowlist`]: declared categories a Local item must fall into.
//! - [`ClaimRules`]: patterns that mark a claim as extraordinary.
//!
//! All three load from one JSON file (`$CURATOR_RULES_PATH` or
//! `config/scoring_rules.json`); any table the file omits keeps its built-in value.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::candidate::ClaimSeverity;
use crate::config::{table_path, ENV_RULES_PATH};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct When {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_contains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_contains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_contains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_word: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_len: Option<usize>,
}

impl When {
    pub fn any_of(phrases: &[&str]) -> Self {
        Self {
            any_contains: Some(phrases.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn any_word_of(phrases: &[&str]) -> Self {
        Self {
            any_word: Some(phrases.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    /// `text` must already be normalized with [`normalize`].
    pub fn matches(&self, text: &str) -> bool {
        if let Some(min) = self.min_len {
            if text.chars().count() < min {
                return false;
            }
        }
        if let Some(v) = &self.any_contains {
            if !v.iter().any(|p| contains(text, p)) {
                return false;
            }
        }
        if let Some(v) = &self.any_word {
            if !v.iter().any(|p| contains_word(text, p)) {
                return false;
            }
        }
        if let Some(v) = &self.all_contains {
            if !v.iter().all(|p| contains(text, p)) {
                return false;
            }
        }
        if let Some(v) = &self.not_contains {
            if v.iter().any(|p| contains(text, p)) {
                return false;
            }
        }
        true
    }

    /// First phrase that made `any_contains` / `any_word` match, for audit notes.
    pub fn first_hit(&self, text: &str) -> Option<String> {
        let subs = self.any_contains.iter().flatten().find(|p| contains(text, p));
        let words = || self.any_word.iter().flatten().find(|p| contains_word(text, p));
        subs.or_else(words).cloned()
    }
}

/// A free-form scoring adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub when: When,
    #[serde(default)]
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordTiers {
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub low: Vec<String>,
    pub high_points: i32,
    pub medium_points: i32,
    pub low_points: i32,
}

/// One list of phrases scored once, however many of them hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnceSignal {
    pub phrases: Vec<String>,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBoost {
    pub source: String,
    pub points: i32,
}

/// Penalty keyed on how many phrases hit: `single` for one, `multiple` for two or more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountPenalty {
    pub phrases: Vec<String>,
    pub single: i32,
    pub multiple: i32,
}

/// Penalty that applies once `min_hits` phrases are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPenalty {
    pub phrases: Vec<String>,
    pub min_hits: usize,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRules {
    pub keywords: KeywordTiers,
    pub market: OnceSignal,
    pub geopolitical: OnceSignal,
    /// Checked in order; first source match wins.
    pub source_boosts: Vec<SourceBoost>,
    pub press_release: CountPenalty,
    pub hedging: ThresholdPenalty,
    pub think_piece: ThresholdPenalty,
    pub extra: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCategory {
    pub name: String,
    pub when: When,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalAllowlist {
    pub categories: Vec<LocalCategory>,
}

impl LocalAllowlist {
    /// Name of the first category the text falls into.
    pub fn category_for(&self, text: &str) -> Option<&str> {
        let t = normalize(text);
        self.categories
            .iter()
            .find(|c| c.when.matches(&t))
            .map(|c| c.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimRules {
    pub extraordinary: When,
}

impl ClaimRules {
    /// Severity plus the phrase that triggered it.
    pub fn assess(&self, text: &str) -> (ClaimSeverity, Option<String>) {
        let t = normalize(text);
        if self.extraordinary.matches(&t) {
            (ClaimSeverity::Extraordinary, self.extraordinary.first_hit(&t))
        } else {
            (ClaimSeverity::Ordinary, None)
        }
    }
}

/// Every rule table the pipeline reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleBook {
    pub scoring: ScoringRules,
    pub local_allowlist: LocalAllowlist,
    pub claims: ClaimRules,
}

impl RuleBook {
    /// Built-in tables, replaced per table by `$CURATOR_RULES_PATH` or `config/scoring_rules.json`.
    pub fn load_default() -> Result<Self> {
        match table_path(ENV_RULES_PATH, "scoring_rules.json")? {
            Some(p) => Self::load_from_file(&p),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("reading rules from {}", path.display()))?;
        let book: Self = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing rules {}", path.display()))?;
        Ok(book)
    }
}

// --- built-in tables ---

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordTiers {
    fn default() -> Self {
        Self {
            high: strings(&[
                "patient financing", "payment plan", "patient payment", "self-pay",
                "out-of-pocket", "healthcare affordability", "medical debt", "revenue cycle",
                "rcm", "patient collections", "bad debt", "financial assistance",
                "medicaid eligibility", "health system financial", "provider revenue",
                "telehealth reimbursement",
            ]),
            medium: strings(&[
                "openai", "anthropic", "claude", "chatgpt", "gpt-4", "gpt-5", "gemini",
                "deepmind", "nvidia", "meta ai", "mistral", "ai coding", "codex", "cursor",
                "ai agent", "enterprise ai", "ai-native", "coding assistant", "developer tools",
                "ai adoption", "health system", "hospital", "optum", "unitedhealth", "cms",
                "medicare", "medicaid", "affordable care act",
            ]),
            low: strings(&[
                "healthcare", "fintech", "startup", "series", "funding",
                "artificial intelligence", "machine learning", "automation", "valuation",
                "billion", "investment",
            ]),
            high_points: 10,
            medium_points: 5,
            low_points: 1,
        }
    }
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            keywords: KeywordTiers::default(),
            market: OnceSignal {
                phrases: strings(&[
                    "market crash", "stock crash", "market selloff", "sell-off", "recession",
                    "bear market", "market correction", "downturn", "market plunge", "fed rate",
                    "rate hike", "rate cut", "interest rate", "unemployment spike", "job losses",
                    "mass layoff", "bank failure", "banking crisis", "liquidity crisis",
                    "tariff", "trade war", "economic shock", "ipo", "market cap", "trillion",
                    "economy", "gdp", "inflation", "earnings", "layoffs", "stocks", "deficit",
                    "government shutdown", "trade deal", "job cuts", "jobs report",
                    "labor market", "debt ceiling", "treasury", "central bank",
                ]),
                points: 7,
            },
            geopolitical: OnceSignal {
                phrases: strings(&[
                    "sanctions", "nato", "opec", "g7", "g20", "united nations", "diplomacy",
                    "embassy", "ceasefire", "peace deal", "arms deal", "nuclear talks",
                    "nuclear deal", "territorial", "sovereignty",
                ]),
                points: 5,
            },
            source_boosts: [
                ("techmeme", 5),
                ("techcrunch", 3),
                ("the verge", 3),
                ("the information", 3),
                ("ars technica", 2),
                ("wired", 2),
                ("mit technology review", 2),
            ]
            .into_iter()
            .map(|(source, points)| SourceBoost {
                source: source.to_string(),
                points,
            })
            .collect(),
            press_release: CountPenalty {
                phrases: strings(&[
                    "completes deployment", "announces partnership", "launches new",
                    "expands operations", "signs agreement", "selected by", "chosen to provide",
                    "awards contract", "deploys", "enterprise-wide", "go-live", "rolls out",
                    "now available", "partners with", "teams up with", "integrates with",
                    "unveils new", "introduces new", "expands into", "achieves milestone",
                    "reaches milestone", "surpasses", "named leader", "recognized as",
                    "positioned as", "completes acquisition", "acquires", "enters partnership",
                    "signs deal", "inks deal", "secures contract", "completes rollout",
                    "completes migration",
                ]),
                single: -5,
                multiple: -25,
            },
            hedging: ThresholdPenalty {
                phrases: strings(&[
                    "could", "might", "may", "possibly", "reportedly", "rumored", "rumoured",
                    "unconfirmed", "allegedly", "sources say", "expected to", "considering",
                    "weighs", "mulls",
                ]),
                min_hits: 3,
                points: -10,
            },
            think_piece: ThresholdPenalty {
                phrases: strings(&[
                    "why ai matters", "what it means for", "why it matters", "the case for",
                    "the case against", "lessons from", "design principles", "opinion:",
                    "op-ed", "a guide to", "things to know", "how to think about",
                    "the future of",
                ]),
                min_hits: 1,
                points: -8,
            },
            extra: Vec::new(),
        }
    }
}

impl Default for LocalAllowlist {
    fn default() -> Self {
        let cat = |name: &str, phrases: &[&str]| LocalCategory {
            name: name.to_string(),
            when: When::any_word_of(phrases),
        };
        Self {
            categories: vec![
                cat(
                    "transit",
                    &[
                        "bart", "caltrain", "muni", "vta", "highway", "highways", "traffic",
                        "road closure", "road closures", "bridge", "bridges", "transit", "commute",
                        "680", "580", "880", "101", "freeway", "freeways", "interchange", "rail",
                        "amtrak",
                    ],
                ),
                cat(
                    "weather_hazard",
                    &[
                        "spare the air", "air quality", "heat advisory", "flood warning", "storm",
                        "storms", "wildfire", "wildfires", "evacuation", "evacuations", "fire warning", "pg&e", "pge", "power outage",
                        "weather warning", "red flag", "wind advisory", "earthquake", "mudslide",
                        "drought",
                    ],
                ),
                cat(
                    "governance",
                    &[
                        "city council", "board of supervisors", "school board", "school district",
                        "ballot measure", "zoning", "planning commission", "town hall", "mayor",
                        "supervisor", "county", "ordinance", "municipal", "public hearing",
                        "budget", "tax measure",
                    ],
                ),
                cat(
                    "safety",
                    &[
                        "police", "fire department", "accident", "accidents", "crime", "shooting",
                        "shootings", "missing person", "amber alert", "arrest", "arrests",
                        "investigation",
                        "highway patrol", "chp", "sheriff",
                    ],
                ),
                cat(
                    "community_events",
                    &[
                        "festival", "festivals", "parade", "farmers market", "community meeting",
                        "town meeting", "marathon", "fun run", "block party",
                    ],
                ),
                cat(
                    "public_health",
                    &[
                        "hospital", "hospitals", "kaiser", "clinic", "clinics", "health department", "vaccination",
                        "covid", "public health",
                    ],
                ),
                cat(
                    "local_economy",
                    &[
                        "layoff", "layoffs", "closure", "closures", "shutdown", "strike",
                        "strikes",
                    ],
                ),
            ],
        }
    }
}

impl Default for ClaimRules {
    fn default() -> Self {
        Self {
            extraordinary: When::any_word_of(&[
                "declares war", "declared war", "coup", "assassinated", "assassination",
                "martial law", "nuclear strike", "nuclear attack", "invades", "invasion of",
                "dies at", "has died", "found dead", "resigns", "impeached", "state of emergency",
                "default on debt", "bank run", "market halted",
            ]),
        }
    }
}

// --- matching internals ---

/// Lowercase and collapse whitespace.
pub fn normalize(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.extend(ch.to_lowercase());
            last_space = false;
        }
    }
    out.trim().to_string()
}

/// Substring match; `text` is normalized, `pat` is normalized here.
pub fn contains(text: &str, pat: &str) -> bool {
    let p = normalize(pat);
    if p.is_empty() {
        return true;
    }
    text.contains(p.as_str())
}

/// Whole-word match: the phrase must not touch a letter or digit on either side.
pub fn contains_word(text: &str, pat: &str) -> bool {
    let p = normalize(pat);
    if p.is_empty() {
        return true;
    }
    let is_word = |c: Option<char>| c.is_some_and(char::is_alphanumeric);
    text.match_indices(p.as_str()).any(|(i, m)| {
        let before = text[..i].chars().next_back();
        let after = text[i + m.len()..].chars().next();
        !is_word(before) && !is_word(after)
    })
}

/// How many phrases of `list` appear in `text`, each counted once.
pub fn count_hits(text: &str, list: &[String], whole_word: bool) -> Vec<String> {
    list.iter()
        .filter(|p| {
            if whole_word {
                contains_word(text, p)
            } else {
                contains(text, p)
            }
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_dsl_combines_conditions() {
        let w = When {
            any_contains: Some(strings(&["rate cut", "rate hike"])),
            not_contains: Some(strings(&["opinion"])),
            min_len: Some(10),
            ..Default::default()
        };
        assert!(w.matches(&normalize("Fed signals   RATE CUT in June")));
        assert!(!w.matches(&normalize("Opinion: the rate cut is a mistake")));
        assert!(!w.matches("rate cut"));
    }

    #[test]
    fn word_matching_ignores_embedded_words() {
        assert!(contains_word("army stages coup in capital", "coup"));
        assert!(!contains_word("retailer doubles coupon value", "coup"));
        assert!(contains_word("coup.", "coup"));
    }

    #[test]
    fn claims_are_extraordinary_only_on_listed_patterns() {
        let rules = ClaimRules::default();
        let (sev, hit) = rules.assess("President declares martial law after protests");
        assert_eq!(sev, ClaimSeverity::Extraordinary);
        assert_eq!(hit.as_deref(), Some("martial law"));
        assert_eq!(
            rules.assess("Coupon startup raises Series A").0,
            ClaimSeverity::Ordinary
        );
    }

    #[test]
    fn local_allowlist_reports_category() {
        let list = LocalAllowlist::default();
        assert_eq!(
            list.category_for("BART delays expected through weekend"),
            Some("transit")
        );
        assert_eq!(
            list.category_for("Danville council approves new zoning rules"),
            Some("governance")
        );
        assert_eq!(list.category_for("Local chef opens new bistro"), None);
    }

    #[test]
    fn local_allowlist_needs_whole_words() {
        let list = LocalAllowlist::default();
        for headline in [
            "Bartender opens trailer park café",
            "Community garden celebrates its tenth year",
            "Pitcher records a strikeout record in exhibition game",
            "Design studio unveils its 2101 concept home",
            "Storming the charts: local band's debut",
        ] {
            assert_eq!(list.category_for(headline), None, "{headline}");
        }
        assert_eq!(
            list.category_for("Teachers strike as district talks stall"),
            Some("local_economy")
        );
        assert_eq!(list.category_for("Storms knock out power in Fremont"), Some("weather_hazard"));
        assert_eq!(list.category_for("Highway 101 lanes reopen"), Some("transit"));
    }

    #[test]
    fn partial_rule_file_keeps_other_tables() {
        let json = r#"{"scoring": {"source_boosts": [{"source": "example wire", "points": 9}]}}"#;
        let book: RuleBook = serde_json::from_str(json).unwrap();
        assert_eq!(book.scoring.source_boosts.len(), 1);
        assert_eq!(book.scoring.keywords.high_points, 10);
        assert_eq!(book.claims, ClaimRules::default());
        assert!(!book.local_allowlist.categories.is_empty());
    }
}
