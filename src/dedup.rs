//! Story clustering for PASS candidates.
//!
//! Two headlines are the same story when any of these hold:
//! - Jaccard overlap of significant words >= 0.40
//! - >= 3 shared words covering >= 55% of the shorter headline
//! - normalized Levenshtein >= 0.90 (`strsim`)
//! - >= 2 shared subject entities plus at least one further shared word
//!
//! Clustering is single-link over those pairs. Each cluster keeps one
//! representative; the rest are superseded. Work happens in two steps so cap
//! resolution can still swap representatives before anything is rejected:
//! [`plan`] builds clusters, [`apply`] writes the outcome onto candidates.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

use crate::candidate::{Candidate, Stage};
use crate::error::{CurationError, Result};

pub const JACCARD_MIN: f64 = 0.40;
pub const COVERAGE_MIN: f64 = 0.55;
pub const COVERAGE_MIN_SHARED: usize = 3;
pub const LEVENSHTEIN_MIN: f64 = 0.90;
pub const ENTITY_MIN_SHARED: usize = 2;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "is", "are",
    "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did", "will",
    "would", "could", "should", "may", "can", "with", "from", "by", "as", "its", "it", "this",
    "that", "than", "not", "no", "so", "up", "out", "if", "about", "into", "over", "after",
    "new", "more", "also", "how", "what", "when", "who", "why", "all", "just", "says", "said",
    "report", "reports", "according", "per", "via", "your", "their", "our", "his", "her",
    "you", "they", "them",
];

const BRAND_ALIASES: &[(&str, &str)] = &[
    ("facebook", "meta"),
    ("instagram", "meta"),
    ("whatsapp", "meta"),
    ("google", "alphabet"),
    ("youtube", "alphabet"),
    ("deepmind", "alphabet"),
    ("chatgpt", "openai"),
    ("gpt", "openai"),
    ("dalle", "openai"),
    ("claude", "anthropic"),
    ("bing", "microsoft"),
    ("github", "microsoft"),
    ("copilot", "microsoft"),
    ("alexa", "amazon"),
    ("aws", "amazon"),
];

fn word_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9]+").unwrap())
}

fn entity_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:[A-Z][a-z0-9]+(?:\s+[A-Z][a-z0-9]+)+|[A-Z][A-Z0-9]{1,})\b").unwrap()
    })
}

fn stem(w: &str) -> String {
    let n = w.len();
    if w.ends_with("ated") && n > 5 {
        w[..n - 1].to_string()
    } else if w.ends_with("ied") && n > 4 {
        format!("{}y", &w[..n - 3])
    } else if w.ends_with("ing") && n > 5 {
        w[..n - 3].to_string()
    } else if w.ends_with("ed") && n > 4 {
        w[..n - 2].to_string()
    } else if w.ends_with("ies") && n > 4 {
        format!("{}y", &w[..n - 3])
    } else if w.ends_with("es") && n > 4 {
        w[..n - 2].to_string()
    } else if w.ends_with('s') && !w.ends_with("ss") && n > 3 {
        w[..n - 1].to_string()
    } else {
        w.to_string()
    }
}

fn alias(w: String) -> String {
    BRAND_ALIASES
        .iter()
        .find(|(from, _)| *from == w)
        .map(|(_, to)| to.to_string())
        .unwrap_or(w)
}

/// Lowercased, stop-word-free, suffix-stripped, brand-folded word set.
pub fn significant_words(headline: &str) -> BTreeSet<String> {
    let lower = headline.to_lowercase().replace("dall-e", "dalle");
    word_re()
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(|w| alias(stem(w)))
        .collect()
}

/// Capitalized multi-word names and acronyms, lowercased.
pub fn subject_entities(headline: &str) -> BTreeSet<String> {
    entity_re()
        .find_iter(headline)
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .collect()
}

/// Every number used in a duplicate decision, kept for the audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Similarity {
    pub jaccard: f64,
    pub shared_words: usize,
    pub coverage: f64,
    pub levenshtein: f64,
    pub shared_entities: usize,
    /// First rule that matched, if any.
    pub rule: Option<String>,
}

impl Similarity {
    pub fn is_duplicate(&self) -> bool {
        self.rule.is_some()
    }
}

pub fn similarity(a: &str, b: &str) -> Similarity {
    let wa = significant_words(a);
    let wb = significant_words(b);
    let shared: BTreeSet<&String> = wa.intersection(&wb).collect();
    let union = wa.union(&wb).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        shared.len() as f64 / union as f64
    };
    let shorter = wa.len().min(wb.len());
    let coverage = if shorter == 0 {
        0.0
    } else {
        shared.len() as f64 / shorter as f64
    };
    let levenshtein = normalized_levenshtein(&flatten(a), &flatten(b));

    let ea = subject_entities(a);
    let eb = subject_entities(b);
    let shared_entities: Vec<&String> = ea.intersection(&eb).collect();
    let entity_words: BTreeSet<String> = shared_entities
        .iter()
        .flat_map(|e| significant_words(e))
        .collect();
    let further = shared.iter().filter(|w| !entity_words.contains(**w)).count();

    let rule = if wa.is_empty() || wb.is_empty() {
        (levenshtein >= LEVENSHTEIN_MIN).then(|| "levenshtein".to_string())
    } else if jaccard >= JACCARD_MIN {
        Some("jaccard".to_string())
    } else if shared.len() >= COVERAGE_MIN_SHARED && coverage >= COVERAGE_MIN {
        Some("coverage".to_string())
    } else if levenshtein >= LEVENSHTEIN_MIN {
        Some("levenshtein".to_string())
    } else if shared_entities.len() >= ENTITY_MIN_SHARED && further >= 1 {
        Some("entities".to_string())
    } else {
        None
    };

    Similarity {
        jaccard,
        shared_words: shared.len(),
        coverage,
        levenshtein,
        shared_entities: shared_entities.len(),
        rule,
    }
}

pub fn same_story(a: &str, b: &str) -> bool {
    similarity(a, b).is_duplicate()
}

fn flatten(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairEvidence {
    pub a: String,
    pub b: String,
    pub similarity: Similarity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    /// Best first, by tier, specificity, freshness, then id.
    pub members: Vec<String>,
    pub representative: String,
    #[serde(default)]
    pub evidence: Vec<PairEvidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupPlan {
    pub clusters: Vec<Cluster>,
    /// Representatives removed by cap resolution, with the reason text.
    #[serde(default)]
    pub dropped: BTreeMap<String, String>,
}

impl DedupPlan {
    /// Current representatives that have not been dropped.
    pub fn representatives(&self) -> impl Iterator<Item = &str> {
        self.clusters
            .iter()
            .map(|c| c.representative.as_str())
            .filter(|id| !self.dropped.contains_key(*id))
    }

    pub fn cluster_of(&self, candidate_id: &str) -> Option<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.members.iter().any(|m| m == candidate_id))
    }

    /// Promote another member of the same cluster to representative.
    pub fn swap(&mut self, cluster_id: &str, new_rep: &str) -> bool {
        match self.clusters.iter_mut().find(|c| c.id == cluster_id) {
            Some(c) if c.members.iter().any(|m| m == new_rep) => {
                c.representative = new_rep.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn drop_representative(&mut self, id: &str, reason: impl Into<String>) {
        self.dropped.insert(id.to_string(), reason.into());
    }
}

/// Cluster every PASS candidate, articles and social posts separately.
/// Deterministic for a given candidate set.
pub fn plan(candidates: &[Candidate]) -> DedupPlan {
    let mut pass: Vec<&Candidate> = candidates.iter().filter(|c| c.is_pass()).collect();
    pass.sort_by(|a, b| a.id().cmp(b.id()));

    let n = pass.len();
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(p: &mut [usize], mut i: usize) -> usize {
        while p[i] != i {
            p[i] = p[p[i]];
            i = p[i];
        }
        i
    }

    let mut evidence: Vec<(usize, usize, Similarity)> = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            // posts and articles never supersede each other
            if pass[i].kind() != pass[j].kind() {
                continue;
            }
            let s = similarity(pass[i].headline(), pass[j].headline());
            if s.is_duplicate() {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[ri.max(rj)] = ri.min(rj);
                }
                evidence.push((i, j, s));
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }

    let mut ev_by_root: HashMap<usize, Vec<PairEvidence>> = HashMap::new();
    for (i, j, s) in evidence {
        let root = find(&mut parent, i);
        ev_by_root.entry(root).or_default().push(PairEvidence {
            a: pass[i].id().to_string(),
            b: pass[j].id().to_string(),
            similarity: s,
        });
    }

    let clusters = groups
        .into_iter()
        .map(|(root, idxs)| {
            let mut members: Vec<&Candidate> = idxs.iter().map(|&i| pass[i]).collect();
            members.sort_by_key(|c| representative_key(c));
            let representative = members[0].id().to_string();
            Cluster {
                id: format!("cluster-{}", pass[root].id()),
                members: members.iter().map(|c| c.id().to_string()).collect(),
                representative,
                evidence: ev_by_root.remove(&root).unwrap_or_default(),
            }
        })
        .collect();

    DedupPlan {
        clusters,
        dropped: BTreeMap::new(),
    }
}

fn representative_key(c: &Candidate) -> (u8, Reverse<usize>, u32, String) {
    (
        c.source_tier().rank(),
        Reverse(significant_words(c.headline()).len()),
        c.age_hours().unwrap_or(u32::MAX),
        c.id().to_string(),
    )
}

/// Write the plan onto the candidates: cluster ids for every member, non-representatives
/// superseded, dropped representatives rejected. Returns the number superseded.
pub fn apply(plan: &DedupPlan, candidates: &mut [Candidate]) -> Result<usize> {
    let index: HashMap<String, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id().to_string(), i))
        .collect();

    let mut superseded = 0usize;
    for cluster in &plan.clusters {
        for member in &cluster.members {
            let Some(&i) = index.get(member) else { continue };
            let c = &mut candidates[i];
            c.set_cluster(cluster.id.clone())?;
            if *member == cluster.representative {
                if let Some(reason) = plan.dropped.get(member) {
                    c.reject_with(
                        Stage::Tally,
                        CurationError::DistributionCapExceeded(reason.clone()),
                    )?;
                } else if cluster.members.len() > 1 {
                    c.note(
                        Stage::Dedup,
                        format!(
                            "representative of {} ({} members)",
                            cluster.id,
                            cluster.members.len()
                        ),
                    );
                }
            } else {
                c.supersede(&cluster.representative)?;
                superseded += 1;
            }
        }
    }
    Ok(superseded)
}
