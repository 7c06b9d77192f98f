//! Distribution tally over cluster representatives.
//!
//! The ledger is a plain value: built from the candidates and the dedup plan,
//! passed to whoever needs it, and snapshotted into the audit record. Caps that
//! are exceeded become [`DistributionViolation`]s; [`resolve`] clears hard ones
//! with logged [`ResolutionAction`]s and leaves under-minimum ones outstanding.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::candidate::{Candidate, Section};
use crate::config::DistributionConfig;
use crate::dedup::DedupPlan;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionLedger {
    /// section → publisher → representative ids
    pub per_source: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// GeneralAwareness only: region → representative ids
    pub per_region: BTreeMap<String, Vec<String>>,
    pub per_section: BTreeMap<String, usize>,
    /// SocialHighlight only: topic cluster → representative ids
    pub per_topic: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistributionViolation {
    SourceCap {
        section: Section,
        source: String,
        count: usize,
        cap: usize,
        members: Vec<String>,
    },
    RegionCap {
        region: String,
        count: usize,
        cap: usize,
        members: Vec<String>,
    },
    TopicCap {
        cluster: String,
        count: usize,
        cap: usize,
        members: Vec<String>,
    },
    MinDistinctSources {
        section: Section,
        distinct: usize,
        required: usize,
    },
    MinRegions {
        distinct: usize,
        required: usize,
    },
}

impl DistributionViolation {
    /// Hard violations must be resolved before selection may run.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            DistributionViolation::SourceCap { .. }
                | DistributionViolation::RegionCap { .. }
                | DistributionViolation::TopicCap { .. }
        )
    }

    pub fn describe(&self) -> String {
        match self {
            DistributionViolation::SourceCap {
                section,
                source,
                count,
                cap,
                ..
            } => format!("{section}: '{source}' has {count} items (cap {cap})"),
            DistributionViolation::RegionCap {
                region, count, cap, ..
            } => format!("general_awareness: region {region} has {count} items (cap {cap})"),
            DistributionViolation::TopicCap {
                cluster, count, cap, ..
            } => format!("social_highlight: topic {cluster} has {count} items (cap {cap})"),
            DistributionViolation::MinDistinctSources {
                section,
                distinct,
                required,
            } => format!("{section}: {distinct} distinct sources (minimum {required})"),
            DistributionViolation::MinRegions { distinct, required } => {
                format!("general_awareness: {distinct} distinct regions (minimum {required})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Another outlet's member of the same cluster becomes representative.
    Swap {
        cluster: String,
        removed: String,
        promoted: String,
        reason: String,
    },
    Drop {
        candidate: String,
        reason: String,
    },
}

/// Soft-cap notices; recorded, never enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftCapWarning {
    pub section: Section,
    pub source: String,
    pub count: usize,
    pub soft_cap: usize,
}

impl DistributionLedger {
    pub fn tally(plan: &DedupPlan, candidates: &[Candidate]) -> Self {
        let by_id: HashMap<&str, &Candidate> = candidates.iter().map(|c| (c.id(), c)).collect();
        let mut ledger = Self::default();
        for rep in plan.representatives() {
            let Some(c) = by_id.get(rep) else { continue };
            let Some(section) = c.section() else { continue };
            ledger
                .per_source
                .entry(section.to_string())
                .or_default()
                .entry(c.publisher())
                .or_default()
                .push(rep.to_string());
            *ledger.per_section.entry(section.to_string()).or_default() += 1;
            match section {
                Section::GeneralAwareness => {
                    if let Some(r) = c.region() {
                        ledger
                            .per_region
                            .entry(r.to_string())
                            .or_default()
                            .push(rep.to_string());
                    }
                }
                Section::SocialHighlight => {
                    let topic = c.cluster_id().map(str::to_string).unwrap_or_else(|| {
                        plan.cluster_of(rep)
                            .map(|cl| cl.id.clone())
                            .unwrap_or_else(|| rep.to_string())
                    });
                    ledger
                        .per_topic
                        .entry(topic)
                        .or_default()
                        .push(rep.to_string());
                }
                _ => {}
            }
        }
        ledger
    }

    pub fn source_count(&self, section: Section, publisher: &str) -> usize {
        self.per_source
            .get(section.as_str())
            .and_then(|m| m.get(publisher))
            .map_or(0, Vec::len)
    }

    pub fn region_count(&self, region: &str) -> usize {
        self.per_region.get(region).map_or(0, Vec::len)
    }

    pub fn distinct_sources(&self, section: Section) -> usize {
        self.per_source.get(section.as_str()).map_or(0, BTreeMap::len)
    }

    /// Hard violations first (in a fixed order), then under-minimum ones.
    pub fn violations(&self, cfg: &DistributionConfig) -> Vec<DistributionViolation> {
        let mut out = Vec::new();
        for section in Section::ORDER {
            if let Some(sources) = self.per_source.get(section.as_str()) {
                for (source, members) in sources {
                    if members.len() > cfg.hard_source_cap {
                        out.push(DistributionViolation::SourceCap {
                            section,
                            source: source.clone(),
                            count: members.len(),
                            cap: cfg.hard_source_cap,
                            members: members.clone(),
                        });
                    }
                }
            }
        }
        for (region, members) in &self.per_region {
            if members.len() > cfg.ga_max_per_region {
                out.push(DistributionViolation::RegionCap {
                    region: region.clone(),
                    count: members.len(),
                    cap: cfg.ga_max_per_region,
                    members: members.clone(),
                });
            }
        }
        for (cluster, members) in &self.per_topic {
            if members.len() > cfg.social_topic_cap {
                out.push(DistributionViolation::TopicCap {
                    cluster: cluster.clone(),
                    count: members.len(),
                    cap: cfg.social_topic_cap,
                    members: members.clone(),
                });
            }
        }
        for section in Section::ORDER {
            let items = self.per_section.get(section.as_str()).copied().unwrap_or(0);
            let required = cfg.min_sources_for(section);
            let distinct = self.distinct_sources(section);
            if items > 0 && distinct < required {
                out.push(DistributionViolation::MinDistinctSources {
                    section,
                    distinct,
                    required,
                });
            }
        }
        let ga_items = self
            .per_section
            .get(Section::GeneralAwareness.as_str())
            .copied()
            .unwrap_or(0);
        if ga_items > 0 && self.per_region.len() < cfg.ga_min_regions {
            out.push(DistributionViolation::MinRegions {
                distinct: self.per_region.len(),
                required: cfg.ga_min_regions,
            });
        }
        out
    }

    pub fn soft_cap_warnings(&self, cfg: &DistributionConfig) -> Vec<SoftCapWarning> {
        let mut out = Vec::new();
        for section in Section::ORDER {
            if let Some(sources) = self.per_source.get(section.as_str()) {
                for (source, members) in sources {
                    if members.len() > cfg.soft_source_cap && members.len() <= cfg.hard_source_cap {
                        out.push(SoftCapWarning {
                            section,
                            source: source.clone(),
                            count: members.len(),
                            soft_cap: cfg.soft_source_cap,
                        });
                    }
                }
            }
        }
        out
    }
}

/// Everything the tally stage did, for the audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyReport {
    pub before: DistributionLedger,
    pub violations: Vec<DistributionViolation>,
    pub actions: Vec<ResolutionAction>,
    pub after: DistributionLedger,
    /// Left after resolution: under-minimum notices, or hard caps that could not be cleared.
    pub outstanding: Vec<DistributionViolation>,
    pub warnings: Vec<SoftCapWarning>,
}

impl TallyReport {
    pub fn unresolved_hard(&self) -> Vec<&DistributionViolation> {
        self.outstanding.iter().filter(|v| v.is_hard()).collect()
    }
}

/// Clear hard violations by editing the plan (swap first, drop otherwise).
/// The plan is not yet applied to candidates, so nothing here turns a REJECT into a PASS.
pub fn resolve(
    plan: &mut DedupPlan,
    candidates: &[Candidate],
    cfg: &DistributionConfig,
) -> TallyReport {
    let by_id: HashMap<&str, &Candidate> = candidates.iter().map(|c| (c.id(), c)).collect();
    let before = DistributionLedger::tally(plan, candidates);
    let violations = before.violations(cfg);
    let mut actions = Vec::new();

    // Every pass removes at least one representative, so this is bounded.
    let max_rounds = candidates.len() + 1;
    for _ in 0..max_rounds {
        let ledger = DistributionLedger::tally(plan, candidates);
        let Some(v) = ledger.violations(cfg).into_iter().find(|v| v.is_hard()) else {
            break;
        };
        let reason = v.describe();
        let (members, cap) = match &v {
            DistributionViolation::SourceCap { members, cap, .. }
            | DistributionViolation::RegionCap { members, cap, .. }
            | DistributionViolation::TopicCap { members, cap, .. } => (members.clone(), *cap),
            _ => break,
        };

        // Weakest representative goes first: worst tier, least specific, oldest, highest id.
        let mut ordered: Vec<&Candidate> = members
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect();
        ordered.sort_by_key(|c| {
            (
                c.source_tier().rank(),
                std::cmp::Reverse(crate::dedup::significant_words(c.headline()).len()),
                c.age_hours().unwrap_or(u32::MAX),
                c.id().to_string(),
            )
        });
        if ordered.len() <= cap {
            break;
        }
        let Some(victim) = ordered.last().copied() else {
            break;
        };

        let swap_to = find_swap(plan, &ledger, &by_id, victim, &v, cfg);
        match swap_to {
            Some((cluster, promoted)) => {
                info!(target: "phase1", cluster = %cluster, removed = %victim.id(), promoted = %promoted, %reason, "cap resolution: swap");
                plan.swap(&cluster, &promoted);
                actions.push(ResolutionAction::Swap {
                    cluster,
                    removed: victim.id().to_string(),
                    promoted,
                    reason,
                });
            }
            None => {
                info!(target: "phase1", candidate = %victim.id(), %reason, "cap resolution: drop");
                plan.drop_representative(victim.id(), reason.clone());
                actions.push(ResolutionAction::Drop {
                    candidate: victim.id().to_string(),
                    reason,
                });
            }
        }
    }

    let after = DistributionLedger::tally(plan, candidates);
    let outstanding = after.violations(cfg);
    for v in outstanding.iter().filter(|v| v.is_hard()) {
        warn!(target: "phase1", violation = %v.describe(), "unresolved distribution violation");
    }
    let warnings = after.soft_cap_warnings(cfg);

    TallyReport {
        before,
        violations,
        actions,
        after,
        outstanding,
        warnings,
    }
}

/// A same-cluster, same-section member from another outlet that does not itself
/// break the violated cap.
fn find_swap(
    plan: &DedupPlan,
    ledger: &DistributionLedger,
    by_id: &HashMap<&str, &Candidate>,
    victim: &Candidate,
    violation: &DistributionViolation,
    cfg: &DistributionConfig,
) -> Option<(String, String)> {
    if matches!(violation, DistributionViolation::TopicCap { .. }) {
        return None;
    }
    let cluster = plan.cluster_of(victim.id())?;
    let section = victim.section()?;
    let taken: BTreeSet<&str> = plan.representatives().collect();
    cluster
        .members
        .iter()
        .filter(|m| m.as_str() != victim.id() && !taken.contains(m.as_str()))
        .filter_map(|m| by_id.get(m.as_str()).copied())
        .filter(|alt| alt.section() == Some(section) && alt.publisher() != victim.publisher())
        .find(|alt| {
            if ledger.source_count(section, &alt.publisher()) >= cfg.hard_source_cap {
                return false;
            }
            match violation {
                DistributionViolation::RegionCap { region, .. } => alt
                    .region()
                    .is_some_and(|r| r != region && ledger.region_count(r) < cfg.ga_max_per_region),
                _ => true,
            }
        })
        .map(|alt| (cluster.id.clone(), alt.id().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{CandidateKind, DateMethod, RawCandidate, RejectCode};
    use crate::dedup;
    use crate::fetch::FetchOutcome;
    use crate::tiers::{intended_section, TierTable};
    use chrono::{TimeZone, Utc};

    fn passed(headline: &str, source: &str, url: &str) -> Candidate {
        let raw = RawCandidate {
            headline: headline.into(),
            url: url.into(),
            source: source.into(),
            kind: CandidateKind::Article,
            raw_content: None,
            raw_text: None,
            search_date: None,
            status_id: None,
            handle: None,
        };
        let mut c = Candidate::from_raw(&raw);
        let info = TierTable::default_seed().classify(source, Some(url));
        c.set_classification(&info, intended_section(c.kind(), &info))
            .unwrap();
        c.set_verified_date(
            Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap(),
            DateMethod::MetaTag,
        )
        .unwrap();
        c.set_age_hours(20).unwrap();
        c.set_fetch(FetchOutcome::Success {
            status: 200,
            final_url: url.into(),
        })
        .unwrap();
        c.pass().unwrap();
        c
    }

    fn cfg() -> DistributionConfig {
        DistributionConfig::default()
    }

    #[test]
    fn five_stories_from_one_publisher_exceed_the_cap() {
        let heads = [
            "Fed holds interest rates steady",
            "Wildfire forces evacuations near Napa",
            "Senate passes farm bill",
            "Apple unveils foldable phone",
            "Storm knocks out power across Midwest",
        ];
        let mut cands: Vec<Candidate> = heads
            .iter()
            .enumerate()
            .map(|(i, h)| passed(h, "Reuters", &format!("https://www.reuters.com/a/{i}")))
            .collect();
        let mut plan = dedup::plan(&cands);
        let ledger = DistributionLedger::tally(&plan, &cands);
        let v = ledger.violations(&cfg());
        assert!(v.iter().any(|v| matches!(
            v,
            DistributionViolation::SourceCap { count: 5, cap: 3, .. }
        )));

        let report = resolve(&mut plan, &cands, &cfg());
        let drops = report
            .actions
            .iter()
            .filter(|a| matches!(a, ResolutionAction::Drop { .. }))
            .count();
        assert_eq!(drops, 2);
        assert!(report.unresolved_hard().is_empty());
        assert_eq!(report.after.source_count(Section::GeneralAwareness, "reuters"), 3);

        dedup::apply(&plan, &mut cands).unwrap();
        let capped = cands
            .iter()
            .filter(|c| {
                c.rejection().map(|r| r.code) == Some(RejectCode::DistributionCapExceeded)
            })
            .count();
        assert_eq!(capped, 2);
    }

    #[test]
    fn swap_prefers_another_outlet_in_the_same_cluster() {
        let mut cands = vec![
            passed("Fed holds interest rates steady through spring", "Reuters", "https://www.reuters.com/a/1"),
            passed("Senate passes sweeping farm bill after long delay", "Reuters", "https://www.reuters.com/a/2"),
            passed("Apple unveils foldable phone at spring event", "Reuters", "https://www.reuters.com/a/3"),
            passed("Napa wildfire evacuations", "Reuters", "https://www.reuters.com/a/4"),
            passed("Napa wildfire forces evacuations", "CNN", "https://www.cnn.com/a/5"),
        ];
        let mut plan = dedup::plan(&cands);
        // Reuters outranks CNN, so it represents the wildfire cluster and holds four slots.
        assert_eq!(
            DistributionLedger::tally(&plan, &cands).source_count(Section::GeneralAwareness, "reuters"),
            4
        );
        let report = resolve(&mut plan, &cands, &cfg());
        assert!(report
            .actions
            .iter()
            .any(|a| matches!(a, ResolutionAction::Swap { .. })));
        assert!(report.unresolved_hard().is_empty());
        dedup::apply(&plan, &mut cands).unwrap();
        let cnn = cands.iter().find(|c| c.source() == "CNN").unwrap();
        assert!(cnn.is_pass());
        let reuters_fire = cands.iter().find(|c| c.url().ends_with("/a/4")).unwrap();
        assert_eq!(
            reuters_fire.rejection().map(|r| r.code),
            Some(RejectCode::Superseded)
        );
    }

    #[test]
    fn thin_pool_is_an_outstanding_notice_not_a_hard_violation() {
        let cands = vec![passed(
            "Fed holds interest rates steady",
            "Reuters",
            "https://www.reuters.com/a/1",
        )];
        let mut plan = dedup::plan(&cands);
        let report = resolve(&mut plan, &cands, &cfg());
        assert!(report.actions.is_empty());
        assert!(report
            .outstanding
            .iter()
            .any(|v| matches!(v, DistributionViolation::MinDistinctSources { .. })));
        assert!(report.unresolved_hard().is_empty());
    }
}
