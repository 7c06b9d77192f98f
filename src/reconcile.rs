//! Reconciliation between the persisted pool and a selection.
//!
//! Proves nothing was silently added or dropped: every PASS id has exactly one
//! decision, no decision names an id the pool does not hold as PASS, numbering
//! is 1..N without gaps, URLs are unique, every CUT says why. Any mismatch is
//! fatal for publication.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::audit::{artifact_path, write_once, PersistedPool};
use crate::candidate::normalize_url;
use crate::error::{CurationError, Result};
use crate::selector::{Decision, Selection};

pub const RECONCILIATION_PREFIX: &str = "reconciliation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_date: NaiveDate,
    pub pool_digest: String,
    pub passed: bool,
    pub pass_count: usize,
    pub include_count: usize,
    pub cut_count: usize,
    pub mismatches: Vec<String>,
}

impl ReconciliationReport {
    /// `Err(ReconciliationMismatch)` when any check failed.
    pub fn into_result(self) -> Result<Self> {
        if self.passed {
            Ok(self)
        } else {
            Err(CurationError::ReconciliationMismatch(self.mismatches.join("; ")))
        }
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| CurationError::io(dir, e))?;
        let path = artifact_path(dir, RECONCILIATION_PREFIX, self.run_date);
        write_once(&path, &serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

pub fn reconcile(pool: &PersistedPool, selection: &Selection) -> ReconciliationReport {
    let mut mismatches = Vec::new();

    if selection.pool_digest != pool.digest() {
        mismatches.push(format!(
            "selection was computed from pool {} but checked against {}",
            selection.pool_digest,
            pool.digest()
        ));
    }

    let pass_ids: BTreeSet<&str> = pool.passed().map(|c| c.id()).collect();
    let all_ids: BTreeSet<&str> = pool.record().candidates.iter().map(|c| c.id()).collect();

    let mut per_id: BTreeMap<&str, usize> = BTreeMap::new();
    for d in &selection.decisions {
        *per_id.entry(d.candidate_id.as_str()).or_default() += 1;
    }
    for (id, n) in &per_id {
        if *n > 1 {
            mismatches.push(format!("{id} has {n} decisions"));
        }
        if !all_ids.contains(id) {
            mismatches.push(format!("{id} is not in the persisted record"));
        } else if !pass_ids.contains(id) {
            mismatches.push(format!("{id} was not PASS but received a decision"));
        }
    }
    for id in &pass_ids {
        if !per_id.contains_key(id) {
            mismatches.push(format!("PASS candidate {id} has no decision"));
        }
    }

    let include_count = selection
        .decisions
        .iter()
        .filter(|d| d.decision == Decision::Include)
        .count();
    let cut_count = selection
        .decisions
        .iter()
        .filter(|d| d.decision == Decision::Cut)
        .count();
    if pass_ids.len() != include_count + cut_count {
        mismatches.push(format!(
            "|PASS| {} != |INCLUDE| {include_count} + |CUT| {cut_count}",
            pass_ids.len()
        ));
    }

    for d in selection.decisions.iter().filter(|d| d.decision == Decision::Cut) {
        if d.cut_reason.as_deref().map_or(true, |r| r.trim().is_empty()) {
            mismatches.push(format!("CUT {} has no reason", d.candidate_id));
        }
    }

    if selection.items.len() != include_count {
        mismatches.push(format!(
            "{} output items but {include_count} INCLUDE decisions",
            selection.items.len()
        ));
    }
    for (i, item) in selection.items.iter().enumerate() {
        let expected = i as u32 + 1;
        if item.sequence_number != expected {
            mismatches.push(format!(
                "item {} numbered {} (expected {expected})",
                item.candidate_id, item.sequence_number
            ));
        }
        let numbered = selection.decisions.iter().any(|d| {
            d.candidate_id == item.candidate_id
                && d.decision == Decision::Include
                && d.sequence_number == Some(item.sequence_number)
        });
        if !numbered {
            mismatches.push(format!(
                "item {} has no matching INCLUDE decision",
                item.candidate_id
            ));
        }
    }

    let mut urls = BTreeSet::new();
    for item in &selection.items {
        if !urls.insert(normalize_url(&item.url)) {
            mismatches.push(format!("url {} appears more than once", item.url));
        }
    }

    let passed = mismatches.is_empty();
    if passed {
        info!(
            target: "phase2",
            pass = pass_ids.len(),
            include = include_count,
            cut = cut_count,
            "reconciliation passed"
        );
    } else {
        error!(target: "phase2", mismatches = mismatches.len(), "reconciliation failed");
    }

    ReconciliationReport {
        run_date: selection.run_date,
        pool_digest: pool.digest().to_string(),
        passed,
        pass_count: pass_ids.len(),
        include_count,
        cut_count,
        mismatches,
    }
}
