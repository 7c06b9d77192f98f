//! Phase 1 audit artifact and the Phase 1 / Phase 2 barrier.
//!
//! One JSON file per run date, written once and never replaced:
//! temp file (`create_new`) → `fsync` → hard link to the final name → remove temp →
//! `.sha256` sidecar. The hard link fails if the final name exists, so a
//! previous run's artifact cannot be overwritten.
//!
//! [`PersistedPool`] can only be obtained from [`PersistedPool::persist`] or
//! [`PersistedPool::load`]; selection takes one by reference, which is how the
//! barrier is enforced.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::candidate::{Candidate, RejectCode, Section, Verdict};
use crate::chronology::ChronologyCheck;
use crate::dedup::DedupPlan;
use crate::error::{CurationError, Result};
use crate::fetch::FetchReport;
use crate::ledger::TallyReport;
use crate::sources::{AdapterFailure, RawDuplicate, SkippedRecord};

pub const PHASE1_PREFIX: &str = "phase1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChronologyEntry {
    pub candidate_id: String,
    pub check: ChronologyCheck,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub rejected: usize,
    /// Reject label → count.
    pub rejected_by_code: BTreeMap<String, usize>,
    pub superseded: usize,
    /// General Awareness publishers → representatives after cap resolution.
    pub ga_sources: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn of(candidates: &[Candidate]) -> Self {
        let mut s = Self {
            total: candidates.len(),
            ..Default::default()
        };
        for c in candidates {
            match c.verdict() {
                Some(Verdict::Pass) => {
                    s.passed += 1;
                    if c.section() == Some(Section::GeneralAwareness) {
                        *s.ga_sources.entry(c.publisher()).or_default() += 1;
                    }
                }
                Some(Verdict::Reject) => {
                    s.rejected += 1;
                    if let Some(r) = c.rejection() {
                        if r.code == RejectCode::Superseded {
                            s.superseded += 1;
                        }
                        *s.rejected_by_code.entry(r.code.label().to_string()).or_default() += 1;
                    }
                }
                None => {}
            }
        }
        s
    }
}

/// Everything Phase 1 decided, with the evidence for each decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase1Record {
    pub run_date: NaiveDate,
    pub now: DateTime<Utc>,
    #[serde(default)]
    pub reference_status_id: Option<u64>,
    pub summary: RunSummary,
    pub candidates: Vec<Candidate>,
    pub dedup: DedupPlan,
    pub tally: TallyReport,
    #[serde(default)]
    pub chronology: Vec<ChronologyEntry>,
    #[serde(default)]
    pub fetch_log: Vec<FetchReport>,
    #[serde(default)]
    pub raw_duplicates: Vec<RawDuplicate>,
    #[serde(default)]
    pub skipped: Vec<SkippedRecord>,
    #[serde(default)]
    pub adapter_failures: Vec<AdapterFailure>,
}

/// The frozen, digest-verified Phase 1 output.
#[derive(Debug, Clone)]
pub struct PersistedPool {
    path: PathBuf,
    digest: String,
    record: Phase1Record,
}

impl PersistedPool {
    /// Write the record for its run date. Every candidate must carry a verdict.
    pub fn persist(dir: &Path, record: Phase1Record) -> Result<Self> {
        if let Some(c) = record.candidates.iter().find(|c| !c.is_gated()) {
            return Err(CurationError::BarrierNotReached(format!(
                "candidate {} has no verdict",
                c.id()
            )));
        }
        fs::create_dir_all(dir).map_err(|e| CurationError::io(dir, e))?;
        let path = artifact_path(dir, PHASE1_PREFIX, record.run_date);
        let bytes = serde_json::to_vec_pretty(&record)?;
        let digest = write_once(&path, &bytes)?;
        info!(
            target: "phase1",
            path = %path.display(),
            passed = record.summary.passed,
            rejected = record.summary.rejected,
            "audit artifact persisted"
        );
        Ok(Self {
            path,
            digest,
            record,
        })
    }

    /// Read an artifact back, re-checking it against its `.sha256` sidecar.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| CurationError::io(path, e))?;
        let sidecar = sidecar_path(path);
        let expected = match fs::read_to_string(&sidecar) {
            Ok(s) => s.split_whitespace().next().unwrap_or_default().to_string(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CurationError::BarrierNotReached(format!(
                    "{} has no digest sidecar",
                    path.display()
                )))
            }
            Err(e) => return Err(CurationError::io(sidecar, e)),
        };
        let digest = sha256_hex(&bytes);
        if digest != expected {
            return Err(CurationError::BarrierNotReached(format!(
                "{} digest mismatch (expected {expected}, found {digest})",
                path.display()
            )));
        }
        let record: Phase1Record = serde_json::from_slice(&bytes)?;
        Ok(Self {
            path: path.to_path_buf(),
            digest,
            record,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn record(&self) -> &Phase1Record {
        &self.record
    }

    pub fn run_date(&self) -> NaiveDate {
        self.record.run_date
    }

    pub fn passed(&self) -> impl Iterator<Item = &Candidate> {
        self.record.candidates.iter().filter(|c| c.is_pass())
    }
}

/// `<dir>/<prefix>-YYYY-MM-DD.json`
pub fn artifact_path(dir: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!("{prefix}-{}.json", date.format("%Y-%m-%d")))
}

pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Durable write that refuses to replace an existing file. Returns the sha256 hex digest.
pub fn write_once(path: &Path, bytes: &[u8]) -> Result<String> {
    if path.exists() {
        return Err(CurationError::ArtifactExists(path.to_path_buf()));
    }
    let tmp = {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".tmp-{}", std::process::id()));
        PathBuf::from(name)
    };

    let write_tmp = || -> std::io::Result<()> {
        let mut f = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()
    };
    if let Err(e) = write_tmp() {
        let _ = fs::remove_file(&tmp);
        return Err(CurationError::io(&tmp, e));
    }

    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(CurationError::ArtifactExists(path.to_path_buf()))
        }
        Err(e) => return Err(CurationError::io(path, e)),
    }

    let digest = sha256_hex(bytes);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = sidecar_path(path);
    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&sidecar)
        .map_err(|e| CurationError::io(&sidecar, e))?;
    writeln!(f, "{digest}  {file_name}")
        .and_then(|_| f.sync_all())
        .map_err(|e| CurationError::io(&sidecar, e))?;
    sync_parent(path);
    Ok(digest)
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent() {
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
