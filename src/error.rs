//! Error taxonomy for the curation pipeline.
//!
//! Gate-level failures (fetch, date, corroboration, duplicates, caps, chronology)
//! are produced as values by the stage that detects them and resolve to a
//! REJECT through [`CurationError::rejection`]; an unknown tier resolves to a
//! CUT at selection. The run continues with a smaller pool. Only
//! [`CurationError::ReconciliationMismatch`] and [`CurationError::BarrierNotReached`]
//! are fatal: they block publication.

use std::path::PathBuf;

use crate::candidate::{RejectCode, Rejection};

/// Top-level error type for curation operations.
#[derive(Debug, thiserror::Error)]
pub enum CurationError {
    /// Page could not be fetched (timeout, block, dead link).
    #[error("fetch failure for {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    /// No strategy produced a publication instant.
    #[error("date extraction failed for {url}: {detail}")]
    DateExtractionFailure { url: String, detail: String },

    /// Extraordinary claim without enough independent high-trust sources.
    #[error("uncorroborated extraordinary claim: {found} of {required} high-trust sources")]
    UncorroboratedClaim { found: usize, required: usize },

    #[error("duplicate of {representative}")]
    DuplicateDetected { representative: String },

    #[error("unknown source tier: {source_name}")]
    TierUnknown { source_name: String },

    /// Distribution constraint violated and not resolved.
    #[error("distribution cap exceeded: {0}")]
    DistributionCapExceeded(String),

    /// Status id too far behind the reference, or no comparison possible.
    #[error("chronology check failed: {detail}")]
    ChronologyDeltaExceeded {
        delta: Option<i128>,
        threshold: u64,
        detail: String,
    },

    /// Fatal: selection does not account for every validated item.
    #[error("reconciliation mismatch: {0}")]
    ReconciliationMismatch(String),

    /// Fatal: selection attempted before the Phase 1 record was durable.
    #[error("persistence barrier not reached: {0}")]
    BarrierNotReached(String),

    /// A stage tried to rewrite a field owned by an earlier stage.
    #[error("stage violation on candidate {candidate}: {message}")]
    StageViolation { candidate: String, message: String },

    /// A prior artifact exists for this date; runs never overwrite.
    #[error("artifact already exists: {0:?}")]
    ArtifactExists(PathBuf),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CurationError>;

impl CurationError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn stage(candidate: &str, message: impl Into<String>) -> Self {
        Self::StageViolation {
            candidate: candidate.to_string(),
            message: message.into(),
        }
    }

    /// The REJECT a recoverable failure resolves to. `None` for run-level errors.
    pub fn rejection(&self) -> Option<Rejection> {
        let (code, detail) = match self {
            Self::FetchFailure { reason, .. } => (RejectCode::FetchFailed, reason.clone()),
            Self::DateExtractionFailure { detail, .. } => {
                (RejectCode::NoExtractableDate, detail.clone())
            }
            Self::UncorroboratedClaim { found, required } => (
                RejectCode::UncorroboratedClaim,
                format!("{found} of {required} independent Tier 1/2 sources"),
            ),
            Self::DuplicateDetected { representative } => {
                (RejectCode::Superseded, representative.clone())
            }
            Self::DistributionCapExceeded(detail) => {
                (RejectCode::DistributionCapExceeded, detail.clone())
            }
            Self::ChronologyDeltaExceeded {
                delta,
                threshold,
                detail,
            } => (
                RejectCode::ChronologyDeltaExceeded,
                match delta {
                    Some(d) => format!("{d} > {threshold}"),
                    None => detail.clone(),
                },
            ),
            _ => return None,
        };
        Some(Rejection::new(code).with_detail(detail))
    }

    /// Fatal conditions halt publication instead of degrading the output.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReconciliationMismatch(_) | Self::BarrierNotReached(_)
        )
    }
}
