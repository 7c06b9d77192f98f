// src/lib.rs
// Public library surface for the CLI and integration tests.

pub mod audit;
pub mod candidate;
pub mod chronology;
pub mod config;
pub mod date_resolver;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod ledger;
pub mod metrics;
pub mod regions;
pub mod rules;
pub mod tiers;

// Phase 2
pub mod reconcile;
pub mod scoring;
pub mod selector;

pub mod pipeline;
pub mod sources;

// ---- Re-exports for stable public API ----
pub use crate::audit::PersistedPool;
pub use crate::candidate::{Candidate, RawCandidate, RejectCode, Section, SourceTier};
pub use crate::config::CuratorConfig;
pub use crate::error::{CurationError, Result};
pub use crate::pipeline::{Curator, RunContext, RunOutcome};
