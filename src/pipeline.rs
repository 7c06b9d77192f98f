//! Run orchestration: Phase 1 → persistence barrier → Phase 2.
//!
//! Phase 1 turns adapter output into gated candidates and persists them.
//! Phase 2 only ever sees the [`PersistedPool`] that came back from disk.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use metrics::{counter, gauge};
use tracing::{debug, info, warn};

use crate::audit::{ChronologyEntry, Phase1Record, PersistedPool, RunSummary};
use crate::candidate::{
    Candidate, CandidateKind, ClaimSeverity, RawCandidate, RejectCode, Stage,
};
use crate::chronology::{self, is_reference_account};
use crate::config::CuratorConfig;
use crate::date_resolver::{self, DateSources};
use crate::dedup;
use crate::error::Result;
use crate::fetch::{CorroborationJob, FetchJob, FetchPool, FetchReport};
use crate::gate::{self, Corroboration, GateInput, GatePolicy};
use crate::ledger;
use crate::metrics::ensure_metrics_described;
use crate::reconcile::{reconcile, ReconciliationReport};
use crate::regions;
use crate::rules::RuleBook;
use crate::selector::{select, Selection};
use crate::sources::{self, SourceAdapter};
use crate::tiers::{intended_section, TierTable};

/// Inputs fixed for the whole run. Nothing downstream reads the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    pub run_date: NaiveDate,
    pub now: DateTime<Utc>,
    /// Same-day reference post id. When absent it is derived from reference-account posts in the pool.
    pub reference_status_id: Option<u64>,
}

impl RunContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            run_date: now.date_naive(),
            now,
            reference_status_id: None,
        }
    }

    pub fn with_run_date(mut self, date: NaiveDate) -> Self {
        self.run_date = date;
        self
    }

    pub fn with_reference(mut self, status_id: Option<u64>) -> Self {
        self.reference_status_id = status_id;
        self
    }
}

/// Artifacts of one complete run.
#[derive(Debug)]
pub struct RunOutcome {
    pub pool: PersistedPool,
    pub selection: Selection,
    pub selection_path: PathBuf,
    pub report: ReconciliationReport,
    pub report_path: PathBuf,
}

pub struct Curator {
    cfg: CuratorConfig,
    tiers: TierTable,
    rules: RuleBook,
    fetch: FetchPool,
}

impl Curator {
    pub fn new(cfg: CuratorConfig, tiers: TierTable, rules: RuleBook, fetch: FetchPool) -> Self {
        ensure_metrics_described();
        Self {
            cfg,
            tiers,
            rules,
            fetch,
        }
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.cfg
    }

    /// Phase 1, persistence, Phase 2, reconciliation. A reconciliation
    /// mismatch is returned as an error after both reports are on disk.
    pub async fn run(
        &self,
        adapters: &[Box<dyn SourceAdapter>],
        ctx: &RunContext,
    ) -> Result<RunOutcome> {
        let pool = self.phase1(adapters, ctx).await?;
        let loaded = PersistedPool::load(pool.path())?;
        self.phase2(loaded)
    }

    pub async fn phase1(
        &self,
        adapters: &[Box<dyn SourceAdapter>],
        ctx: &RunContext,
    ) -> Result<PersistedPool> {
        let intake = sources::collect(adapters).await;
        info!(
            target: "phase1",
            candidates = intake.candidates.len(),
            raw_duplicates = intake.duplicates.len(),
            skipped = intake.skipped.len(),
            adapter_failures = intake.failures.len(),
            "intake complete"
        );

        let mut candidates: Vec<Candidate> = intake
            .candidates
            .iter()
            .map(|raw| {
                let mut c = Candidate::from_raw(raw);
                if let Some(s) = self.tiers.infer_source(raw.url.trim()) {
                    c.infer_source(s);
                }
                c
            })
            .collect();

        let jobs = candidates
            .iter()
            .map(|c| FetchJob {
                candidate_id: c.id().to_string(),
                url: c.url().to_string(),
                headline: c.headline().to_string(),
            })
            .collect();
        let mut fetch_log = self.fetch.fetch_all(jobs).await;
        fetch_log.sort_by(|a, b| a.candidate_id.cmp(&b.candidate_id));
        let by_id: HashMap<&str, &FetchReport> =
            fetch_log.iter().map(|r| (r.candidate_id.as_str(), r)).collect();

        let mut searches = Vec::new();
        for (c, raw) in candidates.iter_mut().zip(&intake.candidates) {
            let report = by_id.get(c.id()).copied();
            if self.screen(c, raw, report, ctx)? {
                searches.push(CorroborationJob {
                    candidate_id: c.id().to_string(),
                    headline: c.headline().to_string(),
                });
            }
        }
        let found: HashMap<String, Vec<String>> =
            self.fetch.corroborate_all(searches).await.into_iter().collect();

        let policy = GatePolicy::from(&self.cfg.gate);
        for c in candidates.iter_mut().filter(|c| c.verdict().is_none()) {
            let corroboration = found
                .get(c.id())
                .map(|sources| self.corroborators(sources))
                .unwrap_or_default();
            self.apply_gate(c, ctx, &policy, &corroboration)?;
        }

        let reference = ctx
            .reference_status_id
            .or_else(|| derive_reference_status_id(&candidates));
        let chronology = self.check_chronology(&mut candidates, reference)?;
        let passed = candidates.iter().filter(|c| c.is_pass()).count();
        counter!("curator_gate_pass_total").increment(passed as u64);

        regions::assign(&mut candidates, &self.cfg.distribution.default_region)?;
        let mut plan = dedup::plan(&candidates);
        let tally = ledger::resolve(&mut plan, &candidates, &self.cfg.distribution);
        let superseded = dedup::apply(&plan, &mut candidates)?;
        counter!("curator_superseded_total").increment(superseded as u64);
        for a in &tally.actions {
            info!(target: "phase1", action = ?a, "distribution resolution");
        }
        for v in tally.unresolved_hard() {
            warn!(target: "phase1", violation = %v.describe(), "unresolved hard cap");
        }

        let summary = RunSummary::of(&candidates);
        gauge!("curator_last_run_ts").set(ctx.now.timestamp() as f64);
        info!(
            target: "phase1",
            total = summary.total,
            passed = summary.passed,
            rejected = summary.rejected,
            superseded = summary.superseded,
            "phase 1 complete"
        );

        let record = Phase1Record {
            run_date: ctx.run_date,
            now: ctx.now,
            reference_status_id: reference,
            summary,
            candidates,
            dedup: plan,
            tally,
            chronology,
            fetch_log,
            raw_duplicates: intake.duplicates,
            skipped: intake.skipped,
            adapter_failures: intake.failures,
        };
        PersistedPool::persist(&self.cfg.output_dir, record)
    }

    pub fn phase2(&self, pool: PersistedPool) -> Result<RunOutcome> {
        phase2(pool, &self.cfg, &self.rules)
    }

    /// Classification, date resolution, claim assessment and the gate for one candidate.
    /// Date resolution, classification, fetch outcome and claim assessment.
    /// Returns whether the candidate still needs an extraordinary-claim search.
    fn screen(
        &self,
        c: &mut Candidate,
        raw: &RawCandidate,
        report: Option<&FetchReport>,
        ctx: &RunContext,
    ) -> Result<bool> {
        let html = report
            .and_then(|r| r.body.as_deref())
            .or(raw.raw_content.as_deref());
        let status_id = match c.kind() {
            CandidateKind::SocialPost => c.status_id(),
            CandidateKind::Article => None,
        };
        let resolution = date_resolver::resolve(
            &DateSources {
                url: c.url(),
                html,
                search_date: raw.search_date.as_deref(),
                status_id,
            },
            ctx.now,
        );
        c.record_date_hints(resolution.hints);
        match resolution.outcome {
            Ok((date, method)) => c.set_verified_date(date, method)?,
            Err(e) => {
                debug!(candidate = %c.id(), error = %e, "no date");
                c.reject_with(Stage::DateResolver, e)?;
                count_reject(RejectCode::NoExtractableDate);
            }
        }

        // Rejected candidates are still classified for the audit record.
        let info = self.tiers.classify(c.source(), Some(c.url()));
        c.set_classification(&info, intended_section(c.kind(), &info))?;
        if let Some(r) = report {
            c.set_fetch(r.outcome.clone())?;
        }
        if c.verdict().is_some() {
            return Ok(false);
        }

        let (severity, hit) = self.rules.claims.assess(&c.match_text());
        c.set_claim_severity(severity)?;
        if severity != ClaimSeverity::Extraordinary {
            return Ok(false);
        }
        c.note(
            Stage::Gate,
            format!("extraordinary claim: '{}'", hit.unwrap_or_default()),
        );
        Ok(true)
    }

    fn corroborators(&self, sources: &[String]) -> Vec<Corroboration> {
        sources
            .iter()
            .map(|s| {
                let info = self.tiers.classify(s, None);
                Corroboration {
                    publisher: info.publisher,
                    tier: info.tier,
                }
            })
            .collect()
    }

    fn apply_gate(
        &self,
        c: &mut Candidate,
        ctx: &RunContext,
        policy: &GatePolicy,
        corroboration: &[Corroboration],
    ) -> Result<()> {
        let own = c.publisher();
        let decision = gate::evaluate(
            &GateInput {
                verified_date: c.verified_date(),
                now: ctx.now,
                fetch: c.fetch(),
                claim_severity: c.claim_severity(),
                own_publisher: &own,
                corroboration,
            },
            policy,
        );
        gate::record(c, &decision)?;
        if let Some(r) = c.rejection() {
            debug!(candidate = %c.id(), reason = %r.reason, "gate reject");
            count_reject(r.code);
        }
        Ok(())
    }

    /// Status-id comparison for every social post that passed the gate. Fails closed.
    fn check_chronology(
        &self,
        candidates: &mut [Candidate],
        reference: Option<u64>,
    ) -> Result<Vec<ChronologyEntry>> {
        let threshold = self.cfg.chronology.max_delta;
        let mut entries = Vec::new();
        for c in candidates
            .iter_mut()
            .filter(|c| c.is_pass() && c.kind() == CandidateKind::SocialPost)
        {
            let check = chronology::check(c.status_id(), reference, threshold);
            entries.push(ChronologyEntry {
                candidate_id: c.id().to_string(),
                check: check.clone(),
            });
            c.set_chronology(check.clone())?;
            if let Err(e) = check.ensure_passed() {
                c.reject_with(Stage::Chronology, e)?;
                count_reject(RejectCode::ChronologyDeltaExceeded);
            }
        }
        Ok(entries)
    }
}

/// Selection and reconciliation over a persisted pool. Both artifacts are
/// written before a mismatch is reported.
pub fn phase2(pool: PersistedPool, cfg: &CuratorConfig, rules: &RuleBook) -> Result<RunOutcome> {
    let selection = select(&pool, cfg, rules)?;
    let selection_path = selection.write(&cfg.output_dir)?;
    let report = reconcile(&pool, &selection);
    let report_path = report.write(&cfg.output_dir)?;
    let report = report.into_result()?;
    Ok(RunOutcome {
        pool,
        selection,
        selection_path,
        report,
        report_path,
    })
}

/// Newest post from a reference account that passed the gate.
pub fn derive_reference_status_id(candidates: &[Candidate]) -> Option<u64> {
    candidates
        .iter()
        .filter(|c| c.is_pass() && c.kind() == CandidateKind::SocialPost)
        .filter(|c| c.handle().is_some_and(is_reference_account))
        .filter_map(|c| c.status_id())
        .max()
}

fn count_reject(code: RejectCode) {
    counter!("curator_gate_reject_total", "code" => code.label()).increment(1);
}
