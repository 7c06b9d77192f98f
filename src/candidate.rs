//! The unit of content under evaluation, and its lifecycle.
//!
//! A `Candidate` is created from a `RawCandidate` handed over by a source adapter
//! and is enriched in place by Date Resolver → Tier Classifier → Gate → Dedup & Tally.
//! Every stage goes through a stage method below; those only ever *add* a field or
//! move the verdict to REJECT. Rewriting a field an earlier stage already wrote is a
//! `CurationError::StageViolation`, never a silent overwrite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chronology::ChronologyCheck;
use crate::error::{CurationError, Result};
use crate::fetch::FetchOutcome;
use crate::tiers::TierInfo;

/// Freshness ceiling. Configuration may tighten it, never loosen it.
pub const MAX_AGE_HOURS: u32 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateKind {
    Article,
    SocialPost,
}

/// Record as produced by a source adapter. Nothing here is trusted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub headline: String,
    pub url: String,
    /// Publisher identity; empty means "infer from URL".
    #[serde(default)]
    pub source: String,
    pub kind: CandidateKind,
    /// Page HTML when the adapter already has it (otherwise fetched in Phase 1).
    #[serde(default)]
    pub raw_content: Option<String>,
    /// Snippet / post body used for claim assessment and scoring.
    #[serde(default)]
    pub raw_text: Option<String>,
    /// Date string reported by the search result that surfaced this item.
    #[serde(default)]
    pub search_date: Option<String>,
    #[serde(default)]
    pub status_id: Option<u64>,
    #[serde(default)]
    pub handle: Option<String>,
}

/// Where a date hint came from, in resolver priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateMethod {
    MetaTag,
    StructuredData,
    BylineTime,
    SearchSnippet,
    StatusIdTimestamp,
}

impl DateMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DateMethod::MetaTag => "meta-tag",
            DateMethod::StructuredData => "structured-data",
            DateMethod::BylineTime => "byline-time",
            DateMethod::SearchSnippet => "search-snippet",
            DateMethod::StatusIdTimestamp => "status-id-timestamp",
        }
    }
}

/// One extraction attempt: method, raw value seen, and what it parsed to (if anything).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateHint {
    pub method: DateMethod,
    pub raw: String,
    pub parsed: Option<DateTime<Utc>>,
}

/// There is no third value: a candidate is either not yet gated, PASS, or REJECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Reject,
}

/// Machine-readable rejection codes. Each maps to a fixed, non-empty label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    NoExtractableDate,
    UnverifiableDate,
    Stale,
    DeadLink,
    FetchFailed,
    UnconfirmedPaywall,
    UncorroboratedClaim,
    ChronologyDeltaExceeded,
    Superseded,
    DistributionCapExceeded,
}

impl RejectCode {
    pub fn label(self) -> &'static str {
        match self {
            RejectCode::NoExtractableDate => "no extractable date",
            RejectCode::UnverifiableDate => "unverifiable date",
            RejectCode::Stale => "stale",
            RejectCode::DeadLink => "dead link",
            RejectCode::FetchFailed => "fetch failed",
            RejectCode::UnconfirmedPaywall => "unconfirmed paywalled content",
            RejectCode::UncorroboratedClaim => "uncorroborated extraordinary claim",
            RejectCode::ChronologyDeltaExceeded => "identifier delta exceeds staleness threshold",
            RejectCode::Superseded => "superseded by cluster representative",
            RejectCode::DistributionCapExceeded => "distribution cap exceeded",
        }
    }
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a candidate was rejected. `reason` always starts with the code label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: RejectCode,
    pub reason: String,
}

impl Rejection {
    pub fn new(code: RejectCode) -> Self {
        Self {
            code,
            reason: code.label().to_string(),
        }
    }

    /// Append numeric / contextual detail, e.g. `stale (49 h > 48 h)`.
    pub fn with_detail(mut self, detail: impl AsRef<str>) -> Self {
        let d = detail.as_ref().trim();
        if !d.is_empty() {
            self.reason = format!("{} ({})", self.code.label(), d);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceTier {
    Tier1,
    Tier2,
    Tier3,
    Local,
    Unknown,
}

impl SourceTier {
    /// Lower is better; used to pick cluster representatives.
    pub fn rank(self) -> u8 {
        match self {
            SourceTier::Tier1 => 0,
            SourceTier::Tier2 => 1,
            SourceTier::Tier3 => 2,
            SourceTier::Local => 3,
            SourceTier::Unknown => 4,
        }
    }

    pub fn is_high_trust(self) -> bool {
        matches!(self, SourceTier::Tier1 | SourceTier::Tier2)
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceTier::Tier1 => "Tier 1",
            SourceTier::Tier2 => "Tier 2",
            SourceTier::Tier3 => "Tier 3",
            SourceTier::Local => "Local",
            SourceTier::Unknown => "Unknown",
        }
    }
}

/// Output sections, in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Section {
    Tier1,
    GeneralAwareness,
    Local,
    SocialHighlight,
}

impl Section {
    pub const ORDER: [Section; 4] = [
        Section::Tier1,
        Section::GeneralAwareness,
        Section::Local,
        Section::SocialHighlight,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Tier1 => "tier1",
            Section::GeneralAwareness => "general_awareness",
            Section::Local => "local",
            Section::SocialHighlight => "social_highlight",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimSeverity {
    Ordinary,
    /// Asserts a major state-altering event; needs independent corroboration.
    Extraordinary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Adapter,
    DateResolver,
    TierClassifier,
    Gate,
    Chronology,
    Dedup,
    Tally,
}

/// One line of the reasoning trail persisted with every candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailEntry {
    pub stage: Stage,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    id: String,
    headline: String,
    url: String,
    source: String,
    kind: CandidateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,

    #[serde(default)]
    raw_date_hints: Vec<DateHint>,
    verified_date: Option<DateTime<Utc>>,
    #[serde(default)]
    date_method: Option<DateMethod>,
    age_hours: Option<u32>,
    #[serde(default)]
    fetch: Option<FetchOutcome>,

    #[serde(default)]
    source_tier: Option<SourceTier>,
    /// Alias-folded publisher key used for per-source counting.
    #[serde(default)]
    publisher: Option<String>,
    #[serde(default)]
    ga_eligible: bool,
    #[serde(default)]
    is_local: bool,
    #[serde(default)]
    section: Option<Section>,
    #[serde(default)]
    claim_severity: Option<ClaimSeverity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chronology: Option<ChronologyCheck>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    superseded_by: Option<String>,

    verdict: Option<Verdict>,
    rejection: Option<Rejection>,
    #[serde(default)]
    trail: Vec<TrailEntry>,
}

fn set_once<T>(slot: &mut Option<T>, value: T, id: &str, field: &str) -> Result<()> {
    if slot.is_some() {
        return Err(CurationError::stage(id, format!("{field} already written")));
    }
    *slot = Some(value);
    Ok(())
}

impl Candidate {
    pub fn from_raw(raw: &RawCandidate) -> Self {
        let handle = raw.handle.as_deref().and_then(normalize_handle);
        let id = candidate_id(raw.kind, &raw.url, handle.as_deref(), raw.status_id);
        let mut c = Self {
            id,
            headline: raw.headline.clone(),
            url: raw.url.clone(),
            source: raw.source.clone(),
            kind: raw.kind,
            handle,
            status_id: raw.status_id,
            text: raw.raw_text.clone(),
            raw_date_hints: Vec::new(),
            verified_date: None,
            date_method: None,
            age_hours: None,
            fetch: None,
            source_tier: None,
            publisher: None,
            ga_eligible: false,
            is_local: false,
            section: None,
            claim_severity: None,
            chronology: None,
            region: None,
            cluster_id: None,
            superseded_by: None,
            verdict: None,
            rejection: None,
            trail: Vec::new(),
        };
        c.note(Stage::Adapter, format!("received from source '{}'", raw.source));
        c
    }

    // --- read access ---

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn headline(&self) -> &str {
        &self.headline
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn source(&self) -> &str {
        &self.source
    }
    pub fn kind(&self) -> CandidateKind {
        self.kind
    }
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }
    pub fn status_id(&self) -> Option<u64> {
        self.status_id
    }
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
    pub fn raw_date_hints(&self) -> &[DateHint] {
        &self.raw_date_hints
    }
    pub fn verified_date(&self) -> Option<DateTime<Utc>> {
        self.verified_date
    }
    pub fn date_method(&self) -> Option<DateMethod> {
        self.date_method
    }
    pub fn age_hours(&self) -> Option<u32> {
        self.age_hours
    }
    pub fn fetch(&self) -> Option<&FetchOutcome> {
        self.fetch.as_ref()
    }
    pub fn source_tier(&self) -> SourceTier {
        self.source_tier.unwrap_or(SourceTier::Unknown)
    }
    /// Publisher key; falls back to the lowercased source before classification.
    pub fn publisher(&self) -> String {
        match &self.publisher {
            Some(p) if !p.is_empty() => p.clone(),
            _ => self.source.trim().to_lowercase(),
        }
    }
    pub fn ga_eligible(&self) -> bool {
        self.ga_eligible
    }
    pub fn is_local(&self) -> bool {
        self.is_local
    }
    pub fn section(&self) -> Option<Section> {
        self.section
    }
    pub fn claim_severity(&self) -> ClaimSeverity {
        self.claim_severity.unwrap_or(ClaimSeverity::Ordinary)
    }
    pub fn chronology(&self) -> Option<&ChronologyCheck> {
        self.chronology.as_ref()
    }
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }
    pub fn superseded_by(&self) -> Option<&str> {
        self.superseded_by.as_deref()
    }
    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }
    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }
    pub fn trail(&self) -> &[TrailEntry] {
        &self.trail
    }
    pub fn is_pass(&self) -> bool {
        self.verdict == Some(Verdict::Pass)
    }
    pub fn is_gated(&self) -> bool {
        self.verdict.is_some()
    }

    /// Text used by rule tables: headline plus snippet/post body.
    pub fn match_text(&self) -> String {
        match &self.text {
            Some(t) if !t.is_empty() => format!("{} {}", self.headline, t),
            _ => self.headline.clone(),
        }
    }

    // --- stage methods (add-only) ---

    pub fn note(&mut self, stage: Stage, note: impl Into<String>) {
        self.trail.push(TrailEntry {
            stage,
            note: note.into(),
        });
    }

    /// Fill an empty source from URL inference. A non-empty source is never replaced.
    pub fn infer_source(&mut self, inferred: impl Into<String>) {
        if self.source.trim().is_empty() {
            self.source = inferred.into();
            let msg = format!("source inferred from URL as '{}'", self.source);
            self.note(Stage::Adapter, msg);
        }
    }

    pub fn record_date_hints(&mut self, hints: impl IntoIterator<Item = DateHint>) {
        self.raw_date_hints.extend(hints);
    }

    pub fn set_verified_date(&mut self, date: DateTime<Utc>, method: DateMethod) -> Result<()> {
        set_once(&mut self.verified_date, date, &self.id, "verified_date")?;
        self.date_method = Some(method);
        let msg = format!("verified date {} via {}", date.to_rfc3339(), method.as_str());
        self.note(Stage::DateResolver, msg);
        Ok(())
    }

    pub fn set_fetch(&mut self, outcome: FetchOutcome) -> Result<()> {
        let msg = format!("url check: {}", outcome.describe());
        set_once(&mut self.fetch, outcome, &self.id, "fetch")?;
        self.note(Stage::Gate, msg);
        Ok(())
    }

    pub fn set_classification(&mut self, info: &TierInfo, section: Section) -> Result<()> {
        set_once(&mut self.source_tier, info.tier, &self.id, "source_tier")?;
        self.publisher = Some(info.publisher.clone());
        // Unknown sources are never GA-eligible until an operator override reclassifies them.
        self.ga_eligible = info.ga_eligible && info.tier != SourceTier::Unknown;
        self.is_local = info.is_local;
        self.section = Some(section);
        let mut msg = format!(
            "classified {} (ga_eligible={}), intended section {}",
            info.tier.label(),
            self.ga_eligible,
            section
        );
        if !info.note.is_empty() {
            msg.push_str(&format!("; {}", info.note));
        }
        self.note(Stage::TierClassifier, msg);
        Ok(())
    }

    pub fn set_claim_severity(&mut self, severity: ClaimSeverity) -> Result<()> {
        set_once(&mut self.claim_severity, severity, &self.id, "claim_severity")
    }

    pub fn set_chronology(&mut self, check: ChronologyCheck) -> Result<()> {
        let msg = check.summary();
        set_once(&mut self.chronology, check, &self.id, "chronology")?;
        self.note(Stage::Chronology, msg);
        Ok(())
    }

    pub fn set_age_hours(&mut self, hours: u32) -> Result<()> {
        set_once(&mut self.age_hours, hours, &self.id, "age_hours")
    }

    pub fn set_region(&mut self, region: impl Into<String>) -> Result<()> {
        set_once(&mut self.region, region.into(), &self.id, "region")
    }

    pub fn set_cluster(&mut self, cluster_id: impl Into<String>) -> Result<()> {
        set_once(&mut self.cluster_id, cluster_id.into(), &self.id, "cluster_id")
    }

    /// PASS is only reachable from the ungated state and only with the PASS invariants met.
    pub fn pass(&mut self) -> Result<()> {
        if self.verdict.is_some() {
            return Err(CurationError::stage(&self.id, "verdict already set"));
        }
        if self.verified_date.is_none() {
            return Err(CurationError::stage(&self.id, "PASS without verified date"));
        }
        match self.age_hours {
            Some(h) if h <= MAX_AGE_HOURS => {}
            Some(h) => {
                return Err(CurationError::stage(
                    &self.id,
                    format!("PASS with age {h} h > {MAX_AGE_HOURS} h"),
                ))
            }
            None => return Err(CurationError::stage(&self.id, "PASS without computed age")),
        }
        match &self.fetch {
            Some(f) if f.is_live() => {}
            _ => {
                return Err(CurationError::stage(
                    &self.id,
                    "PASS without a fetched or search-confirmed URL",
                ))
            }
        }
        self.verdict = Some(Verdict::Pass);
        let msg = format!("PASS at {} h", self.age_hours.unwrap_or_default());
        self.note(Stage::Gate, msg);
        Ok(())
    }

    /// REJECT from the ungated state or from PASS (dedup, cap resolution). Terminal.
    pub fn reject(&mut self, stage: Stage, rejection: Rejection) -> Result<()> {
        if self.verdict == Some(Verdict::Reject) {
            return Err(CurationError::stage(&self.id, "already rejected"));
        }
        self.verdict = Some(Verdict::Reject);
        let msg = format!("REJECT: {}", rejection.reason);
        self.rejection = Some(rejection);
        self.note(stage, msg);
        Ok(())
    }

    /// Resolve a recoverable failure to its REJECT. Run-level errors come back unchanged.
    pub fn reject_with(&mut self, stage: Stage, err: CurationError) -> Result<()> {
        match err.rejection() {
            Some(rejection) => self.reject(stage, rejection),
            None => Err(err),
        }
    }

    pub fn supersede(&mut self, representative: &str) -> Result<()> {
        self.superseded_by = Some(representative.to_string());
        self.reject_with(
            Stage::Dedup,
            CurationError::DuplicateDetected {
                representative: representative.to_string(),
            },
        )
    }
}

/// Stable identifier: hash of the normalized URL, or of `handle:statusId` for social posts.
pub fn candidate_id(
    kind: CandidateKind,
    url: &str,
    handle: Option<&str>,
    status_id: Option<u64>,
) -> String {
    let handle = handle.and_then(normalize_handle);
    let seed = match (kind, handle, status_id) {
        (CandidateKind::SocialPost, Some(h), Some(sid)) => {
            format!("{}:{}", h.to_ascii_lowercase(), sid)
        }
        _ => normalize_url(url),
    };
    let digest = Sha256::digest(seed.as_bytes());
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Handle without surrounding whitespace or a leading '@'; `None` when nothing is left.
pub fn normalize_handle(raw: &str) -> Option<String> {
    let h = raw.trim().trim_start_matches('@').trim();
    (!h.is_empty()).then(|| h.to_string())
}

/// Strip query, fragment and trailing slash; lowercase scheme and host.
pub fn normalize_url(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(mut u) => {
            u.set_query(None);
            u.set_fragment(None);
            u.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => raw
            .trim()
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(url: &str) -> RawCandidate {
        RawCandidate {
            headline: "Council approves transit budget".into(),
            url: url.into(),
            source: "Reuters".into(),
            kind: CandidateKind::Article,
            raw_content: None,
            raw_text: None,
            search_date: None,
            status_id: None,
            handle: None,
        }
    }

    fn live() -> FetchOutcome {
        FetchOutcome::Success {
            status: 200,
            final_url: "https://example.test/a".into(),
        }
    }

    #[test]
    fn id_ignores_query_and_trailing_slash() {
        let a = Candidate::from_raw(&raw("https://Example.test/a/?utm=x"));
        let b = Candidate::from_raw(&raw("https://example.test/a"));
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().len(), 16);
    }

    #[test]
    fn social_id_uses_handle_and_status() {
        let mut r = raw("https://x.com/simonw/status/1");
        r.kind = CandidateKind::SocialPost;
        r.handle = Some("@SimonW".into());
        r.status_id = Some(1);
        let mut r2 = r.clone();
        r2.url = "https://twitter.com/simonw/status/1".into();
        assert_eq!(Candidate::from_raw(&r).id(), Candidate::from_raw(&r2).id());
    }

    #[test]
    fn pass_requires_date_age_and_live_url() {
        let mut c = Candidate::from_raw(&raw("https://example.test/a"));
        assert!(c.pass().is_err());
        let d = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
        c.set_verified_date(d, DateMethod::MetaTag).unwrap();
        c.set_age_hours(24).unwrap();
        assert!(c.pass().is_err(), "no fetch outcome yet");
        c.set_fetch(live()).unwrap();
        c.pass().unwrap();
        assert!(c.is_pass());
    }

    #[test]
    fn earlier_stage_fields_are_not_rewritten() {
        let mut c = Candidate::from_raw(&raw("https://example.test/a"));
        let d = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
        c.set_verified_date(d, DateMethod::MetaTag).unwrap();
        let err = c.set_verified_date(d, DateMethod::BylineTime).unwrap_err();
        assert!(matches!(err, CurationError::StageViolation { .. }));
        assert_eq!(c.date_method(), Some(DateMethod::MetaTag));
    }

    #[test]
    fn reject_is_terminal_and_reason_non_empty() {
        let mut c = Candidate::from_raw(&raw("https://example.test/a"));
        c.reject(Stage::DateResolver, Rejection::new(RejectCode::NoExtractableDate))
            .unwrap();
        assert_eq!(c.verdict(), Some(Verdict::Reject));
        assert_eq!(c.rejection().unwrap().reason, "no extractable date");
        assert!(c.pass().is_err());
        assert!(c
            .reject(Stage::Gate, Rejection::new(RejectCode::Stale))
            .is_err());
    }

    #[test]
    fn recoverable_errors_become_rejections_and_fatal_ones_propagate() {
        let mut c = Candidate::from_raw(&raw("https://example.test/a"));
        let fatal = c.reject_with(Stage::Tally, CurationError::BarrierNotReached("x".into()));
        assert!(matches!(fatal, Err(CurationError::BarrierNotReached(_))));
        assert_eq!(c.verdict(), None);

        c.supersede("rep-1").unwrap();
        assert_eq!(c.superseded_by(), Some("rep-1"));
        let r = c.rejection().unwrap();
        assert_eq!(r.code, RejectCode::Superseded);
        assert_eq!(r.reason, "superseded by cluster representative (rep-1)");
    }

    #[test]
    fn rejection_detail_formatting() {
        let r = Rejection::new(RejectCode::Stale).with_detail("49 h > 48 h");
        assert_eq!(r.reason, "stale (49 h > 48 h)");
        let r = Rejection::new(RejectCode::Stale).with_detail("   ");
        assert_eq!(r.reason, "stale");
    }
}
