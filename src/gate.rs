//! Freshness & integrity gate.
//!
//! [`evaluate`] is a pure function of its inputs: no clock, no I/O. Rules are
//! checked in order and the first failing one decides:
//!
//! 1. a verified date exists and is not implausibly far in the future
//! 2. age (rounded hours) is within the freshness ceiling
//! 3. the URL is live, or paywalled with the headline confirmed by search
//! 4. an extraordinary claim has enough independent high-trust corroboration
//!
//! Nothing else is consulted. A thin section or a regionally important story
//! does not move the ceiling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, ClaimSeverity, RejectCode, Rejection, SourceTier, Stage, MAX_AGE_HOURS};
use crate::config::GateConfig;
use crate::error::{CurationError, Result};
use crate::fetch::FetchOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    pub max_age_hours: u32,
    pub future_skew_hours: u32,
    pub min_extraordinary_corroboration: usize,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::from(&GateConfig::default())
    }
}

impl From<&GateConfig> for GatePolicy {
    fn from(cfg: &GateConfig) -> Self {
        Self {
            max_age_hours: cfg.max_age_hours.min(MAX_AGE_HOURS),
            future_skew_hours: cfg.future_skew_hours,
            min_extraordinary_corroboration: cfg.min_extraordinary_corroboration,
        }
    }
}

/// A publisher reported by search as carrying the same story, already tier-classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corroboration {
    pub publisher: String,
    pub tier: SourceTier,
}

#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub verified_date: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    pub fetch: Option<&'a FetchOutcome>,
    pub claim_severity: ClaimSeverity,
    pub own_publisher: &'a str,
    pub corroboration: &'a [Corroboration],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "UPPERCASE")]
pub enum GateDecision {
    Pass {
        age_hours: u32,
    },
    Reject {
        /// Present whenever the age could be computed.
        age_hours: Option<u32>,
        rejection: Rejection,
    },
}

impl GateDecision {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateDecision::Pass { .. })
    }

    pub fn age_hours(&self) -> Option<u32> {
        match self {
            GateDecision::Pass { age_hours } => Some(*age_hours),
            GateDecision::Reject { age_hours, .. } => *age_hours,
        }
    }

    fn reject(age_hours: Option<u32>, code: RejectCode, detail: impl AsRef<str>) -> Self {
        GateDecision::Reject {
            age_hours,
            rejection: Rejection::new(code).with_detail(detail),
        }
    }
}

/// Whole hours between `date` and `now`, rounded half-up, clamped at zero.
/// `None` when `date` lies more than `future_skew_hours` ahead of `now`.
pub fn age_hours(date: DateTime<Utc>, now: DateTime<Utc>, future_skew_hours: u32) -> Option<u32> {
    const HOUR_MS: i64 = 3_600_000;
    let ms = (now - date).num_milliseconds();
    if ms < 0 {
        if -ms > i64::from(future_skew_hours) * HOUR_MS {
            return None;
        }
        return Some(0);
    }
    let hours = (ms + HOUR_MS / 2) / HOUR_MS;
    Some(u32::try_from(hours).unwrap_or(u32::MAX))
}

/// Distinct Tier 1/2 publishers other than the candidate's own.
pub fn independent_high_trust(own_publisher: &str, corroboration: &[Corroboration]) -> usize {
    let mut seen: Vec<&str> = corroboration
        .iter()
        .filter(|c| c.tier.is_high_trust() && c.publisher != own_publisher)
        .map(|c| c.publisher.as_str())
        .collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

pub fn evaluate(input: &GateInput<'_>, policy: &GatePolicy) -> GateDecision {
    let Some(date) = input.verified_date else {
        return GateDecision::reject(None, RejectCode::UnverifiableDate, "");
    };
    let Some(age) = age_hours(date, input.now, policy.future_skew_hours) else {
        return GateDecision::reject(
            None,
            RejectCode::UnverifiableDate,
            format!("dated {} in the future", date.to_rfc3339()),
        );
    };
    if age > policy.max_age_hours {
        return GateDecision::reject(
            Some(age),
            RejectCode::Stale,
            format!("{age} h > {} h", policy.max_age_hours),
        );
    }

    match input.fetch {
        None => {
            return GateDecision::reject(Some(age), RejectCode::FetchFailed, "url not checked")
        }
        Some(f @ FetchOutcome::DeadLink { .. }) => {
            return GateDecision::reject(Some(age), RejectCode::DeadLink, f.describe())
        }
        Some(f @ (FetchOutcome::Timeout { .. } | FetchOutcome::Blocked { .. })) => {
            return GateDecision::reject(Some(age), RejectCode::FetchFailed, f.describe())
        }
        Some(FetchOutcome::Paywalled {
            headline_corroborated: false,
            status,
        }) => {
            return GateDecision::reject(
                Some(age),
                RejectCode::UnconfirmedPaywall,
                format!("{status}, headline not found in independent search"),
            )
        }
        Some(FetchOutcome::Paywalled { .. } | FetchOutcome::Success { .. }) => {}
    }

    if input.claim_severity == ClaimSeverity::Extraordinary {
        let required = policy.min_extraordinary_corroboration;
        if let Err(err) = require_corroboration(input.own_publisher, input.corroboration, required) {
            if let Some(rejection) = err.rejection() {
                return GateDecision::Reject {
                    age_hours: Some(age),
                    rejection,
                };
            }
        }
    }

    GateDecision::Pass { age_hours: age }
}

/// Count of independent Tier 1/2 corroborators, or the shortfall as an error.
pub fn require_corroboration(
    own_publisher: &str,
    corroboration: &[Corroboration],
    required: usize,
) -> Result<usize> {
    let found = independent_high_trust(own_publisher, corroboration);
    if found < required {
        return Err(CurationError::UncorroboratedClaim { found, required });
    }
    Ok(found)
}

/// Write a decision onto the candidate. The age is recorded for rejects too.
pub fn record(c: &mut Candidate, decision: &GateDecision) -> Result<()> {
    if let Some(age) = decision.age_hours() {
        c.set_age_hours(age)?;
    }
    match decision {
        GateDecision::Pass { .. } => c.pass(),
        GateDecision::Reject { rejection, .. } => c.reject(Stage::Gate, rejection.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 23, 12, 0, 0).unwrap()
    }

    fn ok() -> FetchOutcome {
        FetchOutcome::Success {
            status: 200,
            final_url: "https://example.test/a".into(),
        }
    }

    fn input<'a>(hours_ago: i64, fetch: &'a FetchOutcome) -> GateInput<'a> {
        GateInput {
            verified_date: Some(now() - Duration::hours(hours_ago)),
            now: now(),
            fetch: Some(fetch),
            claim_severity: ClaimSeverity::Ordinary,
            own_publisher: "reuters",
            corroboration: &[],
        }
    }

    #[test]
    fn ages_round_half_up_and_clamp() {
        let n = now();
        assert_eq!(age_hours(n - Duration::minutes(29), n, 2), Some(0));
        assert_eq!(age_hours(n - Duration::minutes(30), n, 2), Some(1));
        assert_eq!(age_hours(n - Duration::minutes(48 * 60 + 29), n, 2), Some(48));
        assert_eq!(age_hours(n + Duration::minutes(90), n, 2), Some(0));
        assert_eq!(age_hours(n + Duration::hours(3), n, 2), None);
    }

    #[test]
    fn boundary_48_passes_49_is_stale() {
        let f = ok();
        let p = GatePolicy::default();
        assert_eq!(evaluate(&input(48, &f), &p), GateDecision::Pass { age_hours: 48 });
        match evaluate(&input(49, &f), &p) {
            GateDecision::Reject { rejection, age_hours } => {
                assert_eq!(rejection.code, RejectCode::Stale);
                assert_eq!(rejection.reason, "stale (49 h > 48 h)");
                assert_eq!(age_hours, Some(49));
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn missing_or_future_date_is_unverifiable() {
        let f = ok();
        let mut i = input(0, &f);
        i.verified_date = None;
        let d = evaluate(&i, &GatePolicy::default());
        assert!(matches!(
            d,
            GateDecision::Reject { ref rejection, age_hours: None } if rejection.code == RejectCode::UnverifiableDate
        ));
        i.verified_date = Some(now() + Duration::hours(5));
        assert!(!evaluate(&i, &GatePolicy::default()).is_pass());
    }

    #[test]
    fn url_outcomes_map_to_codes() {
        let p = GatePolicy::default();
        let cases = [
            (
                FetchOutcome::DeadLink {
                    status: Some(404),
                    detail: "not found".into(),
                },
                RejectCode::DeadLink,
            ),
            (FetchOutcome::Timeout { after_ms: 15_000 }, RejectCode::FetchFailed),
            (
                FetchOutcome::Paywalled {
                    status: 200,
                    headline_corroborated: false,
                },
                RejectCode::UnconfirmedPaywall,
            ),
        ];
        for (f, code) in cases {
            match evaluate(&input(3, &f), &p) {
                GateDecision::Reject { rejection, .. } => assert_eq!(rejection.code, code),
                other => panic!("{f:?} should reject, got {other:?}"),
            }
        }
        let confirmed = FetchOutcome::Paywalled {
            status: 200,
            headline_corroborated: true,
        };
        assert!(evaluate(&input(3, &confirmed), &p).is_pass());
    }

    #[test]
    fn extraordinary_claims_need_two_independent_high_trust_sources() {
        let f = ok();
        let p = GatePolicy::default();
        let weak = [
            Corroboration { publisher: "reuters".into(), tier: SourceTier::Tier1 },
            Corroboration { publisher: "bbc".into(), tier: SourceTier::Tier1 },
            Corroboration { publisher: "bbc".into(), tier: SourceTier::Tier1 },
            Corroboration { publisher: "some blog".into(), tier: SourceTier::Unknown },
        ];
        let mut i = input(2, &f);
        i.claim_severity = ClaimSeverity::Extraordinary;
        i.corroboration = &weak;
        match evaluate(&i, &p) {
            GateDecision::Reject { rejection, .. } => {
                assert_eq!(rejection.code, RejectCode::UncorroboratedClaim);
                assert!(rejection.reason.contains("1 of 2"));
            }
            other => panic!("expected reject, got {other:?}"),
        }
        let strong = [
            Corroboration { publisher: "bbc".into(), tier: SourceTier::Tier1 },
            Corroboration { publisher: "cnn".into(), tier: SourceTier::Tier2 },
        ];
        i.corroboration = &strong;
        assert!(evaluate(&i, &p).is_pass());

        assert_eq!(require_corroboration("reuters", &strong, 2).unwrap(), 2);
        assert!(matches!(
            require_corroboration("reuters", &weak, 2),
            Err(CurationError::UncorroboratedClaim { found: 1, required: 2 })
        ));
    }

    #[test]
    fn identical_inputs_give_identical_decisions() {
        let f = ok();
        let i = input(24, &f);
        let p = GatePolicy::default();
        let a = evaluate(&i, &p);
        let b = evaluate(&i, &p);
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }
}
