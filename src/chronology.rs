//! Recency check for social posts by identifier ordering.
//!
//! Post identifiers on x.com / twitter.com are monotonic snowflakes, so comparing
//! a candidate's id against a same-day reference post says how far back the
//! candidate is, regardless of what its text claims. This supplements the
//! freshness gate; both must pass.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CurationError, Result};

/// Snowflake epoch (2010-11-04T01:42:54.657Z), milliseconds.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_288_834_974_657;

/// Accounts whose posts serve only as same-day references, never as highlights.
pub const REFERENCE_ACCOUNTS: &[&str] = &[
    "openai",
    "anthropicai",
    "spacex",
    "bbcbreaking",
    "reuters",
    "sawyermerritt",
];

static STATUS_RE: OnceCell<Regex> = OnceCell::new();

fn status_re() -> &'static Regex {
    STATUS_RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[/.])(?:x\.com|twitter\.com)/(\w+)/status(?:es)?/(\d+)").unwrap()
    })
}

/// Every comparison is kept verbatim for the audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChronologyCheck {
    pub candidate_id: Option<u64>,
    pub reference_id: Option<u64>,
    /// `reference - candidate`; positive means the candidate is older.
    pub delta: Option<i128>,
    pub threshold: u64,
    pub passed: bool,
    pub reason: String,
}

impl ChronologyCheck {
    pub fn summary(&self) -> String {
        match self.delta {
            Some(d) => format!(
                "status delta {d:+} vs threshold {} → {}: {}",
                self.threshold,
                if self.passed { "ok" } else { "reject" },
                self.reason
            ),
            None => format!("no comparison → reject: {}", self.reason),
        }
    }

    pub fn ensure_passed(&self) -> Result<()> {
        if self.passed {
            return Ok(());
        }
        Err(CurationError::ChronologyDeltaExceeded {
            delta: self.delta,
            threshold: self.threshold,
            detail: self.reason.clone(),
        })
    }
}

/// Compare a candidate id against a same-day reference id.
pub fn compare(candidate_id: u64, reference_id: u64, threshold: u64) -> ChronologyCheck {
    let delta = reference_id as i128 - candidate_id as i128;
    let passed = delta <= threshold as i128;
    let reason = if passed {
        "within range of same-day reference".to_string()
    } else {
        format!("identifier delta exceeds staleness threshold ({delta} > {threshold})")
    };
    ChronologyCheck {
        candidate_id: Some(candidate_id),
        reference_id: Some(reference_id),
        delta: Some(delta),
        threshold,
        passed,
        reason,
    }
}

/// Fail-closed variant: a missing identifier on either side cannot vouch for recency.
pub fn check(candidate_id: Option<u64>, reference_id: Option<u64>, threshold: u64) -> ChronologyCheck {
    match (candidate_id, reference_id) {
        (Some(c), Some(r)) => compare(c, r, threshold),
        (None, r) => ChronologyCheck {
            candidate_id: None,
            reference_id: r,
            delta: None,
            threshold,
            passed: false,
            reason: "no status identifier".to_string(),
        },
        (Some(c), None) => ChronologyCheck {
            candidate_id: Some(c),
            reference_id: None,
            delta: None,
            threshold,
            passed: false,
            reason: "no same-day reference identifier".to_string(),
        },
    }
}

pub fn extract_status_id(url: &str) -> Option<u64> {
    status_re()
        .captures(url)
        .and_then(|c| c.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// Account handle from a status URL, without `@`.
pub fn extract_handle(url: &str) -> Option<String> {
    status_re()
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn is_reference_account(handle: &str) -> bool {
    let h = handle.trim_start_matches('@').to_ascii_lowercase();
    REFERENCE_ACCOUNTS.contains(&h.as_str())
}

/// Creation instant embedded in a snowflake id.
pub fn snowflake_instant(id: u64) -> Option<DateTime<Utc>> {
    let ms = i64::try_from(id >> 22).ok()?.checked_add(SNOWFLAKE_EPOCH_MS)?;
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_delta_rejects_regardless_of_anything_else() {
        let c = compare(1_000_000_000, 1_000_600_000, 500_000);
        assert!(!c.passed);
        assert_eq!(c.delta, Some(600_000));
        assert!(c.reason.starts_with("identifier delta exceeds staleness threshold"));
        let err = c.ensure_passed().unwrap_err();
        assert_eq!(
            err.rejection().unwrap().reason,
            "identifier delta exceeds staleness threshold (600000 > 500000)"
        );
    }

    #[test]
    fn missing_reference_fails_with_its_reason() {
        let c = check(Some(42), None, 500_000);
        let r = c.ensure_passed().unwrap_err().rejection().unwrap();
        assert_eq!(
            r.reason,
            "identifier delta exceeds staleness threshold (no same-day reference identifier)"
        );
        assert!(compare(1_000, 1_100, 500_000).ensure_passed().is_ok());
    }

    #[test]
    fn newer_or_close_candidates_pass() {
        assert!(compare(1_000_600_000, 1_000_000_000, 500_000).passed);
        assert!(compare(1_000_000_000, 1_000_500_000, 500_000).passed);
    }

    #[test]
    fn missing_ids_fail_closed() {
        assert!(!check(None, Some(5), 500_000).passed);
        let c = check(Some(5), None, 500_000);
        assert!(!c.passed);
        assert_eq!(c.reason, "no same-day reference identifier");
    }

    #[test]
    fn status_url_parsing() {
        let u = "https://x.com/simonw/status/1893456789012345678?s=20";
        assert_eq!(extract_status_id(u), Some(1_893_456_789_012_345_678));
        assert_eq!(extract_handle(u).as_deref(), Some("simonw"));
        assert_eq!(
            extract_status_id("https://mobile.twitter.com/a_b/status/42"),
            Some(42)
        );
        assert_eq!(extract_status_id("https://example.com/x.com/status"), None);
        assert!(is_reference_account("@OpenAI"));
        assert!(!is_reference_account("karpathy"));
    }

    #[test]
    fn snowflake_decodes_to_epoch_offset() {
        let at_epoch = snowflake_instant(0).unwrap();
        assert_eq!(at_epoch.timestamp_millis(), SNOWFLAKE_EPOCH_MS);
        let one_sec = snowflake_instant(1000u64 << 22).unwrap();
        assert_eq!(one_sec.timestamp_millis(), SNOWFLAKE_EPOCH_MS + 1000);
    }
}
