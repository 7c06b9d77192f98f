//! URL liveness checks and search corroboration.
//!
//! `FetchPool` bounds total in-flight fetches and fetches per host, and puts a
//! hard timeout on each one. A timeout or transport error becomes a
//! `FetchOutcome` (and from there a REJECT); it never stalls the run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use metrics::histogram;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::candidate::normalize_url;
use crate::config::FetchConfig;
use crate::dedup::same_story;
use crate::error::CurationError;

/// Domains that serve metered or subscriber-only content.
pub const PAYWALL_DOMAINS: &[&str] = &[
    "statnews.com",
    "wsj.com",
    "nytimes.com",
    "ft.com",
    "modernhealthcare.com",
    "theinformation.com",
    "bloomberg.com",
    "barrons.com",
    "economist.com",
];

/// Page markers checked in the first 5000 bytes of a response body.
const PAYWALL_MARKERS: &[&str] = &[
    "subscribe to read",
    "subscribers only",
    "paywall",
    "content_tier",
    "metered",
    "premium content",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    Success {
        status: u16,
        final_url: String,
    },
    Paywalled {
        status: u16,
        headline_corroborated: bool,
    },
    /// 404/410, or a redirect that lands on the site's home page.
    DeadLink {
        status: Option<u16>,
        detail: String,
    },
    Timeout {
        after_ms: u64,
    },
    /// 403/429/5xx or a transport error.
    Blocked {
        status: Option<u16>,
        detail: String,
    },
}

impl FetchOutcome {
    /// Success, or paywall confirmed by an independent search snippet.
    pub fn is_live(&self) -> bool {
        match self {
            FetchOutcome::Success { .. } => true,
            FetchOutcome::Paywalled {
                headline_corroborated,
                ..
            } => *headline_corroborated,
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FetchOutcome::Success { status, final_url } => format!("{status} OK ({final_url})"),
            FetchOutcome::Paywalled {
                status,
                headline_corroborated,
            } => format!(
                "{status} paywalled, headline {}",
                if *headline_corroborated {
                    "confirmed by search"
                } else {
                    "not confirmed"
                }
            ),
            FetchOutcome::DeadLink { status, detail } => match status {
                Some(s) => format!("{s} dead link: {detail}"),
                None => format!("dead link: {detail}"),
            },
            FetchOutcome::Timeout { after_ms } => format!("timed out after {after_ms} ms"),
            FetchOutcome::Blocked { status, detail } => match status {
                Some(s) => format!("{s} blocked: {detail}"),
                None => format!("fetch error: {detail}"),
            },
        }
    }
}

/// Raw HTTP result handed back by a `PageFetcher`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResponse {
    pub status: u16,
    pub final_url: String,
    #[serde(default)]
    pub body: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET with redirects followed. Non-2xx statuses are `Ok`, not errors.
    async fn get(&self, url: &str) -> Result<PageResponse>;
    fn name(&self) -> &'static str;
}

/// Independent search, used to confirm paywalled headlines and extraordinary claims.
#[async_trait]
pub trait Corroborator: Send + Sync {
    async fn confirms_headline(&self, headline: &str, url: &str) -> Result<bool>;
    /// Publishers carrying the same story, as reported by search.
    async fn corroborating_sources(&self, headline: &str) -> Result<Vec<String>>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(cfg: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("building http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn get(&self, url: &str) -> Result<PageResponse> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CurationError::FetchFailure {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        Ok(PageResponse {
            status,
            final_url,
            body,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Pages captured earlier, keyed by normalized URL. Unknown URLs fail like a transport error.
#[derive(Debug, Clone, Default)]
pub struct RecordedFetcher {
    pages: HashMap<String, PageResponse>,
}

impl RecordedFetcher {
    pub fn new(pages: impl IntoIterator<Item = (String, PageResponse)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(u, p)| (normalize_url(&u), p))
                .collect(),
        }
    }

    /// JSON object: `{ "<url>": {"status": 200, "final_url": "...", "body": "..."} }`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading recorded pages from {}", path.display()))?;
        let pages: HashMap<String, PageResponse> =
            serde_json::from_str(&s).context("parsing recorded pages")?;
        Ok(Self::new(pages))
    }
}

#[async_trait]
impl PageFetcher for RecordedFetcher {
    async fn get(&self, url: &str) -> Result<PageResponse> {
        self.pages
            .get(&normalize_url(url))
            .cloned()
            .ok_or_else(|| {
                CurationError::FetchFailure {
                    url: url.to_string(),
                    reason: "no recorded page".to_string(),
                }
                .into()
            })
    }

    fn name(&self) -> &'static str {
        "recorded"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedConfirmation {
    pub url: String,
    pub headline: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedCoverage {
    pub headline: String,
    pub sources: Vec<String>,
}

/// Search results captured earlier. An empty instance confirms nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedCorroborator {
    #[serde(default)]
    pub confirmations: Vec<RecordedConfirmation>,
    #[serde(default)]
    pub coverage: Vec<RecordedCoverage>,
}

impl RecordedCorroborator {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading corroboration from {}", path.display()))?;
        serde_json::from_str(&s).context("parsing corroboration file")
    }
}

#[async_trait]
impl Corroborator for RecordedCorroborator {
    async fn confirms_headline(&self, headline: &str, url: &str) -> Result<bool> {
        let want = normalize_url(url);
        Ok(self
            .confirmations
            .iter()
            .any(|c| normalize_url(&c.url) == want && same_story(&c.headline, headline)))
    }

    async fn corroborating_sources(&self, headline: &str) -> Result<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        for c in self.coverage.iter().filter(|c| same_story(&c.headline, headline)) {
            for s in &c.sources {
                if !out.iter().any(|o| o.eq_ignore_ascii_case(s)) {
                    out.push(s.clone());
                }
            }
        }
        Ok(out)
    }
}

/// Map an HTTP result onto a liveness outcome. Paywalls start unconfirmed.
pub fn classify_response(requested: &str, resp: &PageResponse) -> FetchOutcome {
    let status = resp.status;
    let paywall_domain = is_paywall_domain(&resp.final_url) || is_paywall_domain(requested);
    match status {
        200..=299 => {
            if redirected_home(requested, &resp.final_url) {
                return FetchOutcome::DeadLink {
                    status: Some(status),
                    detail: format!("redirected to home page {}", resp.final_url),
                };
            }
            if paywall_domain || has_paywall_marker(&resp.body) {
                return FetchOutcome::Paywalled {
                    status,
                    headline_corroborated: false,
                };
            }
            FetchOutcome::Success {
                status,
                final_url: resp.final_url.clone(),
            }
        }
        404 | 410 => FetchOutcome::DeadLink {
            status: Some(status),
            detail: "not found".to_string(),
        },
        402 => FetchOutcome::Paywalled {
            status,
            headline_corroborated: false,
        },
        401 | 403 if paywall_domain => FetchOutcome::Paywalled {
            status,
            headline_corroborated: false,
        },
        _ => FetchOutcome::Blocked {
            status: Some(status),
            detail: "non-success status".to_string(),
        },
    }
}

pub fn is_paywall_domain(url: &str) -> bool {
    let Some(host) = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    else {
        return false;
    };
    PAYWALL_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{d}")))
}

fn has_paywall_marker(body: &str) -> bool {
    let head: String = body.chars().take(5000).collect::<String>().to_lowercase();
    PAYWALL_MARKERS.iter().any(|m| head.contains(m))
}

fn redirected_home(requested: &str, final_url: &str) -> bool {
    let (Ok(req), Ok(fin)) = (url::Url::parse(requested), url::Url::parse(final_url)) else {
        return false;
    };
    let req_path = req.path().trim_end_matches('/');
    let fin_path = fin.path().trim_end_matches('/');
    !req_path.is_empty() && fin_path.is_empty()
}

/// Extraordinary-claim search for one candidate.
#[derive(Debug, Clone)]
pub struct CorroborationJob {
    pub candidate_id: String,
    pub headline: String,
}

/// One URL to check, with the headline used for paywall confirmation.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub candidate_id: String,
    pub url: String,
    pub headline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchReport {
    pub candidate_id: String,
    pub url: String,
    pub outcome: FetchOutcome,
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub body: Option<String>,
}

pub struct FetchPool {
    fetcher: Arc<dyn PageFetcher>,
    corroborator: Arc<dyn Corroborator>,
    workers: usize,
    per_host: usize,
    timeout: Duration,
    global: Arc<Semaphore>,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl FetchPool {
    pub fn new(
        cfg: &FetchConfig,
        fetcher: Arc<dyn PageFetcher>,
        corroborator: Arc<dyn Corroborator>,
    ) -> Self {
        let workers = cfg.workers.max(1);
        Self {
            fetcher,
            corroborator,
            workers,
            per_host: cfg.per_host.max(1),
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
            global: Arc::new(Semaphore::new(workers)),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Test hook: sub-second timeouts.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch every job; returns once all have an outcome (order not preserved).
    pub async fn fetch_all(&self, jobs: Vec<FetchJob>) -> Vec<FetchReport> {
        stream::iter(jobs)
            .map(|job| self.fetch_one(job))
            .buffer_unordered(self.workers)
            .collect()
            .await
    }

    pub async fn fetch_one(&self, job: FetchJob) -> FetchReport {
        let host_sem = self.host_semaphore(&job.url);
        let t0 = Instant::now();

        let (outcome, body) = match (host_sem.acquire().await, self.global.acquire().await) {
            (Ok(_h), Ok(_g)) => {
                match tokio::time::timeout(self.timeout, self.fetcher.get(&job.url)).await {
                    Err(_) => (
                        FetchOutcome::Timeout {
                            after_ms: self.timeout.as_millis() as u64,
                        },
                        None,
                    ),
                    Ok(Err(e)) => {
                        warn!(error = ?e, url = %job.url, fetcher = self.fetcher.name(), "fetch error");
                        let detail = match e.downcast_ref::<CurationError>() {
                            Some(CurationError::FetchFailure { reason, .. }) => reason.clone(),
                            _ => e.to_string(),
                        };
                        (
                            FetchOutcome::Blocked {
                                status: None,
                                detail,
                            },
                            None,
                        )
                    }
                    Ok(Ok(resp)) => (classify_response(&job.url, &resp), Some(resp.body)),
                }
            }
            _ => (
                FetchOutcome::Blocked {
                    status: None,
                    detail: "fetch pool closed".to_string(),
                },
                None,
            ),
        };

        let outcome = match outcome {
            FetchOutcome::Paywalled { status, .. } => FetchOutcome::Paywalled {
                status,
                headline_corroborated: self.confirm_headline(&job.headline, &job.url).await,
            },
            other => other,
        };

        let elapsed_ms = t0.elapsed().as_millis() as u64;
        histogram!("curator_fetch_ms").record(elapsed_ms as f64);
        debug!(url = %job.url, outcome = %outcome.describe(), elapsed_ms, "url checked");

        FetchReport {
            candidate_id: job.candidate_id,
            url: job.url,
            outcome,
            elapsed_ms,
            body,
        }
    }

    async fn confirm_headline(&self, headline: &str, url: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.corroborator.confirms_headline(headline, url))
            .await
        {
            Ok(Ok(b)) => b,
            Ok(Err(e)) => {
                warn!(error = ?e, url, "paywall confirmation failed");
                false
            }
            Err(_) => false,
        }
    }

    /// Run every search under the same worker bound as page fetches.
    /// Returns `(candidate_id, publishers)` pairs, order not preserved.
    pub async fn corroborate_all(&self, jobs: Vec<CorroborationJob>) -> Vec<(String, Vec<String>)> {
        stream::iter(jobs)
            .map(|job| async move {
                let sources = self.corroborating_sources(&job.headline).await;
                (job.candidate_id, sources)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await
    }

    /// Independent publishers reporting the same story. Errors and timeouts yield none.
    pub async fn corroborating_sources(&self, headline: &str) -> Vec<String> {
        let Ok(_permit) = self.global.acquire().await else {
            return Vec::new();
        };
        match tokio::time::timeout(self.timeout, self.corroborator.corroborating_sources(headline))
            .await
        {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(error = ?e, "corroboration search failed");
                Vec::new()
            }
            Err(_) => Vec::new(),
        }
    }

    fn host_semaphore(&self, url: &str) -> Arc<Semaphore> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .unwrap_or_default();
        let mut hosts = self.hosts.lock().unwrap_or_else(|p| p.into_inner());
        hosts
            .entry(host)
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok(url: &str, body: &str) -> PageResponse {
        PageResponse {
            status: 200,
            final_url: url.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn classify_statuses() {
        let u = "https://example.test/story/1";
        assert!(matches!(
            classify_response(u, &ok(u, "<p>hi</p>")),
            FetchOutcome::Success { status: 200, .. }
        ));
        let mut r = ok(u, "");
        r.status = 404;
        assert!(matches!(classify_response(u, &r), FetchOutcome::DeadLink { .. }));
        r.status = 429;
        assert!(matches!(classify_response(u, &r), FetchOutcome::Blocked { .. }));
        let home = ok("https://example.test/", "");
        assert!(matches!(classify_response(u, &home), FetchOutcome::DeadLink { .. }));
    }

    #[test]
    fn paywall_by_domain_or_marker() {
        let wsj = "https://www.wsj.com/articles/x";
        assert!(matches!(
            classify_response(wsj, &ok(wsj, "")),
            FetchOutcome::Paywalled { .. }
        ));
        let u = "https://example.test/a";
        assert!(matches!(
            classify_response(u, &ok(u, "<div>Subscribers only</div>")),
            FetchOutcome::Paywalled { .. }
        ));
        assert!(!is_paywall_domain("https://notft.com/a"));
    }

    struct Slow;

    #[async_trait]
    impl PageFetcher for Slow {
        async fn get(&self, _url: &str) -> Result<PageResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ok("https://slow.test/a", ""))
        }
        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn timeout_resolves_instead_of_blocking() {
        let pool = FetchPool::new(
            &FetchConfig::default(),
            Arc::new(Slow),
            Arc::new(RecordedCorroborator::default()),
        )
        .with_timeout(Duration::from_millis(50));
        let r = pool
            .fetch_one(FetchJob {
                candidate_id: "c1".into(),
                url: "https://slow.test/a".into(),
                headline: "h".into(),
            })
            .await;
        assert!(matches!(r.outcome, FetchOutcome::Timeout { .. }));
        assert!(!r.outcome.is_live());
    }

    struct Counting {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for Counting {
        async fn get(&self, url: &str) -> Result<PageResponse> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ok(url, ""))
        }
        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn per_host_limit_is_respected() {
        let fetcher = Arc::new(Counting {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let cfg = FetchConfig {
            workers: 8,
            per_host: 2,
            ..FetchConfig::default()
        };
        let pool = FetchPool::new(
            &cfg,
            fetcher.clone(),
            Arc::new(RecordedCorroborator::default()),
        );
        let jobs = (0..6)
            .map(|i| FetchJob {
                candidate_id: format!("c{i}"),
                url: format!("https://one-host.test/a/{i}"),
                headline: String::new(),
            })
            .collect();
        let out = pool.fetch_all(jobs).await;
        assert_eq!(out.len(), 6);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
    }

    struct CountingSearch {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Corroborator for CountingSearch {
        async fn confirms_headline(&self, _headline: &str, _url: &str) -> Result<bool> {
            Ok(false)
        }
        async fn corroborating_sources(&self, headline: &str) -> Result<Vec<String>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![format!("wire for {headline}")])
        }
    }

    #[tokio::test]
    async fn corroboration_searches_share_the_worker_bound() {
        let search = Arc::new(CountingSearch {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let cfg = FetchConfig {
            workers: 3,
            ..FetchConfig::default()
        };
        let pool = FetchPool::new(&cfg, Arc::new(RecordedFetcher::default()), search.clone());
        let jobs = (0..9)
            .map(|i| CorroborationJob {
                candidate_id: format!("c{i}"),
                headline: format!("claim {i}"),
            })
            .collect();
        let mut out = pool.corroborate_all(jobs).await;
        out.sort();
        assert_eq!(out.len(), 9);
        assert_eq!(out[0], ("c0".to_string(), vec!["wire for claim 0".to_string()]));
        let peak = search.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak {peak}");
        assert!(peak > 1, "searches ran one at a time");
    }

    #[tokio::test]
    async fn missing_recorded_page_is_a_fetch_failure() {
        let fetcher = RecordedFetcher::default();
        let err = fetcher.get("https://example.test/gone").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CurationError>(),
            Some(CurationError::FetchFailure { .. })
        ));

        let pool = FetchPool::new(
            &FetchConfig::default(),
            Arc::new(fetcher),
            Arc::new(RecordedCorroborator::default()),
        );
        let r = pool
            .fetch_one(FetchJob {
                candidate_id: "c".into(),
                url: "https://example.test/gone".into(),
                headline: String::new(),
            })
            .await;
        assert_eq!(
            r.outcome,
            FetchOutcome::Blocked {
                status: None,
                detail: "no recorded page".into()
            }
        );
    }

    #[tokio::test]
    async fn paywall_confirmed_by_recorded_search() {
        let url = "https://www.ft.com/content/abc";
        let fetcher = RecordedFetcher::new([(url.to_string(), ok(url, ""))]);
        let corr = RecordedCorroborator {
            confirmations: vec![RecordedConfirmation {
                url: format!("{url}?share=1"),
                headline: "ECB holds rates steady".into(),
            }],
            coverage: vec![],
        };
        let pool = FetchPool::new(&FetchConfig::default(), Arc::new(fetcher), Arc::new(corr));
        let r = pool
            .fetch_one(FetchJob {
                candidate_id: "c".into(),
                url: url.into(),
                headline: "ECB holds rates steady".into(),
            })
            .await;
        assert_eq!(
            r.outcome,
            FetchOutcome::Paywalled {
                status: 200,
                headline_corroborated: true
            }
        );
        assert!(r.outcome.is_live());
    }
}
