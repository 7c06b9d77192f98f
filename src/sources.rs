//! Source adapters and raw intake.
//!
//! Adapters hand over untrusted [`RawCandidate`]s. Intake normalizes headlines,
//! fills social identifiers from the post URL, skips records with nothing to
//! check, and collapses exact-URL duplicates. Adapter failures are logged and
//! counted but never fail the run; every skip, collapse and failure is returned
//! for the audit record.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::candidate::{candidate_id, normalize_handle, CandidateKind, RawCandidate};
use crate::chronology::{extract_handle, extract_status_id};

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch_candidates(&self) -> Result<Vec<RawCandidate>>;
    fn name(&self) -> &'static str;
}

/// Normalize text: decode entities, strip tags, collapse whitespace, trim trailing punctuation.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // keep '?' and '!': they are part of a headline
    while let Some(last) = out.chars().last() {
        if matches!(last, '.' | ',') {
            out.pop();
        } else {
            break;
        }
    }

    if out.chars().count() > 1500 {
        out = out.chars().take(1500).collect();
    }
    out
}

// --- JSON file adapter ---

/// Recorded or operator-supplied candidates: a JSON array, or `{"candidates": [...]}`.
pub struct JsonFileAdapter {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonInput {
    List(Vec<RawCandidate>),
    Wrapped { candidates: Vec<RawCandidate> },
}

impl JsonFileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(s: &str) -> Result<Vec<RawCandidate>> {
        let input: JsonInput = serde_json::from_str(s).context("parsing candidate JSON")?;
        Ok(match input {
            JsonInput::List(v) => v,
            JsonInput::Wrapped { candidates } => candidates,
        })
    }
}

#[async_trait]
impl SourceAdapter for JsonFileAdapter {
    async fn fetch_candidates(&self) -> Result<Vec<RawCandidate>> {
        let t0 = std::time::Instant::now();
        let s = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let out = Self::parse(&s)?;
        histogram!("curator_adapter_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "json-file"
    }
}

// --- RSS adapter ---

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

enum Feed {
    Inline(String),
    Http { url: String, client: reqwest::Client },
}

/// RSS 2.0 feed from one publisher. `pubDate` becomes the search-result date hint.
pub struct RssFeedAdapter {
    source: String,
    feed: Feed,
}

impl RssFeedAdapter {
    pub fn from_xml(source: impl Into<String>, xml: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            feed: Feed::Inline(xml.into()),
        }
    }

    pub fn from_url(source: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            feed: Feed::Http {
                url: url.into(),
                client: reqwest::Client::new(),
            },
        }
    }

    fn parse_items(&self, s: &str) -> Result<Vec<RawCandidate>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean)
            .with_context(|| format!("parsing rss xml for {}", self.source))?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let headline = normalize_text(it.title.as_deref().unwrap_or_default());
            let Some(url) = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())
            else {
                continue;
            };
            if headline.is_empty() {
                continue;
            }
            out.push(RawCandidate {
                headline,
                url,
                source: self.source.clone(),
                kind: CandidateKind::Article,
                raw_content: None,
                raw_text: it
                    .description
                    .as_deref()
                    .map(normalize_text)
                    .filter(|d| !d.is_empty()),
                search_date: it.pub_date,
                status_id: None,
                handle: None,
            });
        }

        histogram!("curator_adapter_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for RssFeedAdapter {
    async fn fetch_candidates(&self) -> Result<Vec<RawCandidate>> {
        match &self.feed {
            Feed::Inline(s) => self.parse_items(s),
            Feed::Http { url, client } => {
                let body = client
                    .get(url.as_str())
                    .send()
                    .await
                    .with_context(|| format!("rss get {url}"))?
                    .error_for_status()
                    .with_context(|| format!("rss status {url}"))?
                    .text()
                    .await
                    .context("rss body")?;
                self.parse_items(&body)
            }
        }
    }

    fn name(&self) -> &'static str {
        "rss"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

// --- intake ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterFailure {
    pub adapter: String,
    pub error: String,
}

/// A record that never became a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub url: String,
    pub headline: String,
    pub reason: String,
}

/// Exact-URL collapse: `dropped_url` normalized to the same identity as `kept_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDuplicate {
    pub candidate_id: String,
    pub kept_url: String,
    pub kept_source: String,
    pub dropped_url: String,
    pub dropped_source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intake {
    pub candidates: Vec<RawCandidate>,
    pub duplicates: Vec<RawDuplicate>,
    pub skipped: Vec<SkippedRecord>,
    pub failures: Vec<AdapterFailure>,
}

/// Pull every adapter, then normalize and collapse.
pub async fn collect(adapters: &[Box<dyn SourceAdapter>]) -> Intake {
    let mut raw = Vec::new();
    let mut failures = Vec::new();
    for a in adapters {
        match a.fetch_candidates().await {
            Ok(mut v) => {
                tracing::debug!(adapter = a.name(), count = v.len(), "adapter returned candidates");
                raw.append(&mut v);
            }
            Err(e) => {
                tracing::warn!(error = ?e, adapter = a.name(), "adapter error");
                counter!("curator_adapter_errors_total").increment(1);
                failures.push(AdapterFailure {
                    adapter: a.name().to_string(),
                    error: format!("{e:#}"),
                });
            }
        }
    }
    let mut intake = intake(raw);
    intake.failures = failures;
    intake
}

/// Normalize, skip unusable records and collapse exact-URL duplicates, first seen wins.
pub fn intake(raw: Vec<RawCandidate>) -> Intake {
    let mut out = Intake::default();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for r in raw {
        let r = prepare(r);
        if r.url.is_empty() {
            out.skipped.push(skipped(&r, "missing url"));
            continue;
        }
        if r.headline.is_empty() {
            out.skipped.push(skipped(&r, "empty headline"));
            continue;
        }
        let id = candidate_id(r.kind, &r.url, r.handle.as_deref(), r.status_id);
        if let Some(&i) = seen.get(&id) {
            let kept = &mut out.candidates[i];
            out.duplicates.push(RawDuplicate {
                candidate_id: id,
                kept_url: kept.url.clone(),
                kept_source: kept.source.clone(),
                dropped_url: r.url.clone(),
                dropped_source: r.source.clone(),
            });
            // a later copy may carry evidence the first lacked
            if kept.raw_content.is_none() {
                kept.raw_content = r.raw_content;
            }
            if kept.search_date.is_none() {
                kept.search_date = r.search_date;
            }
            continue;
        }
        seen.insert(id, out.candidates.len());
        out.candidates.push(r);
    }

    counter!("curator_candidates_total").increment(out.candidates.len() as u64);
    out
}

fn skipped(r: &RawCandidate, reason: &str) -> SkippedRecord {
    SkippedRecord {
        url: r.url.clone(),
        headline: r.headline.clone(),
        reason: reason.to_string(),
    }
}

/// Trim fields, normalize the headline, and take social identifiers from the URL when absent.
pub fn prepare(mut r: RawCandidate) -> RawCandidate {
    r.headline = normalize_text(&r.headline);
    r.url = r.url.trim().to_string();
    r.source = r.source.trim().to_string();
    if r.kind == CandidateKind::SocialPost {
        if r.status_id.is_none() {
            r.status_id = extract_status_id(&r.url);
        }
        r.handle = r
            .handle
            .as_deref()
            .and_then(normalize_handle)
            .or_else(|| extract_handle(&r.url));
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(headline: &str, url: &str, source: &str) -> RawCandidate {
        RawCandidate {
            headline: headline.into(),
            url: url.into(),
            source: source.into(),
            kind: CandidateKind::Article,
            raw_content: None,
            raw_text: None,
            search_date: None,
            status_id: None,
            handle: None,
        }
    }

    #[test]
    fn normalize_text_decodes_and_collapses() {
        assert_eq!(
            normalize_text("  <b>Fed&nbsp;holds</b>   rates &amp; signals\n cuts.  "),
            "Fed holds rates & signals cuts"
        );
        assert_eq!(normalize_text("Is this the end?"), "Is this the end?");
        assert_eq!(normalize_text("\u{201C}Quoted\u{201D}"), "\"Quoted\"");
    }

    #[test]
    fn exact_url_duplicates_collapse_and_are_recorded() {
        let mut second = raw("Fed holds rates", "https://www.reuters.com/a/1?utm_source=x", "Reuters");
        second.search_date = Some("2 hours ago".into());
        let out = intake(vec![
            raw("Fed holds rates", "https://www.reuters.com/a/1/", "Reuters"),
            second,
            raw("Other story", "https://www.reuters.com/a/2", "Reuters"),
        ]);
        assert_eq!(out.candidates.len(), 2);
        assert_eq!(out.duplicates.len(), 1);
        assert_eq!(out.candidates[0].search_date.as_deref(), Some("2 hours ago"));
    }

    #[test]
    fn unusable_records_are_skipped_with_reason() {
        let out = intake(vec![raw("  ", "https://a.test/x", "A"), raw("Headline", "", "A")]);
        assert!(out.candidates.is_empty());
        let reasons: Vec<_> = out.skipped.iter().map(|s| s.reason.as_str()).collect();
        assert_eq!(reasons, ["empty headline", "missing url"]);
    }

    #[test]
    fn social_identifiers_come_from_the_url() {
        let mut r = raw("Launch update", "https://x.com/SpaceX/status/1893000000000000000", "");
        r.kind = CandidateKind::SocialPost;
        let r = prepare(r);
        assert_eq!(r.status_id, Some(1_893_000_000_000_000_000));
        assert_eq!(r.handle.as_deref(), Some("SpaceX"));
    }

    #[test]
    fn same_post_with_and_without_at_sign_collapses() {
        let mut a = raw("Shipping notes", "https://x.com/SimonW/status/1890000000000000001", "X");
        a.kind = CandidateKind::SocialPost;
        a.handle = Some(" @SimonW".into());
        let mut b = raw("Shipping notes", "https://twitter.com/SimonW/status/1890000000000000001", "X");
        b.kind = CandidateKind::SocialPost;

        let out = intake(vec![a, b]);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.duplicates.len(), 1);
        assert_eq!(out.candidates[0].handle.as_deref(), Some("SimonW"));

        let id = crate::candidate::Candidate::from_raw(&out.candidates[0]).id().to_string();
        assert_eq!(out.duplicates[0].candidate_id, id);
    }

    #[test]
    fn bare_at_sign_falls_back_to_the_url_handle() {
        let mut r = raw("Launch update", "https://x.com/SpaceX/status/1893000000000000000", "");
        r.kind = CandidateKind::SocialPost;
        r.handle = Some("@".into());
        assert_eq!(prepare(r).handle.as_deref(), Some("SpaceX"));
    }

    #[tokio::test]
    async fn rss_items_become_article_candidates() {
        let xml = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel><title>World</title>
              <item><title>Ceasefire talks resume&nbsp;in Doha</title>
                <link>https://www.bbc.com/news/world-1</link>
                <pubDate>Mon, 23 Feb 2026 06:00:00 GMT</pubDate>
                <description>&lt;p&gt;Negotiators meet again.&lt;/p&gt;</description></item>
              <item><title></title><link>https://www.bbc.com/news/world-2</link></item>
            </channel></rss>"#;
        let a = RssFeedAdapter::from_xml("BBC", xml);
        let items = a.fetch_candidates().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].headline, "Ceasefire talks resume in Doha");
        assert_eq!(items[0].source, "BBC");
        assert_eq!(items[0].raw_text.as_deref(), Some("Negotiators meet again"));
        assert_eq!(
            items[0].search_date.as_deref(),
            Some("Mon, 23 Feb 2026 06:00:00 GMT")
        );
    }

    struct Failing;

    #[async_trait]
    impl SourceAdapter for Failing {
        async fn fetch_candidates(&self) -> Result<Vec<RawCandidate>> {
            anyhow::bail!("search quota exhausted")
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn adapter_failure_is_recorded_not_fatal() {
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(Failing),
            Box::new(RssFeedAdapter::from_xml(
                "NPR",
                "<rss><channel><item><title>Storm hits coast</title><link>https://www.npr.org/1</link></item></channel></rss>",
            )),
        ];
        let out = collect(&adapters).await;
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.failures.len(), 1);
        assert!(out.failures[0].error.contains("quota"));
    }
}
