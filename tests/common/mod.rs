// tests/common/mod.rs
// Offline fixtures: recorded pages, recorded search results, and a JSON input file.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use digest_curator::audit::PersistedPool;
use digest_curator::candidate::{Candidate, CandidateKind, RawCandidate};
use digest_curator::config::CuratorConfig;
use digest_curator::fetch::{
    FetchPool, PageResponse, RecordedConfirmation, RecordedCorroborator, RecordedCoverage,
    RecordedFetcher,
};
use digest_curator::pipeline::{Curator, RunContext, RunOutcome};
use digest_curator::rules::RuleBook;
use digest_curator::sources::{JsonFileAdapter, SourceAdapter};
use digest_curator::tiers::TierTable;
use digest_curator::Result;

/// Same-day reference post id: one minute before `now()`.
pub const REF_STATUS_ID: u64 = 2_025_903_212_590_006_272;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 23, 12, 0, 0).unwrap()
}

pub fn ctx() -> RunContext {
    RunContext::at(now())
}

pub fn page(url: &str, published: Option<DateTime<Utc>>, headline: &str) -> PageResponse {
    let meta = published
        .map(|d| {
            format!(
                r#"<meta property="article:published_time" content="{}">"#,
                d.to_rfc3339()
            )
        })
        .unwrap_or_default();
    PageResponse {
        status: 200,
        final_url: url.to_string(),
        body: format!("<html><head>{meta}</head><body><h1>{headline}</h1></body></html>"),
    }
}

#[derive(Default)]
pub struct Fixture {
    pub raw: Vec<RawCandidate>,
    pub pages: Vec<(String, PageResponse)>,
    pub corroboration: RecordedCorroborator,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_raw(&mut self, headline: &str, url: &str, source: &str, kind: CandidateKind) {
        self.raw.push(RawCandidate {
            headline: headline.to_string(),
            url: url.to_string(),
            source: source.to_string(),
            kind,
            raw_content: None,
            raw_text: None,
            search_date: None,
            status_id: None,
            handle: None,
        });
    }

    /// Live article published `hours_ago` before `now()`.
    pub fn article(&mut self, headline: &str, url: &str, source: &str, hours_ago: i64) -> &mut Self {
        self.push_raw(headline, url, source, CandidateKind::Article);
        let published = now() - Duration::hours(hours_ago);
        self.pages
            .push((url.to_string(), page(url, Some(published), headline)));
        self
    }

    /// Dated article whose URL answers with `status`.
    pub fn article_status(
        &mut self,
        headline: &str,
        url: &str,
        source: &str,
        hours_ago: i64,
        status: u16,
    ) -> &mut Self {
        self.article(headline, url, source, hours_ago);
        if let Some((_, p)) = self.pages.last_mut() {
            p.status = status;
        }
        self
    }

    /// Live page with no date anywhere.
    pub fn undated(&mut self, headline: &str, url: &str, source: &str) -> &mut Self {
        self.push_raw(headline, url, source, CandidateKind::Article);
        self.pages.push((url.to_string(), page(url, None, headline)));
        self
    }

    /// Social post; its date comes from the status id.
    pub fn post(&mut self, handle: &str, status_id: u64, text: &str) -> &mut Self {
        let url = format!("https://x.com/{handle}/status/{status_id}");
        self.push_raw(text, &url, "X", CandidateKind::SocialPost);
        self.pages.push((
            url.clone(),
            PageResponse {
                status: 200,
                final_url: url,
                body: String::new(),
            },
        ));
        self
    }

    /// Search confirms a paywalled headline.
    pub fn confirm(&mut self, url: &str, headline: &str) -> &mut Self {
        self.corroboration.confirmations.push(RecordedConfirmation {
            url: url.to_string(),
            headline: headline.to_string(),
        });
        self
    }

    /// Search reports these publishers carrying the story.
    pub fn cover(&mut self, headline: &str, sources: &[&str]) -> &mut Self {
        self.corroboration.coverage.push(RecordedCoverage {
            headline: headline.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn config(out: &Path) -> CuratorConfig {
        CuratorConfig {
            output_dir: out.to_path_buf(),
            ..CuratorConfig::default()
        }
    }

    pub fn curator(&self, out: &Path) -> Curator {
        self.curator_with(Self::config(out))
    }

    pub fn curator_with(&self, cfg: CuratorConfig) -> Curator {
        let fetcher = RecordedFetcher::new(self.pages.clone());
        let pool = FetchPool::new(
            &cfg.fetch,
            Arc::new(fetcher),
            Arc::new(self.corroboration.clone()),
        );
        Curator::new(cfg, TierTable::default_seed(), RuleBook::default(), pool)
    }

    /// Write the raw candidates to `<dir>/input.json` and wrap them in an adapter.
    pub fn adapters(&self, dir: &Path) -> Vec<Box<dyn SourceAdapter>> {
        let path = dir.join("input.json");
        std::fs::write(&path, serde_json::to_vec_pretty(&self.raw).unwrap()).unwrap();
        vec![Box::new(JsonFileAdapter::new(path))]
    }

    pub async fn phase1(&self, dir: &Path, ctx: &RunContext) -> Result<PersistedPool> {
        let out = dir.join("out");
        self.curator(&out).phase1(&self.adapters(dir), ctx).await
    }

    pub async fn run(&self, dir: &Path, ctx: &RunContext) -> Result<RunOutcome> {
        let out = dir.join("out");
        self.curator(&out).run(&self.adapters(dir), ctx).await
    }
}

pub fn by_headline<'a>(pool: &'a PersistedPool, needle: &str) -> &'a Candidate {
    pool.record()
        .candidates
        .iter()
        .find(|c| c.headline().contains(needle))
        .unwrap_or_else(|| panic!("no candidate with headline containing '{needle}'"))
}
