//! digest-curator CLI entrypoint.
//! `run` executes Phase 1, the persistence barrier and Phase 2; the other
//! subcommands are operator tools over the same tables and artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use digest_curator::audit::PersistedPool;
use digest_curator::candidate::CandidateKind;
use digest_curator::chronology::{self, extract_status_id, snowflake_instant};
use digest_curator::config::CuratorConfig;
use digest_curator::fetch::{
    FetchPool, HttpPageFetcher, PageFetcher, RecordedCorroborator, RecordedFetcher,
};
use digest_curator::metrics::Metrics;
use digest_curator::pipeline::{self, Curator, RunContext, RunOutcome};
use digest_curator::rules::RuleBook;
use digest_curator::sources::{JsonFileAdapter, RssFeedAdapter, SourceAdapter};
use digest_curator::tiers::{intended_section, TierTable};

/// Daily digest verification and curation
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Curator config file (overrides CURATOR_CONFIG_PATH / config/curator.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log lines instead of compact text
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Phase 1 (gate, dedup, tally, persist) then Phase 2 (select, reconcile)
    Run(RunArgs),
    /// Phase 2 only, over an existing phase1 artifact
    Select {
        #[arg(long)]
        pool: PathBuf,
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
    /// Classify a source name (and optional URL) against the tier table
    Tier {
        source: String,
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the distribution tally recorded in a phase1 artifact
    Tally { file: PathBuf },
    /// Compare a post's status id against a same-day reference post
    StatusId {
        candidate_url: String,
        reference_url: String,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// JSON file(s) of raw candidates
    #[arg(short, long, required = true)]
    input: Vec<PathBuf>,

    /// RSS feed as NAME=URL (repeatable)
    #[arg(long = "feed")]
    feeds: Vec<String>,

    /// Recorded search corroboration (confirmations + coverage)
    #[arg(long)]
    corroboration: Option<PathBuf>,

    /// Recorded page responses; skips live HTTP checks
    #[arg(long)]
    pages: Option<PathBuf>,

    /// Run instant (RFC 3339); defaults to the current time
    #[arg(long, value_parser = parse_now)]
    now: Option<DateTime<Utc>>,

    /// Artifact date (YYYY-MM-DD); defaults to the date of `now`
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Same-day post from a reference account, used for chronology checks
    #[arg(long)]
    reference_status_url: Option<String>,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Write the Prometheus exposition text here when the run ends
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

fn parse_now(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 timestamp: {e}"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("digest_curator=info,warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<CuratorConfig> {
    match path {
        Some(p) => CuratorConfig::load_from(p),
        None => CuratorConfig::load_default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env may carry CURATOR_* paths and RUST_LOG
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut cfg = load_config(cli.config.as_ref())?;
    match cli.command {
        Command::Run(args) => {
            if let Some(dir) = &args.output_dir {
                cfg.output_dir = dir.clone();
            }
            let metrics = match &args.metrics_out {
                Some(_) => Some(Metrics::init()?),
                None => None,
            };
            let result = run(cfg, &args).await;
            if let (Some(m), Some(path)) = (metrics, &args.metrics_out) {
                m.write_to(path)?;
            }
            report(result?);
        }
        Command::Select { pool, output_dir } => {
            if let Some(dir) = output_dir {
                cfg.output_dir = dir;
            }
            let rules = RuleBook::load_default()?;
            let pool = PersistedPool::load(&pool)?;
            report(pipeline::phase2(pool, &cfg, &rules)?);
        }
        Command::Tier { source, url } => {
            let tiers = TierTable::load_default()?;
            let info = tiers.classify(&source, url.as_deref());
            let section = intended_section(CandidateKind::Article, &info);
            println!("{}", serde_json::to_string_pretty(&info)?);
            println!("intended section: {section}");
        }
        Command::Tally { file } => {
            let pool = PersistedPool::load(&file)?;
            let record = pool.record();
            let out = serde_json::json!({
                "run_date": record.run_date,
                "ga_sources": record.summary.ga_sources,
                "ledger": record.tally.after,
                "actions": record.tally.actions,
                "outstanding": record.tally.outstanding,
                "warnings": record.tally.warnings,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::StatusId {
            candidate_url,
            reference_url,
        } => {
            let cand = extract_status_id(&candidate_url);
            let reference = extract_status_id(&reference_url);
            let check = chronology::check(cand, reference, cfg.chronology.max_delta);
            for (label, id) in [("candidate", cand), ("reference", reference)] {
                match id.and_then(|i| snowflake_instant(i).map(|t| (i, t))) {
                    Some((i, t)) => println!("{label}: {i} ({})", t.to_rfc3339()),
                    None => println!("{label}: no status id"),
                }
            }
            println!("{}", check.summary());
            check.ensure_passed()?;
        }
    }
    Ok(())
}

async fn run(cfg: CuratorConfig, args: &RunArgs) -> Result<RunOutcome> {
    let tiers = TierTable::load_default()?;
    let rules = RuleBook::load_default()?;

    let fetcher: Arc<dyn PageFetcher> = match &args.pages {
        Some(p) => Arc::new(RecordedFetcher::from_file(p)?),
        None => Arc::new(HttpPageFetcher::new(&cfg.fetch)?),
    };
    let corroborator = match &args.corroboration {
        Some(p) => RecordedCorroborator::from_file(p)?,
        None => {
            warn!("no corroboration file; paywalled and extraordinary items cannot be confirmed");
            RecordedCorroborator::default()
        }
    };
    let pool = FetchPool::new(&cfg.fetch, fetcher, Arc::new(corroborator));

    let mut adapters: Vec<Box<dyn SourceAdapter>> = args
        .input
        .iter()
        .map(|p| Box::new(JsonFileAdapter::new(p.clone())) as Box<dyn SourceAdapter>)
        .collect();
    for feed in &args.feeds {
        let (name, url) = feed
            .split_once('=')
            .ok_or_else(|| anyhow!("--feed expects NAME=URL, got '{feed}'"))?;
        adapters.push(Box::new(RssFeedAdapter::from_url(name.trim(), url.trim())));
    }

    let now = args.now.unwrap_or_else(Utc::now);
    let mut ctx = RunContext::at(now);
    if let Some(d) = args.date {
        ctx = ctx.with_run_date(d);
    }
    if let Some(u) = &args.reference_status_url {
        let id = extract_status_id(u)
            .with_context(|| format!("no status id in reference url {u}"))?;
        ctx = ctx.with_reference(Some(id));
    }

    let curator = Curator::new(cfg, tiers, rules, pool);
    info!(run_date = %ctx.run_date, now = %ctx.now.to_rfc3339(), "starting run");
    Ok(curator.run(&adapters, &ctx).await?)
}

fn report(outcome: RunOutcome) {
    let s = &outcome.pool.record().summary;
    info!(
        pool = %outcome.pool.path().display(),
        selection = %outcome.selection_path.display(),
        reconciliation = %outcome.report_path.display(),
        "artifacts written"
    );
    println!(
        "PASS {} / REJECT {} (superseded {}) → INCLUDE {} / CUT {}",
        s.passed, s.rejected, s.superseded, outcome.report.include_count, outcome.report.cut_count
    );
    for (section, n) in outcome.selection.section_counts() {
        println!("  {section}: {n}");
    }
}
