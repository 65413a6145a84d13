//! trawl - demo runner for the crawl runtime core.
//!
//! Crawls a simulated site: every page links to a few children until the
//! configured depth. Paths containing `flaky` fail transiently at first,
//! paths containing `gone` fail permanently.
//!
//! Usage:
//!   trawl --seed https://example.com/                 # crawl with defaults
//!   trawl --config trawl.toml --seed https://a.test/  # settings from TOML
//!   trawl --state-dir /tmp/trawl --dead-letters dlq.jsonl
//!
//! Killing the process mid-run and starting it again with the same state
//! directory re-processes every task that was in flight.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use trawl_core::app::{Collaborators, RunConfig, RunContext, WorkerGroup};
use trawl_core::ports::{
    FetchError, FetchedContent, Fetcher, ParseError, ParsedDocument, ParserRegistry,
};
use trawl_core::routing::{CatchAll, CollectLinks, ProcessingPipeline, ProcessingRouteResolver, Route};

#[derive(Parser)]
#[command(name = "trawl", version, about = "Run a crawl against a simulated site")]
struct Cli {
    /// TOML run configuration; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed URI (repeatable)
    #[arg(short, long = "seed", default_value = "https://example.com/")]
    seeds: Vec<Url>,

    /// State directory (overrides the configuration file)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Number of workers (overrides the configuration file)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Transient failures served by `flaky` pages before they start succeeding
    #[arg(long, default_value = "2")]
    flaky_failures: u32,

    /// Write dead-lettered tasks as JSON lines to this file
    #[arg(long)]
    dead_letters: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Serves a synthetic site.
struct SimulatedSite {
    flaky_failures: u32,
    flaky_served: AtomicU32,
    max_depth: usize,
}

#[async_trait]
impl Fetcher for SimulatedSite {
    async fn fetch(&self, uri: &Url) -> Result<FetchedContent, FetchError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let path = uri.path();

        if path.contains("gone") {
            return Err(FetchError::Permanent(format!("404 for {uri}")));
        }
        if path.contains("flaky")
            && self.flaky_served.fetch_add(1, Ordering::Relaxed) < self.flaky_failures
        {
            return Err(FetchError::Transient(format!("503 for {uri}")));
        }

        let depth = path.split('/').filter(|s| !s.is_empty()).count();
        let mut body = String::new();
        if depth < self.max_depth {
            let base = if path.ends_with('/') {
                uri.clone()
            } else {
                Url::parse(&format!("{uri}/")).map_err(|e| FetchError::Permanent(e.to_string()))?
            };
            for child in ["a", "b", "flaky", "gone"] {
                if let Ok(link) = base.join(child) {
                    body.push_str(link.as_str());
                    body.push('\n');
                }
            }
        }
        Ok(FetchedContent::ok(uri.clone(), body).with_content_type("text/uri-list"))
    }
}

/// One absolute URI per line.
struct UriListParser;

impl ParserRegistry for UriListParser {
    fn parse(&self, content: &FetchedContent) -> Result<ParsedDocument, ParseError> {
        let text = std::str::from_utf8(&content.body)
            .map_err(|e| ParseError::unrecoverable(format!("not utf-8: {e}")))?;
        let links = text
            .lines()
            .filter_map(|line| Url::parse(line.trim()).ok())
            .collect::<Vec<_>>();
        Ok(ParsedDocument {
            data: serde_json::json!({ "links": links.len() }),
            links,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "trawl=debug,trawl_core=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::defaults(),
    };
    if let Some(dir) = cli.state_dir {
        config.persistence.dir = dir;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    let max_depth = config.max_depth.unwrap_or(2) as usize;
    config.max_depth = Some(max_depth as u32);
    let workers = config.workers;

    let routes = ProcessingRouteResolver::new().with(Route::new(
        "default",
        CatchAll,
        ProcessingPipeline::new("follow-links").step(CollectLinks),
    ))?;
    let site = SimulatedSite {
        flaky_failures: cli.flaky_failures,
        flaky_served: AtomicU32::new(0),
        max_depth,
    };
    let ctx = Arc::new(RunContext::open(
        config,
        routes,
        Collaborators::new(Arc::new(site), Arc::new(UriListParser)),
    )?);

    let report = ctx.restore()?;
    if !report.is_clean() {
        warn!(
            reoffered = report.reoffered,
            rescheduled = report.rescheduled,
            "resuming tasks from a previous run"
        );
    }
    if report.dead_letters > 0 {
        info!(entries = report.dead_letters, "dead letters from previous runs");
    }
    for seed in cli.seeds {
        let id = ctx.seed(seed.clone(), "page");
        info!(task = %id, uri = %seed, "seeded");
    }

    let group = WorkerGroup::spawn(workers, Arc::clone(&ctx));
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("interrupted, shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                if ctx.is_drained() || group.is_stopping() {
                    break;
                }
            }
        }
    }
    group.shutdown_and_join().await?;

    let counts = ctx.counts();
    println!("{}", serde_json::to_string_pretty(&counts)?);

    if let Some(path) = cli.dead_letters {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        let written = ctx.dead_letters().export_jsonl(std::io::BufWriter::new(file))?;
        info!(path = %path.display(), entries = written, "exported dead letters");
    }
    Ok(())
}
