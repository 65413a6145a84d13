#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use url::Url;

use trawl_core::app::{Collaborators, RunConfig, RunContext};
use trawl_core::persistence::{PersistenceConfig, SnapshotPolicy};
use trawl_core::ports::{
    Clock, FetchError, FetchedContent, Fetcher, ManualClock, ParseError, ParsedDocument,
    ParserRegistry,
};
use trawl_core::queue::RetryPolicy;
use trawl_core::routing::{CatchAll, CollectLinks, ProcessingPipeline, ProcessingRouteResolver, Route};

/// Scripted responses per URI; anything unscripted answers 200 with an empty
/// body. Records the clock time of every call.
pub struct Site {
    clock: Arc<dyn Clock>,
    script: Mutex<HashMap<String, VecDeque<Result<FetchedContent, FetchError>>>>,
    always_failing: Mutex<Vec<String>>,
    calls: Mutex<Vec<(Url, DateTime<Utc>)>>,
}

impl Site {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            script: Mutex::new(HashMap::new()),
            always_failing: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn links(&self, uri: &str, links: &[&str]) {
        self.script
            .lock()
            .unwrap()
            .entry(uri.to_string())
            .or_default()
            .push_back(Ok(FetchedContent::ok(url(uri), links.join("\n"))));
    }

    /// Next fetch of `uri` fails with `error`.
    pub fn fail(&self, uri: &str, error: FetchError) {
        self.script
            .lock()
            .unwrap()
            .entry(uri.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Every fetch of `uri` fails transiently.
    pub fn down(&self, uri: &str) {
        self.always_failing.lock().unwrap().push(uri.to_string());
    }

    pub fn calls(&self) -> Vec<(Url, DateTime<Utc>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetched(&self, uri: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(u, _)| u.as_str() == uri)
            .count()
    }
}

#[async_trait]
impl Fetcher for Site {
    async fn fetch(&self, uri: &Url) -> Result<FetchedContent, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((uri.clone(), self.clock.now()));
        if self
            .always_failing
            .lock()
            .unwrap()
            .iter()
            .any(|u| u == uri.as_str())
        {
            return Err(FetchError::Transient("connection reset".into()));
        }
        let scripted = self
            .script
            .lock()
            .unwrap()
            .get_mut(uri.as_str())
            .and_then(|q| q.pop_front());
        scripted.unwrap_or_else(|| Ok(FetchedContent::ok(uri.clone(), Vec::new())))
    }
}

pub struct LineParser;

impl ParserRegistry for LineParser {
    fn parse(&self, content: &FetchedContent) -> Result<ParsedDocument, ParseError> {
        let text = std::str::from_utf8(&content.body)
            .map_err(|e| ParseError::unrecoverable(e.to_string()))?;
        Ok(ParsedDocument {
            data: serde_json::Value::Null,
            links: text.lines().filter_map(|l| Url::parse(l).ok()).collect(),
        })
    }
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ))
}

pub fn config(dir: &Path) -> RunConfig {
    RunConfig {
        workers: 1,
        idle_backoff: Duration::from_millis(1),
        max_depth: None,
        politeness_interval: Duration::ZERO,
        retry: RetryPolicy::immediate(2),
        persistence: PersistenceConfig {
            snapshot: SnapshotPolicy::manual(),
            ..PersistenceConfig::in_dir(dir)
        },
    }
}

pub fn routes() -> ProcessingRouteResolver {
    ProcessingRouteResolver::new()
        .with(Route::new(
            "default",
            CatchAll,
            ProcessingPipeline::new("follow").step(CollectLinks),
        ))
        .unwrap()
}

pub fn open(config: RunConfig, site: Arc<Site>, clock: Arc<dyn Clock>) -> RunContext {
    RunContext::open(
        config,
        routes(),
        Collaborators::new(site, Arc::new(LineParser)).with_clock(clock),
    )
    .unwrap()
}
