//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use url::Url;

use crate::app::{Collaborators, RunConfig, RunContext};
use crate::persistence::{PersistenceConfig, SnapshotPolicy};
use crate::ports::{
    FetchError, FetchedContent, Fetcher, ManualClock, ParseError, ParsedDocument, ParserRegistry,
};
use crate::queue::RetryPolicy;
use crate::routing::{CatchAll, CollectLinks, ProcessingPipeline, ProcessingRouteResolver, Route};

/// Serves scripted responses per URI; unscripted URIs answer 200 with an
/// empty body.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<HashMap<String, VecDeque<Result<FetchedContent, FetchError>>>>,
    calls: Mutex<Vec<Url>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, uri: &str, response: Result<FetchedContent, FetchError>) {
        self.script
            .lock()
            .entry(uri.to_string())
            .or_default()
            .push_back(response);
    }

    /// Body whose whitespace-separated tokens are links (see [`LinkParser`]).
    pub fn links(&self, uri: &str, links: &[&str]) {
        let url = Url::parse(uri).unwrap();
        self.respond(uri, Ok(FetchedContent::ok(url, links.join(" "))));
    }

    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, uri: &Url) -> Result<FetchedContent, FetchError> {
        self.calls.lock().push(uri.clone());
        let scripted = self
            .script
            .lock()
            .get_mut(uri.as_str())
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or_else(|| Ok(FetchedContent::ok(uri.clone(), Vec::new())))
    }
}

/// Treats every whitespace-separated token of the body that parses as an
/// absolute URL as a link.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkParser;

impl ParserRegistry for LinkParser {
    fn parse(&self, content: &FetchedContent) -> Result<ParsedDocument, ParseError> {
        let text = std::str::from_utf8(&content.body)
            .map_err(|e| ParseError::unrecoverable(e.to_string()))?;
        Ok(ParsedDocument {
            data: serde_json::json!({ "bytes": content.body.len() }),
            links: text
                .split_whitespace()
                .filter_map(|t| Url::parse(t).ok())
                .collect(),
        })
    }
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
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

/// One catch-all route following every parsed link.
pub fn follow_links() -> ProcessingRouteResolver {
    ProcessingRouteResolver::new()
        .with(Route::new(
            "default",
            CatchAll,
            ProcessingPipeline::new("follow").step(CollectLinks),
        ))
        .unwrap()
}

pub fn context(
    config: RunConfig,
    routes: ProcessingRouteResolver,
    fetcher: Arc<ScriptedFetcher>,
    clock: Arc<ManualClock>,
) -> RunContext {
    RunContext::open(
        config,
        routes,
        Collaborators::new(fetcher, Arc::new(LinkParser)).with_clock(clock),
    )
    .unwrap()
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}
