//! Route table: ordered (name, matcher, pipeline) entries, first match wins.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::ProcessingPipeline;
use crate::app::RunContext;
use crate::domain::{CrawlError, ProcessingTask, RoutingHint};

/// Predicate deciding whether a route handles a task.
pub trait RouteMatcher: Send + Sync {
    fn matches(&self, task: &ProcessingTask, ctx: &RunContext) -> bool;
}

impl<F> RouteMatcher for F
where
    F: Fn(&ProcessingTask, &RunContext) -> bool + Send + Sync,
{
    fn matches(&self, task: &ProcessingTask, ctx: &RunContext) -> bool {
        self(task, ctx)
    }
}

/// Matches tasks carrying exactly this routing hint.
#[derive(Debug, Clone)]
pub struct HintMatcher(pub RoutingHint);

impl RouteMatcher for HintMatcher {
    fn matches(&self, task: &ProcessingTask, _ctx: &RunContext) -> bool {
        task.hint() == &self.0
    }
}

/// Matches every task. Register last as a default route.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatchAll;

impl RouteMatcher for CatchAll {
    fn matches(&self, _task: &ProcessingTask, _ctx: &RunContext) -> bool {
        true
    }
}

pub struct Route {
    name: String,
    matcher: Box<dyn RouteMatcher>,
    pipeline: Arc<ProcessingPipeline>,
}

impl Route {
    pub fn new(
        name: impl Into<String>,
        matcher: impl RouteMatcher + 'static,
        pipeline: ProcessingPipeline,
    ) -> Self {
        Self {
            name: name.into(),
            matcher: Box::new(matcher),
            pipeline: Arc::new(pipeline),
        }
    }

    /// Route for one routing hint; the route takes the hint as its name.
    pub fn for_hint(hint: impl Into<String>, pipeline: ProcessingPipeline) -> Self {
        let hint = hint.into();
        Self::new(hint.clone(), HintMatcher(RoutingHint::new(hint)), pipeline)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &Arc<ProcessingPipeline> {
        &self.pipeline
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("pipeline", &self.pipeline.name())
            .finish()
    }
}

/// Ordered routes, first match wins.
///
/// Built during initialization, read-only while workers run.
#[derive(Debug, Default)]
pub struct ProcessingRouteResolver {
    routes: Vec<Route>,
    names: HashSet<String>,
}

impl ProcessingRouteResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a route. Names must be unique.
    pub fn register(&mut self, route: Route) -> Result<(), CrawlError> {
        if !self.names.insert(route.name.clone()) {
            return Err(CrawlError::DuplicateRoute(route.name));
        }
        self.routes.push(route);
        Ok(())
    }

    pub fn with(mut self, route: Route) -> Result<Self, CrawlError> {
        self.register(route)?;
        Ok(self)
    }

    pub fn resolve(&self, task: &ProcessingTask, ctx: &RunContext) -> Option<&Route> {
        let route = self.routes.iter().find(|r| r.matcher.matches(task, ctx));
        if route.is_none() {
            debug!(task = %task.id(), hint = %task.hint(), "no route matched");
        }
        route
    }

    pub fn names(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
