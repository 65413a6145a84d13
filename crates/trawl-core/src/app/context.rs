//! RunContext - everything one crawl run shares between its workers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::info;
use url::Url;

use super::{RunConfig, RunCounts, RunStats};
use crate::domain::{CrawlError, Decider, ProcessingTask, RoutingHint, TaskId};
use crate::impls::{AllowAll, HostLaneResolver};
use crate::inflight::InFlightBuffer;
use crate::persistence::{Codec, Persistence, RecoveryReport, StateBootstrapper};
use crate::politeness::{GateKind, PolitenessPolicy};
use crate::ports::{
    Clock, Fetcher, IdGenerator, LaneKeyResolver, ParserRegistry, ScopePolicy, SystemClock,
    UlidGenerator,
};
use crate::queue::{DeadLetterLog, DeadLetterQueue, Frontier, RetryBuffer, SeenStore};
use crate::routing::ProcessingRouteResolver;

/// External collaborators of a run.
///
/// Only the fetcher and parser are mandatory; the rest default to accepting
/// every task, one lane per host and the system clock.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn ParserRegistry>,
    pub scope: Arc<dyn ScopePolicy>,
    pub lanes: Arc<dyn LaneKeyResolver>,
    pub clock: Arc<dyn Clock>,
    pub decider: Option<Arc<dyn Decider>>,
    pub codec: Option<Arc<dyn Codec>>,
}

impl Collaborators {
    pub fn new(fetcher: Arc<dyn Fetcher>, parser: Arc<dyn ParserRegistry>) -> Self {
        Self {
            fetcher,
            parser,
            scope: Arc::new(AllowAll),
            lanes: Arc::new(HostLaneResolver),
            clock: Arc::new(SystemClock),
            decider: None,
            codec: None,
        }
    }

    pub fn with_scope(mut self, scope: Arc<dyn ScopePolicy>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_lanes(mut self, lanes: Arc<dyn LaneKeyResolver>) -> Self {
        self.lanes = lanes;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the configured retry policy as the outcome classifier.
    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    /// Uses a codec not selectable from configuration.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }
}

/// Shared state of one run: stores, policies, collaborators and routes.
pub struct RunContext {
    config: RunConfig,
    frontier: Frontier,
    seen: SeenStore,
    retries: RetryBuffer,
    dead_letters: DeadLetterQueue,
    in_flight: InFlightBuffer,
    politeness: PolitenessPolicy,
    decider: Arc<dyn Decider>,
    routes: ProcessingRouteResolver,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn ParserRegistry>,
    scope: Arc<dyn ScopePolicy>,
    clock: Arc<dyn Clock>,
    ids: UlidGenerator,
    stats: RunStats,
    activity: Activity,
}

/// Ticks in progress plus a counter bumped whenever a tick takes a task, so
/// a drain check can tell that nothing moved while it looked at the queues.
#[derive(Debug, Default)]
pub(crate) struct Activity {
    active: AtomicUsize,
    picked: AtomicU64,
}

impl Activity {
    pub(crate) fn enter(&self) -> ActiveTick<'_> {
        self.active.fetch_add(1, Ordering::SeqCst);
        ActiveTick(self)
    }

    fn read(&self) -> (usize, u64) {
        (
            self.active.load(Ordering::SeqCst),
            self.picked.load(Ordering::SeqCst),
        )
    }
}

pub(crate) struct ActiveTick<'a>(&'a Activity);

impl ActiveTick<'_> {
    pub(crate) fn picked(&self) {
        self.0.picked.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for ActiveTick<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RunContext {
    /// Validates the configuration, opens the state directory and wires the
    /// run. Does not restore previous state; call [`RunContext::restore`]
    /// before starting workers.
    pub fn open(
        config: RunConfig,
        routes: ProcessingRouteResolver,
        collaborators: Collaborators,
    ) -> Result<Self, CrawlError> {
        config.validate()?;
        if routes.is_empty() {
            return Err(CrawlError::NoRoutes);
        }

        let Collaborators {
            fetcher,
            parser,
            scope,
            lanes,
            clock,
            decider,
            codec,
        } = collaborators;

        let persistence = match codec {
            Some(codec) => Persistence::open_with_codec(config.persistence.clone(), codec)?,
            None => Persistence::open(config.persistence.clone())?,
        };
        let dead_letters =
            DeadLetterQueue::with_log(DeadLetterLog::open(config.persistence.dead_letter_path())?);
        let in_flight = InFlightBuffer::new(Arc::new(persistence), Arc::clone(&clock));
        let politeness =
            PolitenessPolicy::new(lanes, GateKind::for_interval(config.politeness_interval));
        let decider: Arc<dyn Decider> = match decider {
            Some(decider) => decider,
            None => Arc::new(config.retry.clone()),
        };

        info!(
            workers = config.workers,
            routes = ?routes.names(),
            dir = %config.persistence.dir.display(),
            "run context ready"
        );

        Ok(Self {
            frontier: Frontier::new(),
            seen: SeenStore::new(),
            retries: RetryBuffer::new(),
            dead_letters,
            in_flight,
            politeness,
            decider,
            routes,
            fetcher,
            parser,
            scope,
            ids: UlidGenerator::new(Arc::clone(&clock)),
            clock,
            stats: RunStats::new(),
            activity: Activity::default(),
            config,
        })
    }

    /// Rebuilds open tasks and the dead-letter archive from the state
    /// directory. Run once, before workers.
    pub fn restore(&self) -> Result<RecoveryReport, CrawlError> {
        self.bootstrapper().restore()
    }

    pub fn bootstrapper(&self) -> StateBootstrapper<'_> {
        StateBootstrapper::new(
            &self.in_flight,
            &self.frontier,
            &self.retries,
            &self.seen,
            &self.dead_letters,
        )
    }

    /// Offers a new seed task to the frontier.
    pub fn seed(&self, uri: Url, hint: impl Into<String>) -> TaskId {
        let task = ProcessingTask::seed(
            self.ids.generate_task_id(),
            uri,
            RoutingHint::new(hint),
            self.clock.now(),
        );
        let id = task.id();
        self.frontier.offer(task);
        id
    }

    /// Nothing queued, parked or in flight, and no worker moved a task while
    /// this was checked.
    pub fn is_drained(&self) -> bool {
        let before = self.activity.read();
        let empty =
            self.frontier.is_empty() && self.retries.is_empty() && self.in_flight.is_empty();
        let after = self.activity.read();
        empty && before.0 == 0 && before == after
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            frontier: self.frontier.len(),
            retry_scheduled: self.retries.len(),
            in_flight: self.in_flight.len(),
            dead_letters: self.dead_letters.len(),
            seen: self.seen.len(),
            ..RunCounts::from_stats(&self.stats)
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn seen(&self) -> &SeenStore {
        &self.seen
    }

    pub fn retries(&self) -> &RetryBuffer {
        &self.retries
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    pub fn in_flight(&self) -> &InFlightBuffer {
        &self.in_flight
    }

    pub fn politeness(&self) -> &PolitenessPolicy {
        &self.politeness
    }

    pub fn decider(&self) -> &dyn Decider {
        self.decider.as_ref()
    }

    pub fn routes(&self) -> &ProcessingRouteResolver {
        &self.routes
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    pub fn parser(&self) -> &dyn ParserRegistry {
        self.parser.as_ref()
    }

    pub fn scope(&self) -> &dyn ScopePolicy {
        self.scope.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn ids(&self) -> &dyn IdGenerator {
        &self.ids
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub(crate) fn activity(&self) -> &Activity {
        &self.activity
    }
}
