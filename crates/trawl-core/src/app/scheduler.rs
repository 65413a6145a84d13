//! Scheduler - the per-task loop body.
//!
//! State machine per task:
//! `PENDING -> IN_FLIGHT -> {SUCCEEDED | RETRY_SCHEDULED -> PENDING | DEAD_LETTERED}`.
//!
//! One [`tick`]:
//! 1. move due retries back to the frontier
//! 2. poll the frontier (idle -> WAL/snapshot maintenance, return)
//! 3. dedup and scope check, first admission only
//! 4. politeness gate; a positive wait parks the task instead of sleeping
//! 5. `begin`, route, fetch, parse, run the pipeline
//! 6. classify the outcome and `complete` / `fail` accordingly
//!
//! No lock is held across any `.await` in here.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{RunContext, RunCounts};
use crate::domain::{
    CrawlError, DeadLetterReason, Decision, Failure, Outcome, ProcessingTask, TaskState,
};
use crate::inflight::FailOutcome;
use crate::ports::clock::to_chrono;
use crate::routing::ProcessingState;

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing was ready.
    Idle,
    Duplicate,
    OutOfScope,
    /// Parked by the politeness gate for `wait`.
    Deferred { wait: Duration },
    Succeeded { discovered: usize },
    Retried { due: DateTime<Utc> },
    DeadLettered { reason: DeadLetterReason },
}

impl TickOutcome {
    /// Lifecycle state the task ended the tick in, if one was handled.
    pub fn task_state(&self) -> Option<TaskState> {
        match self {
            TickOutcome::Idle | TickOutcome::Duplicate | TickOutcome::OutOfScope => None,
            TickOutcome::Deferred { .. } => Some(TaskState::Pending),
            TickOutcome::Succeeded { .. } => Some(TaskState::Succeeded),
            TickOutcome::Retried { .. } => Some(TaskState::RetryScheduled),
            TickOutcome::DeadLettered { .. } => Some(TaskState::DeadLettered),
        }
    }
}

/// Runs the loop body once.
///
/// Task failures never surface here; only infrastructure errors (the WAL)
/// do, and they should stop the run.
pub async fn tick(ctx: &RunContext) -> Result<TickOutcome, CrawlError> {
    let active = ctx.activity().enter();
    let now = ctx.clock().now();
    let due = ctx.retries().poll_due(now);
    if !due.is_empty() {
        debug!(count = due.len(), "retries due");
        ctx.frontier().offer_all(due);
    }

    let Some(task) = ctx.frontier().poll() else {
        ctx.in_flight().maintain()?;
        return Ok(TickOutcome::Idle);
    };
    active.picked();
    process(ctx, task, now).await
}

async fn process(
    ctx: &RunContext,
    task: ProcessingTask,
    now: DateTime<Utc>,
) -> Result<TickOutcome, CrawlError> {
    let task = if task.is_admitted() {
        task
    } else {
        if !ctx.seen().check_and_mark(task.fingerprint()) {
            debug!(task = %task.id(), uri = %task.uri(), "duplicate, discarded");
            ctx.stats().duplicate();
            return Ok(TickOutcome::Duplicate);
        }
        if !ctx.scope().in_scope(&task) {
            debug!(task = %task.id(), uri = %task.uri(), "out of scope, discarded");
            ctx.stats().out_of_scope();
            return Ok(TickOutcome::OutOfScope);
        }
        task.admitted()
    };

    let gate = ctx.politeness().check(&task, now);
    if !gate.wait.is_zero() {
        debug!(task = %task.id(), lane = %gate.lane, wait = ?gate.wait, "politeness deferral");
        ctx.retries().schedule(task, now + to_chrono(gate.wait));
        ctx.stats().deferred();
        return Ok(TickOutcome::Deferred { wait: gate.wait });
    }

    ctx.in_flight().begin(&task, gate.lane)?;
    debug!(task = %task.id(), uri = %task.uri(), attempt = task.attempt(), "in flight");

    let Some(route) = ctx.routes().resolve(&task, ctx) else {
        return dead_letter(ctx, task, DeadLetterReason::NoRoute);
    };

    let mut state = ProcessingState::new(task.clone());
    let outcome = match execute(ctx, route.pipeline(), &mut state).await {
        Ok(()) => Outcome::Success {
            discovered: std::mem::take(&mut state.discovered),
        },
        Err(failure) => Outcome::Failed(failure),
    };
    settle(ctx, task, outcome)
}

async fn execute(
    ctx: &RunContext,
    pipeline: &crate::routing::ProcessingPipeline,
    state: &mut ProcessingState,
) -> Result<(), Failure> {
    let content = ctx.fetcher().fetch(state.task.uri()).await?;
    let document = ctx.parser().parse(&content)?;
    state.content = Some(content);
    state.document = Some(document);
    pipeline.run(state, ctx).await
}

fn settle(
    ctx: &RunContext,
    task: ProcessingTask,
    outcome: Outcome,
) -> Result<TickOutcome, CrawlError> {
    let now = ctx.clock().now();
    match ctx.decider().decide(&task, &outcome) {
        Decision::Success => {
            ctx.in_flight().complete(task.id())?;
            ctx.stats().succeeded();
            let links = match outcome {
                Outcome::Success { discovered } => discovered,
                Outcome::Failed(_) => Vec::new(),
            };
            let discovered = offer_discovered(ctx, &task, links, now);
            debug!(task = %task.id(), discovered, "succeeded");
            Ok(TickOutcome::Succeeded { discovered })
        }
        Decision::Retry { delay, reason } => {
            let next = task.next_attempt(now);
            let due = now + to_chrono(delay);
            ctx.in_flight().fail(
                task.id(),
                FailOutcome::Retry {
                    task: next.clone(),
                    due,
                    reason: reason.clone(),
                },
            )?;
            ctx.retries().schedule(next, due);
            ctx.stats().retried();
            debug!(task = %task.id(), %reason, %due, "retry scheduled");
            Ok(TickOutcome::Retried { due })
        }
        Decision::DeadLetter { reason } => dead_letter(ctx, task, reason),
    }
}

fn dead_letter(
    ctx: &RunContext,
    task: ProcessingTask,
    reason: DeadLetterReason,
) -> Result<TickOutcome, CrawlError> {
    let id = task.id();
    warn!(task = %id, uri = %task.uri(), code = reason.code(), %reason, "dead-lettered");
    // on disk before the WAL closes the task
    ctx.dead_letters()
        .record(task, reason.clone(), ctx.clock().now())
        .map_err(|e| {
            error!(task = %id, error = %e, "dead-letter journal append failed");
            CrawlError::from(e)
        })?;
    ctx.in_flight().fail(
        id,
        FailOutcome::Terminal {
            reason: reason.clone(),
        },
    )?;
    ctx.stats().dead_lettered();
    Ok(TickOutcome::DeadLettered { reason })
}

/// Offers links found by a successful task, respecting the depth limit.
/// Dedup and scope are checked when the new tasks are polled.
fn offer_discovered(
    ctx: &RunContext,
    parent: &ProcessingTask,
    links: Vec<Url>,
    now: DateTime<Utc>,
) -> usize {
    if links.is_empty() {
        return 0;
    }
    let depth = parent.origin().depth() + 1;
    if ctx.config().max_depth.is_some_and(|max| depth > max) {
        ctx.stats().too_deep(links.len() as u64);
        debug!(task = %parent.id(), depth, dropped = links.len(), "links beyond max depth");
        return 0;
    }

    let count = links.len();
    ctx.frontier().offer_all(
        links
            .into_iter()
            .map(|uri| ProcessingTask::discovered(ctx.ids().generate_task_id(), uri, parent, now)),
    );
    ctx.stats().discovered(count as u64);
    count
}

/// Drives [`tick`] on the current task until nothing is queued, parked or in
/// flight, sleeping `idle_backoff` whenever only parked tasks remain.
///
/// Parked tasks become due by the clock, so with a `ManualClock` that never
/// advances this only returns if nothing gets parked.
pub async fn run_until_drained(ctx: &RunContext) -> Result<RunCounts, CrawlError> {
    loop {
        if tick(ctx).await? == TickOutcome::Idle {
            if ctx.is_drained() {
                break;
            }
            tokio::time::sleep(ctx.config().idle_backoff).await;
        }
    }
    ctx.in_flight().flush()?;
    let counts = ctx.counts();
    info!(
        succeeded = counts.succeeded,
        retried = counts.retried,
        dead_lettered = counts.dead_lettered,
        duplicates = counts.duplicates,
        "drained"
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::RunConfig;
    use crate::impls::HostAllowList;
    use crate::ports::FetchError;
    use crate::routing::{
        CollectLinks, PipelineStep, ProcessingPipeline, ProcessingRouteResolver, Route, StepSignal,
    };
    use crate::testkit::{self, ScriptedFetcher};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (RunContext, Arc<ScriptedFetcher>, Arc<crate::ports::ManualClock>) {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let clock = testkit::manual_clock();
        let ctx = testkit::context(
            testkit::config(dir.path()),
            testkit::follow_links(),
            fetcher.clone(),
            clock.clone(),
        );
        (ctx, fetcher, clock)
    }

    #[tokio::test]
    async fn empty_frontier_is_idle() {
        let dir = TempDir::new().unwrap();
        let (ctx, _, _) = setup(&dir);
        assert_eq!(tick(&ctx).await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn same_uri_is_processed_once() {
        let dir = TempDir::new().unwrap();
        let (ctx, fetcher, _) = setup(&dir);
        ctx.seed(testkit::url("https://example.com/a"), "page");
        ctx.seed(testkit::url("https://example.com/a#section"), "page");

        assert_eq!(
            tick(&ctx).await.unwrap(),
            TickOutcome::Succeeded { discovered: 0 }
        );
        assert_eq!(tick(&ctx).await.unwrap(), TickOutcome::Duplicate);
        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(ctx.counts().duplicates, 1);
    }

    #[tokio::test]
    async fn out_of_scope_is_discarded_without_fetching() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let ctx = RunContext::open(
            testkit::config(dir.path()),
            testkit::follow_links(),
            crate::app::Collaborators::new(fetcher.clone(), Arc::new(testkit::LinkParser))
                .with_clock(testkit::manual_clock())
                .with_scope(Arc::new(HostAllowList::new(["example.com"]))),
        )
        .unwrap();
        ctx.seed(testkit::url("https://elsewhere.org/"), "page");

        assert_eq!(tick(&ctx).await.unwrap(), TickOutcome::OutOfScope);
        assert!(fetcher.calls().is_empty());
        assert!(ctx.is_drained());
    }

    #[tokio::test]
    async fn politeness_parks_second_task_on_same_host() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let clock = testkit::manual_clock();
        let config = RunConfig {
            politeness_interval: Duration::from_secs(1),
            ..testkit::config(dir.path())
        };
        let ctx = testkit::context(config, testkit::follow_links(), fetcher.clone(), clock.clone());
        ctx.seed(testkit::url("https://example.com/a"), "page");
        ctx.seed(testkit::url("https://example.com/b"), "page");

        assert!(matches!(tick(&ctx).await.unwrap(), TickOutcome::Succeeded { .. }));
        assert_eq!(
            tick(&ctx).await.unwrap(),
            TickOutcome::Deferred {
                wait: Duration::from_secs(1)
            }
        );
        assert_eq!(ctx.retries().len(), 1);
        assert_eq!(tick(&ctx).await.unwrap(), TickOutcome::Idle);

        clock.advance(Duration::from_secs(1));
        assert!(matches!(tick(&ctx).await.unwrap(), TickOutcome::Succeeded { .. }));
        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(ctx.counts().deferred, 1);
        assert!(ctx.is_drained());
    }

    #[tokio::test]
    async fn transient_failure_is_retried_with_next_attempt() {
        let dir = TempDir::new().unwrap();
        let (ctx, fetcher, _) = setup(&dir);
        fetcher.respond("https://example.com/a", Err(FetchError::Transient("503".into())));
        ctx.seed(testkit::url("https://example.com/a"), "page");

        assert!(matches!(tick(&ctx).await.unwrap(), TickOutcome::Retried { .. }));
        assert!(ctx.in_flight().is_empty());
        assert_eq!(ctx.in_flight().open_count(), 1);

        assert!(matches!(tick(&ctx).await.unwrap(), TickOutcome::Succeeded { .. }));
        assert_eq!(ctx.in_flight().open_count(), 0);
        assert_eq!(ctx.counts().retried, 1);
    }

    #[tokio::test]
    async fn retries_exhaust_into_dead_letter() {
        let dir = TempDir::new().unwrap();
        let (ctx, fetcher, _) = setup(&dir);
        for _ in 0..3 {
            fetcher.respond("https://example.com/a", Err(FetchError::Transient("503".into())));
        }
        ctx.seed(testkit::url("https://example.com/a"), "page");

        assert!(matches!(tick(&ctx).await.unwrap(), TickOutcome::Retried { .. }));
        assert!(matches!(tick(&ctx).await.unwrap(), TickOutcome::Retried { .. }));
        assert_eq!(
            tick(&ctx).await.unwrap(),
            TickOutcome::DeadLettered {
                reason: DeadLetterReason::MaxAttemptsExceeded {
                    attempts: 3,
                    last_error: "fetch: 503".into(),
                }
            }
        );
        assert_eq!(ctx.dead_letters().len(), 1);
        assert_eq!(ctx.dead_letters().entries()[0].task.attempt(), 2);
        assert!(ctx.is_drained());
    }

    #[tokio::test]
    async fn permanent_failure_is_dead_lettered_at_once() {
        let dir = TempDir::new().unwrap();
        let (ctx, fetcher, _) = setup(&dir);
        fetcher.respond("https://example.com/gone", Err(FetchError::Permanent("404".into())));
        ctx.seed(testkit::url("https://example.com/gone"), "page");

        let outcome = tick(&ctx).await.unwrap();
        assert_eq!(outcome.task_state(), Some(TaskState::DeadLettered));
        assert_eq!(ctx.counts().retried, 0);
    }

    #[tokio::test]
    async fn unmatched_task_is_dead_lettered_as_no_route() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let routes = ProcessingRouteResolver::new()
            .with(Route::for_hint("article", ProcessingPipeline::new("articles")))
            .unwrap();
        let ctx = testkit::context(
            testkit::config(dir.path()),
            routes,
            fetcher.clone(),
            testkit::manual_clock(),
        );
        ctx.seed(testkit::url("https://example.com/feed"), "feed");

        assert_eq!(
            tick(&ctx).await.unwrap(),
            TickOutcome::DeadLettered {
                reason: DeadLetterReason::NoRoute
            }
        );
        assert!(fetcher.calls().is_empty());
        assert_eq!(ctx.in_flight().open_count(), 0);
    }

    #[tokio::test]
    async fn discovered_links_respect_max_depth() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let config = RunConfig {
            max_depth: Some(1),
            ..testkit::config(dir.path())
        };
        let ctx = testkit::context(
            config,
            testkit::follow_links(),
            fetcher.clone(),
            testkit::manual_clock(),
        );
        fetcher.links(
            "https://example.com/",
            &["https://example.com/a", "https://example.com/b"],
        );
        fetcher.links("https://example.com/a", &["https://example.com/deep"]);
        ctx.seed(testkit::url("https://example.com/"), "page");

        let counts = run_until_drained(&ctx).await.unwrap();
        assert_eq!(counts.succeeded, 3);
        assert_eq!(counts.discovered, 2);
        assert_eq!(counts.too_deep, 1);
        assert!(!fetcher.calls().contains(&testkit::url("https://example.com/deep")));
    }

    struct Reject;

    #[async_trait]
    impl PipelineStep for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        async fn apply(&self, _state: &mut ProcessingState, _ctx: &RunContext) -> StepSignal {
            StepSignal::Fail(Failure::permanent("rejected by step"))
        }
    }

    struct Halt;

    #[async_trait]
    impl PipelineStep for Halt {
        fn name(&self) -> &str {
            "halt"
        }

        async fn apply(&self, _state: &mut ProcessingState, _ctx: &RunContext) -> StepSignal {
            StepSignal::Stop
        }
    }

    #[tokio::test]
    async fn pipeline_signals_drive_the_outcome() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let routes = ProcessingRouteResolver::new()
            .with(Route::for_hint(
                "stop",
                ProcessingPipeline::new("stops").step(Halt).step(Reject),
            ))
            .unwrap()
            .with(Route::for_hint(
                "fail",
                ProcessingPipeline::new("fails").step(CollectLinks).step(Reject),
            ))
            .unwrap();
        let ctx = testkit::context(
            testkit::config(dir.path()),
            routes,
            fetcher,
            testkit::manual_clock(),
        );

        ctx.seed(testkit::url("https://example.com/1"), "stop");
        assert_eq!(
            tick(&ctx).await.unwrap(),
            TickOutcome::Succeeded { discovered: 0 }
        );

        ctx.seed(testkit::url("https://example.com/2"), "fail");
        assert_eq!(
            tick(&ctx).await.unwrap(),
            TickOutcome::DeadLettered {
                reason: DeadLetterReason::Permanent {
                    detail: "rejected by step".into()
                }
            }
        );
    }
}
