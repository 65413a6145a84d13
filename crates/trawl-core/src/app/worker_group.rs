//! WorkerGroup - N scheduler loops plus one housekeeping loop over a shared
//! RunContext.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::scheduler::{tick, TickOutcome};
use super::{RunConfig, RunContext};
use crate::domain::CrawlError;
use crate::persistence::DurabilityPolicy;

/// Worker group handle.
/// - `request_shutdown` stops every worker after its current task
/// - a fatal error in one worker stops all of them
/// - while workers wait on fetches, a timer flushes batched WAL events and
///   takes interval snapshots
/// - `shutdown_and_join` waits, flushes the WAL and reports the first fatal error
pub struct WorkerGroup {
    ctx: Arc<RunContext>,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    fatal: Arc<Mutex<Option<CrawlError>>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing `ctx`.
    pub fn spawn(n: usize, ctx: Arc<RunContext>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx_for_workers = shutdown_tx.clone();
        let fatal = Arc::new(Mutex::new(None));

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let ctx = Arc::clone(&ctx);
            let fatal = Arc::clone(&fatal);
            let stop_all = shutdown_tx_for_workers.clone();
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                if let Err(e) = worker_loop(worker_id, &ctx, &mut rx).await {
                    error!(worker = worker_id, error = %e, kind = ?e.kind(), "fatal error, stopping all workers");
                    fatal.lock().get_or_insert(e);
                    // ignore send error: every receiver may already be gone
                    let _ = stop_all.send(true);
                }
            });
            joins.push(join);
        }
        if let Some(period) = housekeeping_period(ctx.config()) {
            let ctx = Arc::clone(&ctx);
            let fatal = Arc::clone(&fatal);
            let stop_all = shutdown_tx_for_workers.clone();
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                if let Err(e) = housekeeping_loop(period, &ctx, &mut rx).await {
                    error!(error = %e, kind = ?e.kind(), "housekeeping failed, stopping all workers");
                    fatal.lock().get_or_insert(e);
                    let _ = stop_all.send(true);
                }
            }));
            debug!(?period, "housekeeping started");
        }
        info!(workers = n, "workers started");

        Self {
            ctx,
            shutdown_tx,
            joins,
            fatal,
        }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Request shutdown for all workers.
    /// In-flight tasks finish; their `begin` records stay for the next
    /// bootstrap if the process dies first.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// True once a shutdown was requested or a worker hit a fatal error.
    pub fn is_stopping(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Shutdown and wait for all workers, then flush the WAL.
    pub async fn shutdown_and_join(self) -> Result<(), CrawlError> {
        self.request_shutdown();
        for j in self.joins {
            j.await.map_err(|e| CrawlError::Worker(e.to_string()))?;
        }
        if let Some(e) = self.fatal.lock().take() {
            return Err(e);
        }
        self.ctx.in_flight().flush()?;
        info!("workers stopped");
        Ok(())
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: &RunContext,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<(), CrawlError> {
    let idle_backoff = ctx.config().idle_backoff;
    loop {
        if *shutdown_rx.borrow() {
            debug!(worker = worker_id, "shutdown observed");
            return Ok(());
        }

        if tick(ctx).await? == TickOutcome::Idle {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(idle_backoff) => {}
            }
        }
    }
}

/// Timer period for [`housekeeping_loop`]: the batch delay bound and the
/// snapshot interval, whichever is shorter. `None` when neither applies.
fn housekeeping_period(config: &RunConfig) -> Option<Duration> {
    let batch = match config.persistence.durability {
        DurabilityPolicy::Batched { max_delay, .. } => Some(max_delay.max(Duration::from_millis(1))),
        DurabilityPolicy::Immediate => None,
    };
    let snapshot = Some(config.persistence.snapshot.every).filter(|d| !d.is_zero());
    match (batch, snapshot) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Flushes every buffered WAL event once per period, so no event waits longer
/// than the batch delay bound even when all workers are busy.
async fn housekeeping_loop(
    period: Duration,
    ctx: &RunContext,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<(), CrawlError> {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
            _ = timer.tick() => {
                ctx.in_flight().maintain()?;
                ctx.in_flight().flush()?;
            }
        }
    }
}
