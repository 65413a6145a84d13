//! Startup recovery: turns what the state directory holds back into queued
//! work.

use serde::Serialize;
use tracing::info;

use crate::domain::CrawlError;
use crate::inflight::InFlightBuffer;
use crate::queue::{DeadLetterQueue, Frontier, RetryBuffer, SeenStore};

/// What a restore found and put back to work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub snapshot_seq: Option<u64>,
    pub replayed: usize,
    /// Tasks that were in flight at the crash and went back to the frontier.
    pub reoffered: usize,
    /// Tasks that were waiting for a retry and went back to the retry buffer.
    pub rescheduled: usize,
    /// Entries read back into the dead-letter queue.
    pub dead_letters: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.reoffered == 0 && self.rescheduled == 0
    }
}

/// Rebuilds open-task state at startup.
///
/// Must run once, before any worker starts. Every task that had begun but not
/// reached a terminal event is processed again (at-least-once).
pub struct StateBootstrapper<'a> {
    in_flight: &'a InFlightBuffer,
    frontier: &'a Frontier,
    retries: &'a RetryBuffer,
    seen: &'a SeenStore,
    dead_letters: &'a DeadLetterQueue,
}

impl<'a> StateBootstrapper<'a> {
    pub fn new(
        in_flight: &'a InFlightBuffer,
        frontier: &'a Frontier,
        retries: &'a RetryBuffer,
        seen: &'a SeenStore,
        dead_letters: &'a DeadLetterQueue,
    ) -> Self {
        Self {
            in_flight,
            frontier,
            retries,
            seen,
            dead_letters,
        }
    }

    pub fn restore(&self) -> Result<RecoveryReport, CrawlError> {
        let loaded = self.in_flight.persistence().load()?;
        let dead_letters = self.dead_letters.reload()?;
        let state = loaded.state.into_recovered();

        let recovered: Vec<_> = state.recovered.values().map(|t| t.admitted()).collect();
        let parked: Vec<_> = state
            .retrying
            .values()
            .map(|p| (p.task.admitted(), p.due))
            .collect();
        self.in_flight.install(state);

        let report = RecoveryReport {
            snapshot_seq: loaded.snapshot_seq,
            replayed: loaded.replayed,
            reoffered: recovered.len(),
            rescheduled: parked.len(),
            dead_letters,
        };

        for task in &recovered {
            self.seen.check_and_mark(task.fingerprint());
        }
        self.frontier.offer_all(recovered);
        for (task, due) in parked {
            self.seen.check_and_mark(task.fingerprint());
            self.retries.schedule(task, due);
        }

        self.in_flight.snapshot_now();

        info!(
            snapshot_seq = ?report.snapshot_seq,
            replayed = report.replayed,
            reoffered = report.reoffered,
            rescheduled = report.rescheduled,
            dead_letters = report.dead_letters,
            "restored state"
        );
        Ok(report)
    }
}
