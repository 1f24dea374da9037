use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::lookup_client::{LookupFailure, Transport};
use crate::month_search::{MonthSearch, SearchReport};
use crate::record::Identity;
use crate::resume_manager::{CheckpointPolicy, CheckpointStore, RunStats};

/// How often the collector wakes up to check for cancellation and
/// time-based checkpoints while no completion arrives.
const COLLECTOR_TICK: Duration = Duration::from_millis(200);

/// Run-wide stop flag. Stops admission of new records; searches already in
/// flight finish normally.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Completion {
    record_id: usize,
    outcome: std::result::Result<SearchReport, LookupFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Record ids in the order their searches finished.
    pub completion_order: Vec<usize>,
    /// Records handed to workers but never applied (aborted by a fatal error).
    pub aborted: Vec<usize>,
    pub fatal: Option<LookupFailure>,
    pub cancelled: bool,
    pub stats: RunStats,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.completion_order.len()
    }
}

pub struct VerificationScheduler<'a, T: Transport> {
    search: &'a MonthSearch<T>,
    concurrency: usize,
    cancel: CancelToken,
}

impl<'a, T: Transport> VerificationScheduler<'a, T> {
    pub fn new(search: &'a MonthSearch<T>, concurrency: usize, cancel: CancelToken) -> Self {
        VerificationScheduler {
            search,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Verifies every unresolved record in `store` with at most `concurrency`
    /// searches in flight. Completions are applied as they arrive; the store
    /// is persisted per `policy` and always once more before returning.
    pub fn run(&self, store: &mut CheckpointStore, mut policy: CheckpointPolicy) -> Result<RunReport> {
        let pending = store.unresolved_snapshot();
        let total = pending.len();
        info!(
            "Verifying {} records with {} concurrent workers.",
            total, self.concurrency
        );

        let (work_tx, work_rx) = unbounded::<(usize, Identity)>();
        for item in pending {
            // Receiver is alive; cannot fail.
            let _ = work_tx.send(item);
        }
        drop(work_tx);

        let (done_tx, done_rx) = unbounded::<Completion>();
        let workers = self.concurrency.min(total.max(1));

        let mut report = RunReport {
            completion_order: Vec::with_capacity(total),
            aborted: Vec::new(),
            fatal: None,
            cancelled: false,
            stats: RunStats::default(),
        };

        thread::scope(|scope| {
            for worker_id in 0..workers {
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                let cancel = self.cancel.clone();
                let search = self.search;
                scope.spawn(move || worker_loop(worker_id, search, &work_rx, &done_tx, &cancel));
            }
            drop(done_tx);

            self.collect(store, &mut policy, &done_rx, total, &mut report);
        });

        report.cancelled = self.cancel.is_cancelled() && report.fatal.is_none();
        let remaining = work_rx.len();
        if remaining > 0 {
            warn!("{} records were not started and remain unresolved.", remaining);
        }

        report.stats = store.persist()?;
        Ok(report)
    }

    /// Single-writer loop: the only place the store is mutated during a run.
    fn collect(
        &self,
        store: &mut CheckpointStore,
        policy: &mut CheckpointPolicy,
        done_rx: &Receiver<Completion>,
        total: usize,
        report: &mut RunReport,
    ) {
        loop {
            match done_rx.recv_timeout(COLLECTOR_TICK) {
                Ok(Completion { record_id, outcome }) => match outcome {
                    Ok(search_report) => {
                        debug!(
                            "Record #{} resolved: month {} ({} unresolved months)",
                            record_id,
                            search_report.result.resolved_month,
                            search_report.unresolved_months().count()
                        );
                        store.apply(record_id, search_report.result);
                        report.completion_order.push(record_id);
                        policy.record_completion();
                    }
                    Err(failure) => {
                        report.aborted.push(record_id);
                        if report.fatal.is_none() {
                            error!("Fatal lookup failure, stopping admission: {}", failure);
                            report.fatal = Some(failure);
                        }
                        self.cancel.cancel();
                    }
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            if policy.is_due(now) {
                info!("Progress: {} / {} verified this run.", report.completed(), total);
                // A failed checkpoint is retried at the next one; the final
                // persist in `run` reports errors.
                match store.persist() {
                    Ok(_) => policy.mark_persisted(now),
                    Err(e) => error!("Checkpoint failed: {}", e),
                }
            }
        }
    }
}

fn worker_loop<T: Transport>(
    worker_id: usize,
    search: &MonthSearch<T>,
    work_rx: &Receiver<(usize, Identity)>,
    done_tx: &Sender<Completion>,
    cancel: &CancelToken,
) {
    loop {
        if cancel.is_cancelled() {
            debug!("Worker {} stopping: run cancelled.", worker_id);
            return;
        }
        let Ok((record_id, identity)) = work_rx.try_recv() else {
            return;
        };
        debug!(
            "Worker {} checking #{} {} {}",
            worker_id, record_id, identity.first_name, identity.last_name
        );
        let outcome = search.resolve(&identity);
        if outcome.is_err() {
            cancel.cancel();
        }
        if done_tx.send(Completion { record_id, outcome }).is_err() {
            return;
        }
    }
}
