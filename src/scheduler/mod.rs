//! Worker pool driving search tasks through browser sessions.
//!
//! One shared FIFO queue, `concurrency` workers, each exclusively owning one
//! [`SearchSession`]. Every per-task failure is absorbed here: a task ends
//! in a terminal [`TaskStatus`], never in a pool abort.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::clock::Clock;
use crate::core::config::SchedulerConfigSection;
use crate::core::error::TaskError;
use crate::core::types::{SearchOutcome, SearchResult, SearchTask, TaskStatus};
use crate::features::notify::Notifier;
use crate::ledger::ResultLedger;
use crate::scraping::search::RankSearcher;
use crate::scraping::session::SearchSession;

type TaskQueue = Arc<Mutex<VecDeque<SearchTask>>>;
type WritePool = Arc<Mutex<Vec<JoinHandle<()>>>>;

pub struct TaskScheduler {
    searcher: Arc<RankSearcher>,
    ledger: Arc<ResultLedger>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<Notifier>>,
    config: SchedulerConfigSection,
}

impl TaskScheduler {
    pub fn new(
        searcher: Arc<RankSearcher>,
        ledger: Arc<ResultLedger>,
        clock: Arc<dyn Clock>,
        notifier: Option<Arc<Notifier>>,
        config: SchedulerConfigSection,
    ) -> Self {
        Self {
            searcher,
            ledger,
            clock,
            notifier,
            config,
        }
    }

    /// Run all tasks to completion. `sessions` supplies one session per
    /// worker; extra sessions are ignored, missing ones cap the concurrency.
    ///
    /// The run completes when the queue is drained, every worker has
    /// finished its current task, and all pending ledger writes settled.
    pub async fn run(
        &self,
        tasks: Vec<SearchTask>,
        sessions: &[Arc<dyn SearchSession>],
        cancel: watch::Receiver<bool>,
    ) -> Result<Vec<SearchResult>> {
        let bucket = self.ledger.prepare_bucket(self.clock.now()).await?;
        let total = tasks.len();
        let pending: VecDeque<SearchTask> =
            tasks.into_iter().filter(|t| bucket.needs(t.row)).collect();
        if bucket.resumed {
            info!(
                "resuming bucket column {}: {}/{total} tasks still pending",
                bucket.column,
                pending.len()
            );
        }
        if pending.is_empty() {
            info!("nothing to do, all cells already filled");
            return Ok(Vec::new());
        }

        let workers = self.config.concurrency.min(sessions.len()).max(1);
        info!("starting run: {} tasks over {workers} workers", pending.len());

        let queue: TaskQueue = Arc::new(Mutex::new(pending));
        let writes: WritePool = Arc::new(Mutex::new(Vec::new()));
        let results = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::with_capacity(workers);
        for (id, session) in sessions.iter().take(workers).cloned().enumerate() {
            handles.push(tokio::spawn(Self::worker(
                id,
                session,
                queue.clone(),
                self.searcher.clone(),
                self.ledger.clone(),
                self.clock.clone(),
                self.notifier.clone(),
                self.config.clone(),
                bucket.column,
                cancel.clone(),
                writes.clone(),
                results.clone(),
            )));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("worker panicked: {e}");
            }
        }

        // Ledger writes are fire-and-forget per task but the run is not
        // complete until every one of them has settled.
        let pending_writes = std::mem::take(&mut *writes.lock().await);
        for write in pending_writes {
            let _ = write.await;
        }

        let mut results = std::mem::take(&mut *results.lock().await);
        results.sort_by_key(|r| r.task.row);
        self.report(&results).await;
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    async fn worker(
        id: usize,
        session: Arc<dyn SearchSession>,
        queue: TaskQueue,
        searcher: Arc<RankSearcher>,
        ledger: Arc<ResultLedger>,
        clock: Arc<dyn Clock>,
        notifier: Option<Arc<Notifier>>,
        config: SchedulerConfigSection,
        bucket_column: u32,
        cancel: watch::Receiver<bool>,
        writes: WritePool,
        results: Arc<Mutex<Vec<SearchResult>>>,
    ) {
        // Staggered start so workers don't fire simultaneous page loads.
        let jitter = rand::rng().random_range(0..=config.startup_jitter_ms);
        clock.sleep(Duration::from_millis(jitter)).await;
        debug!("worker {id} started after {jitter}ms jitter");

        loop {
            if *cancel.borrow() {
                info!("worker {id} stopping: run cancelled");
                break;
            }
            let Some(task) = queue.lock().await.pop_front() else {
                debug!("worker {id} done: queue empty");
                break;
            };

            let status = Self::process_task(
                id, &session, &searcher, &clock, &notifier, &config, &task, &cancel,
            )
            .await;
            let result = SearchResult { task, status };

            let write_ledger = ledger.clone();
            let write_result = result.clone();
            writes.lock().await.push(tokio::spawn(async move {
                if let Err(e) = write_ledger.record(&write_result, bucket_column).await {
                    error!(
                        "ledger write failed for row {}: {e:#}",
                        write_result.task.row
                    );
                }
            }));
            results.lock().await.push(result);
        }
    }

    /// One task through its retry budget. Always returns a terminal status.
    #[allow(clippy::too_many_arguments)]
    async fn process_task(
        worker: usize,
        session: &Arc<dyn SearchSession>,
        searcher: &RankSearcher,
        clock: &Arc<dyn Clock>,
        notifier: &Option<Arc<Notifier>>,
        config: &SchedulerConfigSection,
        task: &SearchTask,
        cancel: &watch::Receiver<bool>,
    ) -> TaskStatus {
        let mut last_error = String::new();

        for attempt in 1..=config.retry_attempts {
            if *cancel.borrow() {
                return TaskStatus::Error("run cancelled".to_string());
            }

            let tab = match session.tab().await {
                Ok(tab) => tab,
                Err(e) => {
                    warn!("worker {worker}: session unavailable (attempt {attempt}): {e}");
                    last_error = TaskError::from(e).to_string();
                    Self::backoff_and_restart(session, clock, config).await;
                    continue;
                }
            };

            // Cancellation must not wait out a slow listing: the in-flight
            // search gets a bounded grace window, then is abandoned.
            let search = searcher.find_position(tab.as_ref(), task);
            tokio::pin!(search);
            let mut cancel_signal = cancel.clone();
            let outcome = tokio::select! {
                res = &mut search => Some(res),
                _ = run_cancelled(&mut cancel_signal) => {
                    tokio::select! {
                        res = &mut search => Some(res),
                        _ = clock.sleep(Duration::from_millis(config.cancel_grace_ms)) => None,
                    }
                }
            };
            let Some(outcome) = outcome else {
                warn!(
                    "worker {worker}: abandoning row {} mid-search on cancellation",
                    task.row
                );
                return TaskStatus::Error("run cancelled".to_string());
            };

            match outcome {
                Ok(SearchOutcome::Found(pos)) => return TaskStatus::Found(pos),
                Ok(SearchOutcome::NotFound) => return TaskStatus::NotFound,
                Ok(SearchOutcome::Incomplete) => return TaskStatus::Incomplete,
                Ok(SearchOutcome::BlockedAbort) => {
                    warn!(
                        "worker {worker}: row {} blocked (attempt {attempt}/{})",
                        task.row, config.retry_attempts
                    );
                    last_error = TaskError::ChallengeUnresolved.to_string();
                    Self::backoff_and_restart(session, clock, config).await;
                }
                Err(e) if e.is_fatal() => {
                    warn!(
                        "worker {worker}: tab died on row {} (attempt {attempt}): {e}",
                        task.row
                    );
                    last_error = TaskError::from(e).to_string();
                    // A fresh tab is usually enough; rebuild the whole
                    // session only when that fails too.
                    if session.fresh_tab().await.is_err() {
                        Self::backoff_and_restart(session, clock, config).await;
                    }
                }
                Err(e) => {
                    warn!(
                        "worker {worker}: page load failed on row {} (attempt {attempt}): {e}",
                        task.row
                    );
                    last_error = TaskError::from(e).to_string();
                    Self::backoff_and_restart(session, clock, config).await;
                }
            }
        }

        let err = TaskError::Exhausted {
            attempts: config.retry_attempts,
            last: last_error,
        };
        error!("worker {worker}: row {} gave up: {err}", task.row);
        if let Some(notifier) = notifier {
            notifier
                .send_message(&format!(
                    "⚠️ '{}' (row {}) failed: {err}",
                    task.query, task.row
                ))
                .await;
        }
        TaskStatus::Error(err.to_string())
    }

    /// Randomized pause then a session rebuild. A failed rebuild is only
    /// logged; the next attempt's `tab()` will try to launch again.
    async fn backoff_and_restart(
        session: &Arc<dyn SearchSession>,
        clock: &Arc<dyn Clock>,
        config: &SchedulerConfigSection,
    ) {
        let backoff = rand::rng().random_range(0..=config.backoff_max_ms);
        debug!("backing off {backoff}ms before session restart");
        clock.sleep(Duration::from_millis(backoff)).await;
        if let Err(e) = session.restart().await {
            warn!("session restart failed: {e}");
        }
    }

    async fn report(&self, results: &[SearchResult]) {
        let mut found = 0usize;
        let mut not_found = 0usize;
        let mut incomplete = 0usize;
        let mut errors = 0usize;
        for r in results {
            match r.status {
                TaskStatus::Found(_) => found += 1,
                TaskStatus::NotFound => not_found += 1,
                TaskStatus::Incomplete => incomplete += 1,
                TaskStatus::Error(_) => errors += 1,
            }
        }
        info!(
            "run complete: {found} found, {not_found} not found, \
             {incomplete} incomplete, {errors} errors"
        );
        if let Some(notifier) = &self.notifier {
            notifier
                .send_message(&format!(
                    "📊 Run complete: {found} found, {not_found} not found, \
                     {incomplete} incomplete, {errors} errors"
                ))
                .await;
        }
    }
}

/// Resolves once the run is cancelled; pends forever otherwise, so it is
/// only useful inside a `select!`.
async fn run_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender gone without a cancel: this run will never be cancelled.
            std::future::pending::<()>().await;
        }
    }
}
