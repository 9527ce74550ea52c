// Batch execution engine: one OS thread, one private current-thread runtime

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tokio::runtime::Builder;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::{self, JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, warn};

use crate::config::ExecutorConfig;
use crate::core::job::{JobIndex, PendingJob, ResultRecord};
use crate::error::{JobError, JobErrorKind};
use crate::progress::{ProgressSink, ProgressSpec};

/// Terminal state of one run.
#[derive(Debug)]
pub enum RunOutcome<T> {
    /// Every job produced a record (values or sentinels).
    Completed(Vec<ResultRecord<T>>),
    /// Fail-fast stop: `error` is the job that ended the run, `partial` holds
    /// the records collected before it.
    Aborted {
        partial: Vec<ResultRecord<T>>,
        error: JobError,
    },
    /// The run could not produce a result set at all.
    Fatal(String),
}

impl<T> RunOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Live bookkeeping for a spawned job, keyed by its tokio task id.
#[derive(Debug)]
struct ScheduledTask {
    index: JobIndex,
    name: Option<String>,
    label: String,
}

/// Drives a set of pending jobs to completion on a dedicated thread.
pub struct Runner<T> {
    jobs: Vec<PendingJob<T>>,
    config: ExecutorConfig,
    progress: Arc<dyn ProgressSink>,
}

impl<T: Send + 'static> Runner<T> {
    pub fn new(jobs: Vec<PendingJob<T>>, config: ExecutorConfig, progress: Arc<dyn ProgressSink>) -> Self {
        Self { jobs, config, progress }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Start the worker thread. The returned handle yields the outcome once
    /// the worker has finished and torn down its scheduler.
    pub fn spawn(self) -> RunHandle<T> {
        let (tx, rx) = oneshot::channel();
        let total = self.jobs.len();
        let thread_name = self.config.thread_name.clone();

        let spawned = thread::Builder::new().name(thread_name.clone()).spawn(move || {
            let outcome = self.run();
            // The receiver may already be gone if the caller stopped waiting.
            let _ = tx.send(outcome);
        });

        match spawned {
            Ok(thread) => RunHandle {
                thread: Some(thread),
                rx,
                total,
                spawn_error: None,
            },
            Err(err) => {
                error!("Failed to spawn runner thread {}: {}", thread_name, err);
                RunHandle {
                    thread: None,
                    rx,
                    total,
                    spawn_error: Some(err.to_string()),
                }
            }
        }
    }

    fn run(self) -> RunOutcome<T> {
        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => return RunOutcome::Fatal(format!("failed to build scheduler: {}", err)),
        };
        let collected = panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(self.collect())));

        // Never wait on cancelled tasks, also when unwinding.
        runtime.shutdown_background();
        match collected {
            Ok(outcome) => outcome,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    async fn collect(self) -> RunOutcome<T> {
        let total = self.jobs.len();
        let raise = self.config.raise_exceptions;
        let started = Instant::now();
        info!(
            "Runner starting {} job(s) (raise_exceptions={}, max_concurrency={:?})",
            total, raise, self.config.max_concurrency
        );

        let gate = self.config.max_concurrency.map(|permits| Arc::new(Semaphore::new(permits)));
        let mut tasks = JoinSet::new();
        let mut scheduled: HashMap<task::Id, ScheduledTask> = HashMap::with_capacity(total);

        for pending in self.jobs {
            let label = pending.label();
            let (index, name, job) = pending.into_parts();
            let span = tracing::debug_span!("job", index = index.get(), job_name = name.as_deref().unwrap_or(""));
            let gate = gate.clone();
            let handle = tasks.spawn(
                async move {
                    let _permit = match gate {
                        Some(gate) => gate.acquire_owned().await.ok(),
                        None => None,
                    };
                    (index, job().await)
                }
                .instrument(span),
            );
            scheduled.insert(handle.id(), ScheduledTask { index, name, label });
        }

        self.progress.start(&ProgressSpec {
            caption: self.config.desc.clone(),
            total,
            leave_visible: self.config.keep_progress_bar,
        });

        let outcome = drain(&mut tasks, &mut scheduled, raise, self.progress.as_ref(), total).await;

        // Cancel whatever is still in flight. Cancelled tasks are not awaited.
        if !tasks.is_empty() {
            debug!("Cancelling {} outstanding task(s)", tasks.len());
            tasks.abort_all();
        }

        let collected = match &outcome {
            RunOutcome::Completed(records) => records.len(),
            RunOutcome::Aborted { partial, .. } => partial.len() + 1,
            RunOutcome::Fatal(_) => 0,
        };
        self.progress.finish(collected, total);
        info!(
            "Runner finished: {}/{} job(s) collected in {:.3}s",
            collected,
            total,
            started.elapsed().as_secs_f64()
        );

        outcome
    }
}

/// The completion loop: takes tasks in the order they finish.
async fn drain<T: Send + 'static>(
    tasks: &mut JoinSet<(JobIndex, anyhow::Result<T>)>,
    scheduled: &mut HashMap<task::Id, ScheduledTask>,
    raise: bool,
    progress: &dyn ProgressSink,
    total: usize,
) -> RunOutcome<T> {
    let mut records = Vec::with_capacity(total);

    while let Some(joined) = tasks.join_next_with_id().await {
        let record = match joined {
            Ok((id, (index, result))) => {
                let Some(task) = scheduled.remove(&id) else {
                    return RunOutcome::Fatal(format!("task {} finished but was never scheduled", id));
                };
                match result {
                    Ok(value) => {
                        debug!(index = index.get(), job_name = %task.label, "Job {} completed", task.label);
                        ResultRecord::new(index, Ok(value))
                    }
                    Err(err) => ResultRecord::new(index, Err(JobError::failed(index, task.name, err))),
                }
            }
            Err(join_err) => match scheduled.remove(&join_err.id()) {
                Some(task) => {
                    let kind = join_error_kind(join_err);
                    debug!(index = task.index.get(), job_name = %task.label, "Job {} did not finish", task.label);
                    ResultRecord::new(task.index, Err(JobError::new(task.index, task.name, kind)))
                }
                None => return RunOutcome::Fatal(format!("task {} finished but was never scheduled", join_err.id())),
            },
        };

        progress.advance(records.len() + 1, total);

        match record.outcome {
            Err(error) if raise => {
                error!("Aborting batch: {}", error);
                return RunOutcome::Aborted { partial: records, error };
            }
            Err(error) => {
                warn!("{}", error);
                records.push(ResultRecord::new(record.index, Err(error)));
            }
            Ok(value) => records.push(ResultRecord::new(record.index, Ok(value))),
        }
    }

    RunOutcome::Completed(records)
}

fn join_error_kind(err: JoinError) -> JobErrorKind {
    if err.is_panic() {
        JobErrorKind::Panicked(panic_message(err.into_panic().as_ref()))
    } else {
        JobErrorKind::Cancelled
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Caller's side of a run: the worker thread plus its one-shot result slot.
pub struct RunHandle<T> {
    thread: Option<thread::JoinHandle<()>>,
    rx: oneshot::Receiver<RunOutcome<T>>,
    total: usize,
    spawn_error: Option<String>,
}

impl<T> RunHandle<T> {
    /// Number of jobs handed to the runner.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Block the current thread until the worker exits.
    pub fn wait(mut self) -> RunOutcome<T> {
        if let Some(thread) = self.thread.take() {
            if let Err(payload) = thread.join() {
                return RunOutcome::Fatal(format!("runner thread panicked: {}", panic_message(payload.as_ref())));
            }
        }
        match self.rx.try_recv() {
            Ok(outcome) => outcome,
            Err(_) => RunOutcome::Fatal(self.missing_signal()),
        }
    }

    /// Await the worker's completion signal without blocking the thread.
    pub async fn outcome(mut self) -> RunOutcome<T> {
        let rx = std::mem::replace(&mut self.rx, oneshot::channel().1);
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => match self.thread.take().map(|thread| thread.join()) {
                Some(Err(payload)) => {
                    RunOutcome::Fatal(format!("runner thread panicked: {}", panic_message(payload.as_ref())))
                }
                _ => RunOutcome::Fatal(self.missing_signal()),
            },
        }
    }

    fn missing_signal(&self) -> String {
        match &self.spawn_error {
            Some(err) => format!("runner thread could not be started: {}", err),
            None => "runner exited without reporting an outcome".to_string(),
        }
    }
}
