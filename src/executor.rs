use std::future::Future;
use std::sync::Arc;

use tracing::error;

use crate::config::ExecutorConfig;
use crate::core::{JobIndex, JobOutcome, PendingJob, RunOutcome, Runner, order_by_index};
use crate::error::{ExecutorError, ExecutorResult};
use crate::progress::{ProgressSink, default_sink};

/// Collects jobs and runs them as one concurrent batch.
///
/// Jobs are closures returning a future; nothing runs until
/// [`Executor::results`] is called. Each call runs the jobs submitted since
/// the previous call on a fresh worker thread with its own scheduler, so it
/// is safe to call from code that is itself running inside a tokio runtime.
///
/// ```ignore
/// let mut executor = Executor::default();
/// for url in urls {
///     executor.submit(move || fetch(url));
/// }
/// let bodies = executor.results()?; // same order as `urls`
/// ```
pub struct Executor<T> {
    config: ExecutorConfig,
    jobs: Vec<PendingJob<T>>,
    progress: Arc<dyn ProgressSink>,
}

impl<T: Send + 'static> Default for Executor<T> {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl<T: Send + 'static> Executor<T> {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            jobs: Vec::new(),
            progress: default_sink(),
        }
    }

    /// Replace the default tracing-based progress reporter.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Number of jobs waiting for the next [`Executor::results`] call.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Queue a job. Its position in the result list is the returned index.
    pub fn submit<F, Fut>(&mut self, job: F) -> JobIndex
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.push(None, job)
    }

    /// Queue a job with a display name used in logs and errors.
    pub fn submit_named<F, Fut>(&mut self, name: impl Into<String>, job: F) -> JobIndex
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.push(Some(name.into()), job)
    }

    fn push<F, Fut>(&mut self, name: Option<String>, job: F) -> JobIndex
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let index = JobIndex::new(self.jobs.len());
        self.jobs.push(PendingJob::new(index, name, job));
        index
    }

    /// Run every pending job and return their outcomes in submission order.
    ///
    /// Blocks the calling thread until the batch has finished. With
    /// `raise_exceptions` off, a failed job shows up as an `Err` at its
    /// position and the rest still run; if the batch cannot run at all the
    /// failure is logged and an empty list is returned. With
    /// `raise_exceptions` on, the first failure aborts the batch and is
    /// returned as [`ExecutorError::BatchAborted`].
    pub fn results(&mut self) -> ExecutorResult<Vec<JobOutcome<T>>> {
        let Some(runner) = self.take_runner()? else {
            return Ok(Vec::new());
        };
        let total = runner.job_count();
        let outcome = runner.spawn().wait();
        self.finish(outcome, total)
    }

    /// Like [`Executor::results`], but awaits the worker instead of blocking.
    pub async fn results_async(&mut self) -> ExecutorResult<Vec<JobOutcome<T>>> {
        let Some(runner) = self.take_runner()? else {
            return Ok(Vec::new());
        };
        let total = runner.job_count();
        let outcome = runner.spawn().outcome().await;
        self.finish(outcome, total)
    }

    fn take_runner(&mut self) -> ExecutorResult<Option<Runner<T>>> {
        if let Err(err) = self.config.validate() {
            // Invalid settings are a batch that cannot run. The jobs are
            // dropped either way since each can only be invoked once.
            self.jobs.clear();
            return self.fatal::<()>(format!("{:#}", err)).map(|()| None);
        }
        if self.jobs.is_empty() {
            return Ok(None);
        }
        let jobs = std::mem::take(&mut self.jobs);
        Ok(Some(Runner::new(jobs, self.config.clone(), self.progress.clone())))
    }

    fn finish(&self, outcome: RunOutcome<T>, total: usize) -> ExecutorResult<Vec<JobOutcome<T>>> {
        match outcome {
            RunOutcome::Completed(records) => match order_by_index(records, total) {
                Ok(ordered) => Ok(ordered),
                Err(msg) => self.fatal(msg),
            },
            RunOutcome::Aborted { partial, error } => Err(ExecutorError::BatchAborted {
                source: error,
                completed: partial.len(),
            }),
            RunOutcome::Fatal(msg) => self.fatal(msg),
        }
    }

    fn fatal<R: Default>(&self, msg: String) -> ExecutorResult<R> {
        if self.config.raise_exceptions {
            Err(ExecutorError::Fatal(msg))
        } else {
            error!("Executor failed to complete: {}", msg);
            Ok(R::default())
        }
    }
}
