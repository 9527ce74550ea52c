//! Error types for job execution.
//!
//! - [`JobError`]: one job failed. In fail-soft mode it is kept in the result
//!   list as the sentinel for that position.
//! - [`ExecutorError`]: the batch as a whole did not produce a result list.

use crate::core::JobIndex;

/// Why a single job did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum JobErrorKind {
    /// The job's future resolved to an error.
    #[error("{0:#}")]
    Failed(anyhow::Error),

    /// The job panicked while being polled.
    #[error("panicked: {0}")]
    Panicked(String),

    /// The task was cancelled before it finished.
    #[error("cancelled")]
    Cancelled,
}

/// A failure of one submitted job.
#[derive(Debug, thiserror::Error)]
#[error("job {index}{} failed: {kind}", display_name(.name))]
pub struct JobError {
    pub index: JobIndex,
    pub name: Option<String>,
    #[source]
    pub kind: JobErrorKind,
}

fn display_name(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" ({})", name),
        None => String::new(),
    }
}

impl JobError {
    pub fn new(index: JobIndex, name: Option<String>, kind: JobErrorKind) -> Self {
        Self { index, name, kind }
    }

    pub fn failed(index: JobIndex, name: Option<String>, err: anyhow::Error) -> Self {
        Self::new(index, name, JobErrorKind::Failed(err))
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.kind, JobErrorKind::Panicked(_))
    }
}

/// Errors surfaced by [`crate::Executor::results`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A job failed while `raise_exceptions` was set; the run was stopped.
    #[error("batch aborted after {completed} completed job(s): {source}")]
    BatchAborted {
        #[source]
        source: JobError,
        /// Number of jobs that had already produced a result.
        completed: usize,
    },

    /// The run could not produce a usable result set at all.
    #[error("executor failed to complete: {0}")]
    Fatal(String),
}

impl ExecutorError {
    /// The failing job, if this is a fail-fast abort.
    pub fn job_error(&self) -> Option<&JobError> {
        match self {
            Self::BatchAborted { source, .. } => Some(source),
            Self::Fatal(_) => None,
        }
    }
}

/// Result type for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_job_error_display_with_name() {
        let err = JobError::failed(JobIndex::new(2), Some("fetch".into()), anyhow!("timeout"));
        assert_eq!(err.to_string(), "job #2 (fetch) failed: timeout");
    }

    #[test]
    fn test_job_error_display_without_name() {
        let err = JobError::new(JobIndex::new(0), None, JobErrorKind::Panicked("boom".into()));
        assert_eq!(err.to_string(), "job #0 failed: panicked: boom");
        assert!(err.is_panic());
    }

    #[test]
    fn test_batch_aborted_exposes_job_error() {
        let source = JobError::failed(JobIndex::new(1), None, anyhow!("bad input"));
        let err = ExecutorError::BatchAborted { source, completed: 3 };
        assert!(err.to_string().starts_with("batch aborted after 3 completed job(s)"));
        assert_eq!(err.job_error().map(|e| e.index), Some(JobIndex::new(1)));

        let fatal = ExecutorError::Fatal("worker thread panicked".into());
        assert!(fatal.job_error().is_none());
    }
}
