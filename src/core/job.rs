// Job bookkeeping shared by the registry and the runner

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::JobError;

/// Boxed future produced by a job once it is invoked on the worker thread.
pub type JobFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'static>>;

/// Deferred invocation: the closure captures its arguments and is only
/// called when the runner schedules it.
pub type JobFn<T> = Box<dyn FnOnce() -> JobFuture<T> + Send + 'static>;

/// Outcome of a single job. An `Err` is the positional error-sentinel.
pub type JobOutcome<T> = Result<T, JobError>;

/// Submission-order position of a job, starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobIndex(usize);

impl JobIndex {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for JobIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A submitted job that has not started yet.
pub struct PendingJob<T> {
    pub index: JobIndex,
    pub name: Option<String>,
    pub(crate) job: JobFn<T>,
}

impl<T> PendingJob<T> {
    pub fn new<F, Fut>(index: JobIndex, name: Option<String>, job: F) -> Self
    where
        T: 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            index,
            name,
            job: Box::new(move || Box::pin(job()) as JobFuture<T>),
        }
    }

    /// Name used in logs: the display name if one was given, otherwise the index.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.index.to_string(),
        }
    }

    pub(crate) fn into_parts(self) -> (JobIndex, Option<String>, JobFn<T>) {
        (self.index, self.name, self.job)
    }
}

impl<T> fmt::Debug for PendingJob<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingJob")
            .field("index", &self.index)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One finished (or failed) job, recorded in completion order.
#[derive(Debug)]
pub struct ResultRecord<T> {
    pub index: JobIndex,
    pub outcome: JobOutcome<T>,
}

impl<T> ResultRecord<T> {
    pub fn new(index: JobIndex, outcome: JobOutcome<T>) -> Self {
        Self { index, outcome }
    }
}

/// Place records by their index into submission order.
///
/// Fails if an index is out of range, appears twice, or is missing, since
/// a completed batch must cover exactly `0..expected`.
pub fn order_by_index<T>(
    records: Vec<ResultRecord<T>>,
    expected: usize,
) -> Result<Vec<JobOutcome<T>>, String> {
    let mut slots: Vec<Option<JobOutcome<T>>> = Vec::with_capacity(expected);
    slots.resize_with(expected, || None);

    for record in records {
        let position = record.index.get();
        let slot = slots
            .get_mut(position)
            .ok_or_else(|| format!("result for job {} is outside the batch of {}", record.index, expected))?;
        if slot.is_some() {
            return Err(format!("duplicate result for job {}", record.index));
        }
        *slot = Some(record.outcome);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or_else(|| format!("missing result for job {}", JobIndex::new(i))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobErrorKind;

    fn ok(index: usize, value: &str) -> ResultRecord<String> {
        ResultRecord::new(JobIndex::new(index), Ok(value.to_string()))
    }

    #[test]
    fn test_order_by_index_reorders_completion_order() {
        let records = vec![ok(2, "c"), ok(0, "a"), ok(1, "b")];
        let ordered = order_by_index(records, 3).unwrap();
        let values: Vec<_> = ordered.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_order_by_index_keeps_sentinels_in_place() {
        let failed = JobError::new(JobIndex::new(1), None, JobErrorKind::Cancelled);
        let records = vec![ok(0, "a"), ResultRecord::new(JobIndex::new(1), Err(failed))];
        let ordered = order_by_index(records, 2).unwrap();
        assert!(ordered[0].is_ok());
        assert_eq!(ordered[1].as_ref().unwrap_err().index, JobIndex::new(1));
    }

    #[test]
    fn test_order_by_index_rejects_gaps_and_duplicates() {
        let err = order_by_index(vec![ok(0, "a")], 2).unwrap_err();
        assert!(err.contains("missing result for job #1"));

        let err = order_by_index(vec![ok(0, "a"), ok(0, "b")], 2).unwrap_err();
        assert!(err.contains("duplicate"));

        let err = order_by_index(vec![ok(5, "a")], 2).unwrap_err();
        assert!(err.contains("outside"));
    }

    #[test]
    fn test_empty_batch_orders_to_empty() {
        let ordered = order_by_index::<String>(Vec::new(), 0).unwrap();
        assert!(ordered.is_empty());
    }

    #[test]
    fn test_pending_job_label() {
        let named = PendingJob::new(JobIndex::new(0), Some("fetch".into()), || async { Ok(1) });
        let anonymous = PendingJob::new(JobIndex::new(3), None, || async { Ok(1) });
        assert_eq!(named.label(), "fetch");
        assert_eq!(anonymous.label(), "#3");
    }
}
