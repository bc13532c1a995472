//! The Job Layer's own queue abstraction (spec.md §4.7, §6: "three
//! positional string args `(model_name, record_id, crm_name)`").
//!
//! `JobBackend` is the seam a host implements against its real queue
//! (Sidekiq-equivalent, SQS, etc). `InMemoryJobBackend` is the reference
//! implementation this crate tests against and that single-process hosts
//! can use directly, grounded on the polling/channel worker shape used by
//! the retrieval pack's own background job runners.

use std::time::Duration;

use tokio::sync::mpsc;

/// One unit of work: `(model_name, resource_id, crm_name)` plus the
/// 1-indexed attempt number this push represents (spec.md §4.7's retry
/// count).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobArgs {
    pub model_name: String,
    pub resource_id: i64,
    pub crm_name: String,
    pub attempt: u32,
}

impl JobArgs {
    pub fn first_attempt(model_name: impl Into<String>, resource_id: i64, crm_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            resource_id,
            crm_name: crm_name.into(),
            attempt: 1,
        }
    }

    /// The wire-level shape spec.md §6 documents for the job backend's
    /// worker arguments.
    pub fn as_tuple(&self) -> (String, String, String) {
        (self.model_name.clone(), self.resource_id.to_string(), self.crm_name.clone())
    }
}

/// A job backend: somewhere to push `(model_name, id, crm_name, attempt)`
/// for a worker to pick up later, optionally after `delay` (used for
/// retry scheduling, spec.md §4.7).
pub trait JobBackend: Send + Sync {
    fn push(&self, job: JobArgs, delay: Option<Duration>);
}

/// Reference, single-process `JobBackend`: an unbounded channel, with
/// delayed pushes realized as a detached `tokio::time::sleep` task. Real
/// deployments (many worker processes draining a shared queue, spec.md
/// §5) plug in their own backend instead.
pub struct InMemoryJobBackend {
    tx: mpsc::UnboundedSender<JobArgs>,
    queue_name: String,
}

pub struct InMemoryJobReceiver {
    rx: mpsc::UnboundedReceiver<JobArgs>,
}

impl InMemoryJobBackend {
    /// `queue_name` is the process-wide configurable queue name (spec.md
    /// §6); this reference backend only uses it for logging, since it
    /// has exactly one underlying channel.
    pub fn channel(queue_name: impl Into<String>) -> (Self, InMemoryJobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                queue_name: queue_name.into(),
            },
            InMemoryJobReceiver { rx },
        )
    }
}

impl JobBackend for InMemoryJobBackend {
    fn push(&self, job: JobArgs, delay: Option<Duration>) {
        match delay {
            None => {
                log::debug!("etlify[{}]: enqueued {:?}", self.queue_name, job.as_tuple());
                let _ = self.tx.send(job);
            }
            Some(delay) => {
                log::debug!(
                    "etlify[{}]: scheduled {:?} in {:?}",
                    self.queue_name,
                    job.as_tuple(),
                    delay
                );
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(job);
                });
            }
        }
    }
}

impl InMemoryJobReceiver {
    /// Drains every job currently available without blocking. A worker
    /// loop calls this in a poll cycle; delayed jobs surface once their
    /// `sleep` elapses and they land back on the channel.
    pub fn drain(&mut self) -> Vec<JobArgs> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.rx.try_recv() {
            jobs.push(job);
        }
        jobs
    }

    /// Awaits at least one job, then drains whatever else is ready.
    pub async fn recv_batch(&mut self) -> Vec<JobArgs> {
        match self.rx.recv().await {
            Some(first) => {
                let mut jobs = vec![first];
                jobs.extend(self.drain());
                jobs
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn undelayed_push_is_immediately_drainable() {
        let (backend, mut rx) = InMemoryJobBackend::channel("etlify");
        backend.push(JobArgs::first_attempt("User", 1, "hubspot"), None);
        let jobs = rx.recv_batch().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].resource_id, 1);
    }

    #[tokio::test]
    async fn delayed_push_is_not_immediately_drainable() {
        let (backend, mut rx) = InMemoryJobBackend::channel("etlify");
        backend.push(JobArgs::first_attempt("User", 1, "hubspot"), Some(Duration::from_millis(30)));
        assert!(rx.drain().is_empty());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(rx.drain().len(), 1);
    }
}
