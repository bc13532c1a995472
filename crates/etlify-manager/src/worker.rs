//! Worker dispatch (spec.md §4.7): loads the record named by a
//! `JobArgs`, runs it through the Synchronizer, then unconditionally
//! clears the EnqueueLock and — on an `AttemptOutcome::Error` still
//! under the retry cap — re-enters the gated enqueue path for the next
//! attempt.

use std::sync::Arc;

use rusqlite::Connection;

use etlify_core::{AttemptOutcome, BatchSync, EngineContext, RecordLoader, Synchronizer};

use crate::cache::CacheStore;
use crate::enqueuer::JobEnqueuer;
use crate::error::Result;
use crate::lock::enqueue_lock_key;
use crate::queue::{InMemoryJobReceiver, JobArgs};
use crate::retry::RetryPolicy;

pub struct JobWorker {
    cache: Arc<dyn CacheStore>,
    enqueuer: Arc<JobEnqueuer>,
    retry: RetryPolicy,
}

impl JobWorker {
    pub fn new(cache: Arc<dyn CacheStore>, enqueuer: Arc<JobEnqueuer>, retry: RetryPolicy) -> Self {
        Self { cache, enqueuer, retry }
    }

    /// Runs one job to completion. Never raises on adapter failure — a
    /// failed attempt is captured, persisted by the Synchronizer, and
    /// turned into a rescheduled retry here. `Result::Err` is reserved
    /// for misconfiguration (spec.md §7), same as `Synchronizer::attempt`.
    pub async fn execute(
        &self,
        ctx: &EngineContext,
        conn: &Connection,
        loader: &dyn RecordLoader,
        job: JobArgs,
    ) -> Result<()> {
        let key = enqueue_lock_key(&job.model_name, job.resource_id, &job.crm_name);
        let outcome = self.run_attempt(ctx, conn, loader, &job).await;

        // Unconditionally clear the lock (spec.md §4.7: "in a
        // finally-equivalent block ... regardless of success, failure,
        // or cancellation") before deciding whether to retry, since a
        // rescheduled retry re-enters the gated path and needs the slot
        // free to re-arm it.
        self.cache.clear(&key);

        match &outcome {
            Ok(Some(AttemptOutcome::Error { message, .. })) => {
                if self.retry.should_retry(job.attempt) {
                    log::warn!(
                        "etlify: ({}, {}, {}) attempt {} failed ({message}), scheduling retry",
                        job.model_name,
                        job.resource_id,
                        job.crm_name,
                        job.attempt,
                    );
                    let next = JobArgs {
                        attempt: job.attempt + 1,
                        ..job.clone()
                    };
                    self.enqueuer.enqueue_gated(next, Some(self.retry.delay));
                } else {
                    etlify_error_support::report_error!(
                        "etlify-sync-exhausted",
                        "({}, {}, {}) exhausted retries after attempt {} ({message})",
                        job.model_name,
                        job.resource_id,
                        job.crm_name,
                        job.attempt,
                    );
                }
            }
            Ok(None) => {
                log::debug!(
                    "etlify: ({}, {}, {}) record not found, worker is a no-op",
                    job.model_name,
                    job.resource_id,
                    job.crm_name
                );
            }
            _ => {}
        }

        outcome.map(|_| ())
    }

    async fn run_attempt(
        &self,
        ctx: &EngineContext,
        conn: &Connection,
        loader: &dyn RecordLoader,
        job: &JobArgs,
    ) -> Result<Option<AttemptOutcome>> {
        let record = match loader.load(&job.model_name, job.resource_id) {
            Some(record) => record,
            // spec.md §4.7: "If the target record cannot be found, the
            // worker is a no-op."
            None => return Ok(None),
        };
        let outcome = Synchronizer::attempt(ctx, conn, record.as_ref(), &job.crm_name).await?;
        Ok(Some(outcome))
    }

    /// Drains every job currently available on `rx` and executes them in
    /// turn, sequentially. Used by single-process hosts and tests; a
    /// multi-worker deployment instead has each worker process call
    /// [`Self::execute`] against jobs popped from its own queue
    /// connection (spec.md §5: "parallel worker processes/threads drain
    /// a shared job queue").
    pub async fn drain(
        &self,
        ctx: &EngineContext,
        conn: &Connection,
        loader: &dyn RecordLoader,
        rx: &mut InMemoryJobReceiver,
    ) -> Result<usize> {
        let jobs = rx.drain();
        let count = jobs.len();
        for job in jobs {
            self.execute(ctx, conn, loader, job).await?;
        }
        Ok(count)
    }

    /// Convenience used by hosts that want a one-shot "sync everything
    /// stale, inline, right now" entry point without standing up a
    /// worker loop at all — delegates straight to `BatchSync` in
    /// non-async mode.
    pub async fn sync_stale_inline(
        ctx: &EngineContext,
        conn: &Connection,
        loader: &dyn RecordLoader,
        options: &etlify_core::BatchOptions,
        interruptee: &dyn etlify_interrupt_support::Interruptee,
    ) -> etlify_core::Result<etlify_core::BatchStats> {
        BatchSync::run(ctx, conn, loader, options, interruptee).await
    }
}
