use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::anyhow;

use crate::config::WriterConfig;
use crate::core::worker_pool::{CompressionTask, JoinedWorkers};
use crate::core::{LedgerOutcome, SubmissionLedger, Ticket, WorkerPool, WorkerPoolHandle};
use crate::error::ScatterError;
use crate::format::FinalSink;
use crate::gather::{GatherStats, gather_into};
use crate::scatter::{BufferRegistry, ScatterBuffer};
use crate::store::BackingStoreFactory;
use crate::sync::lock_unpoisoned;
use crate::telemetry::worker::{DefaultWorkerTelemetry, WorkerTelemetry};
use crate::telemetry::{self, tags};
use crate::types::{EntryRequest, Result, Submission, duration_to_us};

/// Lifecycle of a [`ScatterWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Accepting submissions.
    Open,
    /// `write_to` is draining workers and merging.
    Finishing,
    /// Archive written, all buffers released.
    Closed,
    /// Finishing failed or the writer was aborted; nothing further is accepted.
    Failed,
}

/// Summary of one finished write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub entries: usize,
    pub buffers_created: usize,
    pub buffers_released: usize,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
    pub elapsed: Duration,
    /// Tasks executed by each worker, indexed by worker id.
    pub worker_task_counts: Vec<usize>,
}

struct WriterInner {
    state: WriterState,
    ledger: SubmissionLedger,
    pool: Option<WorkerPoolHandle>,
}

/// Parallel archive writer.
///
/// Entries are compressed concurrently into per-worker scatter buffers and
/// merged into a [`FinalSink`] by [`write_to`](Self::write_to) in exactly the
/// order they were submitted. Submission is allowed from several threads
/// through a shared reference.
pub struct ScatterWriter {
    config: WriterConfig,
    inner: Mutex<WriterInner>,
    registry: Arc<BufferRegistry>,
    started_at: Instant,
}

impl ScatterWriter {
    /// Validates `config` and starts the worker pool.
    ///
    /// No worker is spawned and `factory` is never called when validation fails.
    pub fn new(config: WriterConfig, factory: impl BackingStoreFactory + 'static) -> Result<Self> {
        Self::with_telemetry(config, Arc::new(factory), Arc::new(DefaultWorkerTelemetry))
    }

    pub fn with_telemetry(
        config: WriterConfig,
        factory: Arc<dyn BackingStoreFactory>,
        telemetry: Arc<dyn WorkerTelemetry>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(BufferRegistry::new());
        let pool = WorkerPool::with_telemetry(
            config.workers,
            config.compression_level,
            factory,
            Arc::clone(&registry),
            telemetry,
        )
        .spawn()?;

        tracing::debug!(
            target: tags::TARGET_WRITER,
            workers = config.workers,
            level = ?config.compression_level,
            "scatter writer opened"
        );

        Ok(Self {
            config,
            inner: Mutex::new(WriterInner {
                state: WriterState::Open,
                ledger: SubmissionLedger::new(),
                pool: Some(pool),
            }),
            registry,
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn state(&self) -> WriterState {
        lock_unpoisoned(&self.inner).state
    }

    /// Tickets issued so far.
    pub fn submitted(&self) -> usize {
        lock_unpoisoned(&self.inner).ledger.len()
    }

    /// Buffer lifecycle counters, live while workers run.
    pub fn buffer_registry(&self) -> &BufferRegistry {
        &self.registry
    }

    /// Queues an entry for compression. Never blocks on compression work.
    pub fn submit(&self, request: EntryRequest) -> Result<Ticket> {
        self.submit_task(Submission::Eager(request))
    }

    /// Queues an entry whose request is built on the worker that compresses it.
    pub fn submit_lazy<F>(&self, build: F) -> Result<Ticket>
    where
        F: FnOnce() -> Result<EntryRequest> + Send + 'static,
    {
        self.submit_task(Submission::lazy(build))
    }

    pub fn submit_task(&self, submission: Submission) -> Result<Ticket> {
        let mut inner = lock_unpoisoned(&self.inner);
        if inner.state != WriterState::Open {
            return Err(ScatterError::ClosedWriter);
        }

        // Ticket issue and queue push happen under one lock, so queue order
        // equals ticket order.
        let WriterInner { ledger, pool, .. } = &mut *inner;
        let Some(pool) = pool.as_ref() else {
            return Err(ScatterError::ClosedWriter);
        };
        let (ticket, reply) = ledger.issue();
        let task = CompressionTask {
            sequence: ticket.sequence(),
            submission,
            reply,
        };
        if let Err(error) = pool.submit(task) {
            ledger.revoke_last(ticket);
            return Err(error);
        }

        telemetry::increment_counter(tags::METRIC_WRITER_SUBMIT_COUNT, 1);
        tracing::trace!(
            target: tags::TARGET_WRITER,
            sequence = ticket.sequence(),
            "entry submitted"
        );
        Ok(ticket)
    }

    /// Waits for every submission, then merges all entries into `sink` in
    /// submission order and finishes it.
    ///
    /// If any task failed nothing is written to `sink`. Every scatter buffer
    /// is released before this returns, whatever the outcome.
    pub fn write_to<S>(&mut self, sink: &mut S) -> Result<WriteStats>
    where
        S: FinalSink + ?Sized,
    {
        let (ledger, pool) = {
            let inner = self
                .inner
                .get_mut()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if inner.state != WriterState::Open {
                return Err(ScatterError::ClosedWriter);
            }
            inner.state = WriterState::Finishing;
            (std::mem::take(&mut inner.ledger), inner.pool.take())
        };

        let result = match pool {
            Some(pool) => self.finish(&ledger, pool, sink),
            None => Err(ScatterError::ClosedWriter),
        };

        let state = if result.is_ok() {
            WriterState::Closed
        } else {
            WriterState::Failed
        };
        lock_unpoisoned(&self.inner).state = state;

        match &result {
            Ok(stats) => {
                telemetry::increment_counter(tags::METRIC_WRITER_FINISH_COUNT, 1);
                tracing::info!(
                    target: tags::TARGET_WRITER,
                    entries = stats.entries,
                    compressed_bytes = stats.compressed_bytes,
                    elapsed_us = duration_to_us(stats.elapsed),
                    "archive written"
                );
            }
            Err(error) => {
                telemetry::increment_counter(tags::METRIC_WRITER_FAILED_COUNT, 1);
                tracing::warn!(
                    target: tags::TARGET_WRITER,
                    %error,
                    outstanding_buffers = self.registry.outstanding(),
                    "archive write failed"
                );
            }
        }
        result
    }

    fn finish<S>(
        &self,
        ledger: &SubmissionLedger,
        mut pool: WorkerPoolHandle,
        sink: &mut S,
    ) -> Result<WriteStats>
    where
        S: FinalSink + ?Sized,
    {
        pool.close_queue();
        let deadline = Instant::now() + self.config.shutdown_timeout;
        let outcome = ledger.await_all(deadline);
        if outcome.pending > 0 {
            // Unstarted tasks would only be thrown away.
            pool.cancel();
        }
        let worker_task_counts = pool.worker_task_counts();
        let mut joined = pool.join(deadline);

        let merged = self.merge(outcome, &mut joined, sink);
        let released = release_all(&mut joined.buffers);

        let gathered = merged?;
        released?;
        Ok(WriteStats {
            entries: gathered.entries,
            buffers_created: self.registry.created(),
            buffers_released: self.registry.released(),
            uncompressed_bytes: gathered.uncompressed_bytes,
            compressed_bytes: gathered.compressed_bytes,
            elapsed: self.started_at.elapsed(),
            worker_task_counts,
        })
    }

    fn merge<S>(
        &self,
        outcome: LedgerOutcome,
        joined: &mut JoinedWorkers,
        sink: &mut S,
    ) -> Result<GatherStats>
    where
        S: FinalSink + ?Sized,
    {
        if let Some(error) = outcome.first_error {
            return Err(error.with_context(format!(
                "{} of {} entries failed",
                outcome.failed,
                outcome.receipts.len()
            )));
        }
        if outcome.pending > 0 || joined.detached > 0 {
            return Err(ScatterError::ShutdownTimeout {
                pending: outcome.pending.max(joined.detached),
                waited_ms: self.config.shutdown_timeout.as_millis(),
            });
        }
        if let Some(details) = joined.panics.first() {
            return Err(ScatterError::Other(anyhow!(
                "compression worker panicked outside a task: {details}"
            )));
        }

        let receipts: Vec<_> = outcome.receipts.into_iter().flatten().collect();
        gather_into(&receipts, &mut joined.buffers, sink)
    }

    /// Aborts the writer: queued work is discarded and every buffer released.
    ///
    /// Does nothing once the writer has finished or been closed.
    pub fn close(&self) -> Result<()> {
        let pool = {
            let mut inner = lock_unpoisoned(&self.inner);
            if inner.state != WriterState::Open {
                return Ok(());
            }
            inner.state = WriterState::Failed;
            inner.ledger = SubmissionLedger::new();
            inner.pool.take()
        };
        let Some(mut pool) = pool else {
            return Ok(());
        };

        pool.cancel();
        let mut joined = pool.join(Instant::now() + self.config.shutdown_timeout);
        if joined.detached > 0 {
            tracing::warn!(
                target: tags::TARGET_WRITER,
                detached = joined.detached,
                "workers still running after close; their buffers are released on exit"
            );
        }
        tracing::debug!(target: tags::TARGET_WRITER, "scatter writer closed");
        release_all(&mut joined.buffers)
    }
}

impl Drop for ScatterWriter {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(target: tags::TARGET_WRITER, %error, "failed to close scatter writer");
        }
    }
}

impl std::fmt::Debug for ScatterWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock_unpoisoned(&self.inner);
        f.debug_struct("ScatterWriter")
            .field("state", &inner.state)
            .field("submitted", &inner.ledger.len())
            .field("workers", &self.config.workers)
            .finish()
    }
}

/// Closes every buffer, returning the first release failure.
fn release_all(buffers: &mut [Option<ScatterBuffer>]) -> Result<()> {
    let mut first_error = None;
    for buffer in buffers.iter_mut().flatten() {
        if let Err(error) = buffer.close() {
            tracing::warn!(
                target: tags::TARGET_WRITER,
                buffer = buffer.id(),
                %error,
                "failed to release scatter buffer"
            );
            first_error.get_or_insert(error);
        }
    }
    match first_error {
        Some(error) => Err(error.with_context("releasing scatter buffers")),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStoreFactory;

    #[test]
    fn invalid_config_never_starts() {
        let config = WriterConfig::new(0, Default::default());
        let result = ScatterWriter::new(config, MemoryStoreFactory::new());
        assert!(matches!(
            result.err(),
            Some(ScatterError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn close_rejects_later_submissions() -> Result<()> {
        let writer = ScatterWriter::new(
            WriterConfig::new(2, Default::default()),
            MemoryStoreFactory::new(),
        )?;
        writer.submit(EntryRequest::from_bytes("a", "alpha"))?;
        writer.close()?;
        writer.close()?;
        assert_eq!(writer.state(), WriterState::Failed);
        assert!(matches!(
            writer.submit(EntryRequest::from_bytes("b", "beta")),
            Err(ScatterError::ClosedWriter)
        ));
        assert_eq!(writer.buffer_registry().outstanding(), 0);
        Ok(())
    }
}
