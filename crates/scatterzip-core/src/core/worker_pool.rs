use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::ledger::{ReceiptSender, TaskReceipt};
use crate::error::ScatterError;
use crate::scatter::{BufferRegistry, ScatterBuffer};
use crate::store::BackingStoreFactory;
use crate::telemetry::tags;
use crate::telemetry::worker::{DefaultWorkerTelemetry, WorkerTelemetry};
use crate::types::{CompressionLevel, Result, Submission};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One queued compression job.
pub(crate) struct CompressionTask {
    pub(crate) sequence: usize,
    pub(crate) submission: Submission,
    pub(crate) reply: ReceiptSender,
}

/// Fixed set of compression workers pulling from one shared FIFO queue.
///
/// Each worker lazily creates a single [`ScatterBuffer`] on its first task and
/// appends every later task to it. Because the queue is FIFO and each worker
/// runs one task at a time, a buffer's entries are a subsequence of the
/// submission order.
pub struct WorkerPool {
    num_workers: usize,
    level: CompressionLevel,
    factory: Arc<dyn BackingStoreFactory>,
    registry: Arc<BufferRegistry>,
    telemetry: Arc<dyn WorkerTelemetry>,
}

impl WorkerPool {
    pub fn new(
        num_workers: usize,
        level: CompressionLevel,
        factory: Arc<dyn BackingStoreFactory>,
        registry: Arc<BufferRegistry>,
    ) -> Self {
        Self::with_telemetry(
            num_workers,
            level,
            factory,
            registry,
            Arc::new(DefaultWorkerTelemetry),
        )
    }

    pub fn with_telemetry(
        num_workers: usize,
        level: CompressionLevel,
        factory: Arc<dyn BackingStoreFactory>,
        registry: Arc<BufferRegistry>,
        telemetry: Arc<dyn WorkerTelemetry>,
    ) -> Self {
        Self {
            num_workers: num_workers.max(1),
            level,
            factory,
            registry,
            telemetry,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Spawns the worker threads.
    pub fn spawn(self) -> Result<WorkerPoolHandle> {
        let (task_tx, task_rx) = unbounded::<CompressionTask>();
        let state = Arc::new(WorkerPoolState::new(self.num_workers));
        let shared = Arc::new(WorkerShared {
            level: self.level,
            factory: self.factory,
            registry: self.registry,
            telemetry: self.telemetry,
            state: Arc::clone(&state),
        });

        let mut worker_handles = Vec::with_capacity(self.num_workers);
        for worker_id in 0..self.num_workers {
            let worker_rx = task_rx.clone();
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("scatterzip-worker-{worker_id}"))
                .spawn(move || run_worker_loop(worker_id, worker_rx, worker_shared));

            match spawned {
                Ok(handle) => worker_handles.push(handle),
                Err(error) => {
                    // Already-running workers exit once the queue sender drops.
                    drop(task_tx);
                    for handle in worker_handles {
                        if let Err(payload) = handle.join() {
                            tracing::warn!(
                                target: tags::TARGET_WORKER,
                                details = %panic_details(payload.as_ref()),
                                "worker panicked during spawn rollback"
                            );
                        }
                    }
                    return Err(ScatterError::Io(error).with_context("spawning worker thread"));
                }
            }
        }

        Ok(WorkerPoolHandle {
            state,
            task_tx: Some(task_tx),
            worker_handles,
        })
    }
}

struct WorkerPoolState {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    cancelled: AtomicBool,
    task_counts: Vec<AtomicUsize>,
}

impl WorkerPoolState {
    fn new(num_workers: usize) -> Self {
        Self {
            submitted: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            task_counts: (0..num_workers).map(|_| AtomicUsize::new(0)).collect(),
        }
    }
}

struct WorkerShared {
    level: CompressionLevel,
    factory: Arc<dyn BackingStoreFactory>,
    registry: Arc<BufferRegistry>,
    telemetry: Arc<dyn WorkerTelemetry>,
    state: Arc<WorkerPoolState>,
}

/// Per-worker state carried by the thread and handed back when it exits.
#[derive(Debug)]
pub struct WorkerContext {
    pub worker_id: usize,
    pub buffer: Option<ScatterBuffer>,
}

impl WorkerContext {
    fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            buffer: None,
        }
    }

    fn buffer_or_create(&mut self, shared: &WorkerShared) -> Result<&mut ScatterBuffer> {
        let buffer = match self.buffer.take() {
            Some(buffer) => buffer,
            None => {
                let store = shared
                    .factory
                    .create()
                    .map_err(ScatterError::BackingStore)?;
                shared.telemetry.on_buffer_created(self.worker_id);
                ScatterBuffer::new(
                    self.worker_id,
                    shared.level,
                    store,
                    Arc::clone(&shared.registry),
                )
            }
        };
        Ok(self.buffer.insert(buffer))
    }

    fn execute(
        &mut self,
        sequence: usize,
        submission: Submission,
        shared: &WorkerShared,
    ) -> Result<TaskReceipt> {
        let request = submission
            .resolve()
            .map_err(|error| error.with_context(format!("building entry #{sequence}")))?;
        let buffer = self.buffer_or_create(shared)?;
        let position = buffer.append(sequence, request)?;
        Ok(TaskReceipt {
            sequence,
            buffer: self.worker_id,
            position,
        })
    }
}

/// Collected worker state after the pool has been joined.
#[derive(Debug, Default)]
pub struct JoinedWorkers {
    /// Buffers indexed by worker id; `None` for workers that never ran a task
    /// or were not joined.
    pub buffers: Vec<Option<ScatterBuffer>>,
    /// Panic messages of worker threads that died outside a task.
    pub panics: Vec<String>,
    /// Workers still running when the deadline passed. Their buffers are
    /// released by the worker thread itself when it exits.
    pub detached: usize,
}

/// Runtime handle for a spawned worker pool.
pub struct WorkerPoolHandle {
    state: Arc<WorkerPoolState>,
    task_tx: Option<Sender<CompressionTask>>,
    worker_handles: Vec<JoinHandle<WorkerContext>>,
}

impl WorkerPoolHandle {
    pub fn num_workers(&self) -> usize {
        self.state.task_counts.len()
    }

    /// Queues a task. Never blocks.
    pub(crate) fn submit(&self, task: CompressionTask) -> Result<()> {
        let Some(task_tx) = self.task_tx.as_ref() else {
            return Err(ScatterError::ClosedWriter);
        };
        self.state.submitted.fetch_add(1, Ordering::AcqRel);
        if task_tx.send(task).is_err() {
            self.state.submitted.fetch_sub(1, Ordering::AcqRel);
            return Err(ScatterError::ClosedWriter);
        }
        Ok(())
    }

    /// Stops accepting tasks; workers exit after draining the queue.
    pub fn close_queue(&mut self) {
        self.task_tx = None;
    }

    /// Closes the queue and makes workers reject every task not yet started.
    pub fn cancel(&mut self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.close_queue();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.task_tx.is_some()
    }

    pub fn submitted_count(&self) -> usize {
        self.state.submitted.load(Ordering::Acquire)
    }

    pub fn completed_count(&self) -> usize {
        self.state.completed.load(Ordering::Acquire)
    }

    pub fn worker_task_counts(&self) -> Vec<usize> {
        self.state
            .task_counts
            .iter()
            .map(|counter| counter.load(Ordering::Acquire))
            .collect()
    }

    /// Closes the queue and joins every worker that exits before `deadline`.
    ///
    /// Threads cannot be cancelled, so workers still busy at the deadline are
    /// detached rather than killed.
    pub fn join(mut self, deadline: Instant) -> JoinedWorkers {
        self.close_queue();
        let mut joined = JoinedWorkers {
            buffers: (0..self.num_workers()).map(|_| None).collect(),
            ..JoinedWorkers::default()
        };

        for handle in self.worker_handles.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL_INTERVAL);
            }
            if !handle.is_finished() {
                joined.detached += 1;
                continue;
            }

            match handle.join() {
                Ok(context) => {
                    let slot = context.worker_id;
                    if let Some(entry) = joined.buffers.get_mut(slot) {
                        *entry = context.buffer;
                    }
                }
                Err(payload) => joined.panics.push(panic_details(payload.as_ref())),
            }
        }

        joined
    }
}

fn run_worker_loop(
    worker_id: usize,
    tasks: Receiver<CompressionTask>,
    shared: Arc<WorkerShared>,
) -> WorkerContext {
    let mut context = WorkerContext::new(worker_id);

    for task in tasks.iter() {
        let CompressionTask {
            sequence,
            submission,
            reply,
        } = task;
        if shared.state.cancelled.load(Ordering::Acquire) {
            shared.state.completed.fetch_add(1, Ordering::AcqRel);
            let _ = reply.send(Err(ScatterError::ClosedWriter));
            continue;
        }
        shared.telemetry.on_task_started(worker_id, sequence);
        let started_at = Instant::now();

        let result = match catch_unwind(AssertUnwindSafe(|| {
            context.execute(sequence, submission, &shared)
        })) {
            Ok(result) => result,
            Err(payload) => Err(ScatterError::TaskPanicked {
                sequence,
                details: panic_details(payload.as_ref()),
            }),
        };

        let elapsed = started_at.elapsed();
        match &result {
            Ok(_) => shared
                .telemetry
                .on_task_finished(worker_id, sequence, elapsed),
            Err(_) => shared.telemetry.on_task_failed(worker_id, sequence, elapsed),
        }

        shared.state.completed.fetch_add(1, Ordering::AcqRel);
        shared.state.task_counts[worker_id].fetch_add(1, Ordering::AcqRel);

        // The writer may already have given up on this ticket.
        let _ = reply.send(result);
    }

    context
}

fn panic_details(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::ledger::SubmissionLedger;
    use crate::store::MemoryStoreFactory;
    use crate::types::EntryRequest;

    fn pool(workers: usize) -> (WorkerPoolHandle, Arc<BufferRegistry>) {
        let registry = Arc::new(BufferRegistry::new());
        let handle = WorkerPool::new(
            workers,
            CompressionLevel::Level(1),
            Arc::new(MemoryStoreFactory::new()),
            Arc::clone(&registry),
        )
        .spawn()
        .expect("spawn worker pool");
        (handle, registry)
    }

    fn submit(handle: &WorkerPoolHandle, ledger: &mut SubmissionLedger, data: Vec<u8>) {
        let (ticket, reply) = ledger.issue();
        let sequence = ticket.sequence();
        let request = EntryRequest::from_bytes(format!("{sequence}"), data);
        handle
            .submit(CompressionTask {
                sequence,
                submission: request.into(),
                reply,
            })
            .expect("queue open");
    }

    #[test]
    fn buffers_hold_increasing_sequences() {
        let (handle, registry) = pool(3);
        let mut ledger = SubmissionLedger::new();
        for index in 0..60usize {
            submit(&handle, &mut ledger, vec![index as u8; 100 + index * 13]);
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        let outcome = ledger.await_all(deadline);
        assert!(outcome.is_complete());
        assert_eq!(handle.completed_count(), 60);
        assert_eq!(handle.worker_task_counts().iter().sum::<usize>(), 60);

        let joined = handle.join(deadline);
        assert_eq!(joined.detached, 0);
        assert!(joined.panics.is_empty());

        let mut total = 0;
        for (worker_id, buffer) in joined.buffers.iter().enumerate() {
            let Some(buffer) = buffer else { continue };
            assert_eq!(buffer.id(), worker_id);
            let sequences: Vec<usize> = buffer.records().iter().map(|r| r.sequence).collect();
            assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));
            total += sequences.len();
        }
        assert_eq!(total, 60);

        for receipt in outcome.receipts.iter().flatten() {
            let buffer = joined.buffers[receipt.buffer]
                .as_ref()
                .expect("receipt names a live buffer");
            assert_eq!(buffer.records()[receipt.position].sequence, receipt.sequence);
        }

        drop(joined);
        assert_eq!(registry.outstanding(), 0);
    }

    #[test]
    fn closed_queue_rejects_tasks() {
        let (mut handle, _registry) = pool(1);
        handle.close_queue();
        assert!(!handle.is_accepting());

        let mut ledger = SubmissionLedger::new();
        let (ticket, reply) = ledger.issue();
        let result = handle.submit(CompressionTask {
            sequence: ticket.sequence(),
            submission: EntryRequest::from_bytes("late", "x").into(),
            reply,
        });
        assert!(matches!(result, Err(ScatterError::ClosedWriter)));
        assert_eq!(handle.submitted_count(), 0);
    }

    #[test]
    fn cancelled_pool_rejects_queued_work() {
        let (mut handle, _registry) = pool(1);
        handle.cancel();
        assert!(handle.is_cancelled());

        let joined = handle.join(Instant::now() + Duration::from_secs(5));
        assert_eq!(joined.detached, 0);
        assert!(joined.buffers.iter().all(Option::is_none));
    }

    #[test]
    fn panic_details_reads_common_payloads() {
        let static_payload: Box<dyn std::any::Any + Send> = Box::new("static");
        let owned_payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let other_payload: Box<dyn std::any::Any + Send> = Box::new(7u32);
        assert_eq!(panic_details(static_payload.as_ref()), "static");
        assert_eq!(panic_details(owned_payload.as_ref()), "owned");
        assert_eq!(panic_details(other_payload.as_ref()), "unknown panic payload");
    }
}
