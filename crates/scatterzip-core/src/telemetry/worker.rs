use std::time::Duration;

use crate::telemetry::{self, tags};
use crate::types::duration_to_us;

/// Telemetry contract for compression workers.
///
/// Hooks run on the worker thread and must not block.
pub trait WorkerTelemetry: Send + Sync {
    fn on_task_started(&self, worker_id: usize, sequence: usize);
    fn on_task_finished(&self, worker_id: usize, sequence: usize, elapsed: Duration);
    fn on_task_failed(&self, worker_id: usize, sequence: usize, elapsed: Duration);
    fn on_buffer_created(&self, worker_id: usize);
}

/// Reports worker activity into the metric registry and `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultWorkerTelemetry;

impl WorkerTelemetry for DefaultWorkerTelemetry {
    fn on_task_started(&self, worker_id: usize, sequence: usize) {
        telemetry::adjust_gauge(tags::METRIC_WORKER_ACTIVE_COUNT, 1);
        tracing::trace!(
            target: tags::TARGET_WORKER,
            worker_id,
            sequence,
            "compression task started"
        );
    }

    fn on_task_finished(&self, worker_id: usize, sequence: usize, elapsed: Duration) {
        telemetry::increment_counter(tags::METRIC_WORKER_TASK_COUNT, 1);
        telemetry::record_latency(tags::METRIC_WORKER_TASK_LATENCY_US, elapsed);
        telemetry::adjust_gauge(tags::METRIC_WORKER_ACTIVE_COUNT, -1);
        tracing::debug!(
            target: tags::TARGET_WORKER,
            worker_id,
            sequence,
            elapsed_us = duration_to_us(elapsed),
            "compression task finished"
        );
    }

    fn on_task_failed(&self, worker_id: usize, sequence: usize, elapsed: Duration) {
        telemetry::increment_counter(tags::METRIC_WORKER_TASK_FAIL_COUNT, 1);
        telemetry::record_latency(tags::METRIC_WORKER_TASK_LATENCY_US, elapsed);
        telemetry::adjust_gauge(tags::METRIC_WORKER_ACTIVE_COUNT, -1);
        tracing::warn!(
            target: tags::TARGET_WORKER,
            worker_id,
            sequence,
            elapsed_us = duration_to_us(elapsed),
            "compression task failed"
        );
    }

    fn on_buffer_created(&self, worker_id: usize) {
        telemetry::increment_counter(tags::METRIC_BUFFER_CREATED_COUNT, 1);
        tracing::debug!(
            target: tags::TARGET_WORKER,
            worker_id,
            "scatter buffer created"
        );
    }
}
