/// Tracing target for writer lifecycle events.
pub const TARGET_WRITER: &str = "scatterzip::writer";
/// Tracing target for worker task events.
pub const TARGET_WORKER: &str = "scatterzip::worker";
/// Tracing target for gather/merge events.
pub const TARGET_GATHER: &str = "scatterzip::gather";

pub const METRIC_WRITER_SUBMIT_COUNT: &str = "scatterzip.writer.submit.count";
pub const METRIC_WRITER_FINISH_COUNT: &str = "scatterzip.writer.finish.count";
pub const METRIC_WRITER_FAILED_COUNT: &str = "scatterzip.writer.failed.count";

pub const METRIC_WORKER_TASK_COUNT: &str = "scatterzip.worker.task.count";
pub const METRIC_WORKER_TASK_FAIL_COUNT: &str = "scatterzip.worker.task.fail.count";
pub const METRIC_WORKER_TASK_LATENCY_US: &str = "scatterzip.worker.task.latency_us";
pub const METRIC_WORKER_ACTIVE_COUNT: &str = "scatterzip.worker.active.count";

pub const METRIC_BUFFER_CREATED_COUNT: &str = "scatterzip.buffer.created.count";
pub const METRIC_BUFFER_RELEASED_COUNT: &str = "scatterzip.buffer.released.count";
pub const METRIC_BUFFER_OPEN_COUNT: &str = "scatterzip.buffer.open.count";

pub const METRIC_COMPRESSION_APPLY_COUNT: &str = "scatterzip.compression.apply.count";
pub const METRIC_COMPRESSION_APPLY_LATENCY_US: &str = "scatterzip.compression.apply.latency_us";
pub const METRIC_COMPRESSION_INPUT_BYTES: &str = "scatterzip.compression.input_bytes";
pub const METRIC_COMPRESSION_OUTPUT_BYTES: &str = "scatterzip.compression.output_bytes";

pub const METRIC_GATHER_ENTRY_COUNT: &str = "scatterzip.gather.entry.count";
pub const METRIC_GATHER_LATENCY_US: &str = "scatterzip.gather.latency_us";
