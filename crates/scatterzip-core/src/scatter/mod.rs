mod buffer;

pub use buffer::{CompressedEntry, ScatterBuffer, ScatterRecord};

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::telemetry::{self, tags};

/// Counts scatter buffers created and released over a writer's lifetime.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    created: AtomicUsize,
    released: AtomicUsize,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_created(&self) {
        self.created.fetch_add(1, Ordering::AcqRel);
        telemetry::adjust_gauge(tags::METRIC_BUFFER_OPEN_COUNT, 1);
    }

    pub(crate) fn on_released(&self) {
        self.released.fetch_add(1, Ordering::AcqRel);
        telemetry::increment_counter(tags::METRIC_BUFFER_RELEASED_COUNT, 1);
        telemetry::adjust_gauge(tags::METRIC_BUFFER_OPEN_COUNT, -1);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }

    /// Buffers created but not yet released.
    pub fn outstanding(&self) -> usize {
        self.created().saturating_sub(self.released())
    }
}
