//! Single-threaded merge of scatter buffers into the final sink.
//!
//! Tickets are visited in submission order and each one drains exactly one
//! entry from the buffer that compressed it. Buffers hold their entries in
//! submission order, so the n-th drain of a buffer always yields the entry of
//! the n-th ticket that buffer served.

use std::time::Instant;

use crate::core::TaskReceipt;
use crate::error::ScatterError;
use crate::format::FinalSink;
use crate::scatter::ScatterBuffer;
use crate::telemetry::tags;
use crate::types::{Result, duration_to_us};

/// Totals over every entry emitted by one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatherStats {
    pub entries: usize,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
}

/// Drains `buffers` into `sink` in the order of `receipts`, then finishes the sink.
///
/// `buffers` is indexed by buffer id. Every receipt must come from a task
/// that completed successfully.
pub fn gather_into<S>(
    receipts: &[TaskReceipt],
    buffers: &mut [Option<ScatterBuffer>],
    sink: &mut S,
) -> Result<GatherStats>
where
    S: FinalSink + ?Sized,
{
    let start = Instant::now();
    let mut stats = GatherStats::default();

    for receipt in receipts {
        let buffer = buffers
            .get_mut(receipt.buffer)
            .and_then(Option::as_mut)
            .ok_or(ScatterError::ExhaustedBuffer {
                buffer: receipt.buffer,
                drained: 0,
            })?;

        if buffer.drained() != receipt.position {
            return Err(ScatterError::OrderViolation {
                buffer: receipt.buffer,
                expected: receipt.position,
                actual: buffer.drained(),
            });
        }

        let entry = buffer.drain_next()?;
        if entry.sequence != receipt.sequence {
            return Err(ScatterError::OrderViolation {
                buffer: receipt.buffer,
                expected: receipt.sequence,
                actual: entry.sequence,
            });
        }

        stats.entries += 1;
        stats.uncompressed_bytes += entry.digest.uncompressed_size;
        stats.compressed_bytes += entry.digest.compressed_size;
        sink.append_raw(entry)?;
    }

    for buffer in buffers.iter().flatten() {
        if buffer.remaining() > 0 {
            tracing::warn!(
                target: tags::TARGET_GATHER,
                buffer = buffer.id(),
                remaining = buffer.remaining(),
                "scatter buffer holds entries without tickets"
            );
        }
    }

    sink.finish()?;

    tracing::debug!(
        target: tags::TARGET_GATHER,
        entries = stats.entries,
        compressed_bytes = stats.compressed_bytes,
        elapsed_us = duration_to_us(start.elapsed()),
        "gather complete"
    );
    Ok(stats)
}
