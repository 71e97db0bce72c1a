use std::time::Instant;

use crate::telemetry::{self, tags};
use crate::types::{CompressionLevel, CompressionMethod, EntryDigest};

pub mod deflate;

pub use deflate::CodecError;

/// Size of the read chunk used when pulling an entry's content stream.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Compresses (or stores) one entry's content into `sink`.
pub fn compress_entry<W: std::io::Write>(
    level: CompressionLevel,
    method: CompressionMethod,
    source: &mut dyn std::io::Read,
    sink: &mut W,
) -> Result<EntryDigest, CodecError> {
    let start = Instant::now();
    let result = match method {
        CompressionMethod::Stored => deflate::store(source, sink),
        CompressionMethod::Deflated => deflate::apply(level.effective(), source, sink),
    };

    if let Ok(digest) = &result {
        telemetry::increment_counter(tags::METRIC_COMPRESSION_APPLY_COUNT, 1);
        telemetry::record_latency(tags::METRIC_COMPRESSION_APPLY_LATENCY_US, start.elapsed());
        telemetry::record_histogram(tags::METRIC_COMPRESSION_INPUT_BYTES, digest.uncompressed_size);
        telemetry::record_histogram(tags::METRIC_COMPRESSION_OUTPUT_BYTES, digest.compressed_size);
    }

    result
}
