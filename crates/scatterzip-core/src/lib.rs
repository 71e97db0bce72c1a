pub mod compression;
pub mod config;
pub mod core;
pub mod error;
pub mod format;
pub mod gather;
pub mod scatter;
pub mod store;
mod sync;
pub mod telemetry;
pub mod types;
pub mod writer;

pub use config::{DEFAULT_SHUTDOWN_TIMEOUT, WriterConfig};
pub use crate::core::{SubmissionLedger, TaskReceipt, Ticket, WorkerPool, WorkerPoolHandle};
pub use error::ScatterError;
pub use format::{FinalSink, ZipArchiveSink};
pub use gather::{GatherStats, gather_into};
pub use scatter::{BufferRegistry, CompressedEntry, ScatterBuffer, ScatterRecord};
pub use store::{
    BackingStore, BackingStoreFactory, MemoryStore, MemoryStoreFactory, TempFileStore,
    TempFileStoreFactory,
};
pub use telemetry::worker::{DefaultWorkerTelemetry, WorkerTelemetry};
pub use types::{
    CompressionLevel, CompressionMethod, EntryDigest, EntryMetadata, EntryRequest, EntrySource,
    Result, Submission,
};
pub use writer::{ScatterWriter, WriteStats, WriterState};
