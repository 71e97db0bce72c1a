//! Temporary media that hold one worker's compressed output until merge.
//!
//! A store is append-only while its worker compresses into it, then read
//! back sequentially exactly once by the gather stage, then released.

use std::io::{self, Read, Write};

pub mod file;
pub mod memory;

pub use file::{TempFileStore, TempFileStoreFactory};
pub use memory::{MemoryStore, MemoryStoreFactory};

/// Append-only byte sink that can be streamed back during merge.
pub trait BackingStore: Write + Send {
    /// Bytes appended so far.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seals the store for writing and returns a reader positioned at byte 0.
    ///
    /// Called at most once, after the owning worker has stopped appending.
    fn reader(&mut self) -> io::Result<Box<dyn Read + Send>>;

    /// Reclaims the temporary resource. Must be idempotent.
    fn release(&mut self) -> io::Result<()>;

    fn is_released(&self) -> bool;
}

/// Produces a fresh, independent store for each worker buffer.
pub trait BackingStoreFactory: Send + Sync {
    fn create(&self) -> io::Result<Box<dyn BackingStore>>;
}

impl<F> BackingStoreFactory for F
where
    F: Fn() -> io::Result<Box<dyn BackingStore>> + Send + Sync,
{
    fn create(&self) -> io::Result<Box<dyn BackingStore>> {
        self()
    }
}

pub(crate) fn released_error() -> io::Error {
    io::Error::other("backing store already released")
}

pub(crate) fn sealed_error() -> io::Error {
    io::Error::other("backing store sealed for reading")
}
