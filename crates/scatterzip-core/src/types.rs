use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};

use crate::error::ScatterError;

pub type Result<T> = std::result::Result<T, ScatterError>;

/// Highest numeric DEFLATE level.
pub const MAX_COMPRESSION_LEVEL: u8 = 9;
/// Level used when [`CompressionLevel::Default`] is requested.
pub const DEFAULT_COMPRESSION_LEVEL: u8 = 6;

/// Compression level applied to every deflated entry of a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionLevel {
    /// Codec default, equivalent to the `-1` sentinel.
    #[default]
    Default,
    /// Explicit level in `0..=9`.
    Level(u8),
}

impl CompressionLevel {
    /// Parses a raw level where `-1` selects the codec default.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            -1 => Ok(Self::Default),
            0..=9 => Ok(Self::Level(raw as u8)),
            _ => Err(ScatterError::InvalidConfiguration(format!(
                "compression level {raw} outside -1..=9"
            ))),
        }
    }

    pub fn validate(self) -> Result<()> {
        match self {
            Self::Level(level) if level > MAX_COMPRESSION_LEVEL => {
                Err(ScatterError::InvalidConfiguration(format!(
                    "compression level {level} outside 0..={MAX_COMPRESSION_LEVEL}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Numeric level handed to the codec.
    pub fn effective(self) -> u8 {
        match self {
            Self::Default => DEFAULT_COMPRESSION_LEVEL,
            Self::Level(level) => level.min(MAX_COMPRESSION_LEVEL),
        }
    }
}

/// Storage method recorded for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionMethod {
    Stored,
    #[default]
    Deflated,
}

impl CompressionMethod {
    /// PKZIP method id.
    pub fn zip_id(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflated => 8,
        }
    }
}

/// Identity and attributes of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub name: String,
    pub modified: SystemTime,
    pub method: CompressionMethod,
    /// Unix permission bits stored in the high half of the external attributes.
    pub unix_mode: Option<u32>,
    /// Low 16 bits of the external attributes (MS-DOS attribute byte and friends).
    pub external_attributes: u16,
    pub comment: String,
}

impl EntryMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modified: SystemTime::now(),
            method: CompressionMethod::Deflated,
            unix_mode: None,
            external_attributes: 0,
            comment: String::new(),
        }
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_method(mut self, method: CompressionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_unix_mode(mut self, mode: u32) -> Self {
        self.unix_mode = Some(mode);
        self
    }

    pub fn with_external_attributes(mut self, attributes: u16) -> Self {
        self.external_attributes = attributes;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Full 32-bit external attribute field as written to the central directory.
    pub fn external_attributes_field(&self) -> u32 {
        let high = self.unix_mode.map(|mode| (mode & 0xFFFF) << 16).unwrap_or(0);
        high | u32::from(self.external_attributes)
    }
}

type OpenFn = Box<dyn FnOnce() -> io::Result<Box<dyn Read + Send>> + Send>;

/// One-shot supplier of an entry's content stream.
///
/// The stream is opened on the worker that compresses the entry and is
/// consumed exactly once.
pub struct EntrySource {
    open: OpenFn,
}

impl EntrySource {
    pub fn from_fn<F>(open: F) -> Self
    where
        F: FnOnce() -> io::Result<Box<dyn Read + Send>> + Send + 'static,
    {
        Self {
            open: Box::new(open),
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        Self::from_fn(move || Ok(Box::new(data.reader()) as Box<dyn Read + Send>))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::from_fn(move || Ok(Box::new(reader) as Box<dyn Read + Send>))
    }

    /// Opens the file lazily, on the worker thread.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::from_fn(move || {
            let file = File::open(&path)?;
            Ok(Box::new(BufReader::new(file)) as Box<dyn Read + Send>)
        })
    }

    pub fn open(self) -> io::Result<Box<dyn Read + Send>> {
        (self.open)()
    }
}

impl fmt::Debug for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntrySource").finish_non_exhaustive()
    }
}

/// An entry ready for compression: metadata plus its content supplier.
#[derive(Debug)]
pub struct EntryRequest {
    pub metadata: EntryMetadata,
    pub source: EntrySource,
}

impl EntryRequest {
    pub fn new(metadata: EntryMetadata, source: EntrySource) -> Self {
        Self { metadata, source }
    }

    /// Deflated entry with in-memory content.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(EntryMetadata::new(name), EntrySource::from_bytes(data))
    }
}

type LazyEntry = Box<dyn FnOnce() -> Result<EntryRequest> + Send>;

/// A unit of work handed to the writer.
pub enum Submission {
    /// Entry built by the caller.
    Eager(EntryRequest),
    /// Entry built on the worker that executes it.
    Lazy(LazyEntry),
}

impl Submission {
    pub fn lazy<F>(build: F) -> Self
    where
        F: FnOnce() -> Result<EntryRequest> + Send + 'static,
    {
        Self::Lazy(Box::new(build))
    }

    /// Resolves the submission into its entry request, running the builder for lazy entries.
    pub fn resolve(self) -> Result<EntryRequest> {
        match self {
            Self::Eager(request) => Ok(request),
            Self::Lazy(build) => build(),
        }
    }
}

impl From<EntryRequest> for Submission {
    fn from(request: EntryRequest) -> Self {
        Self::Eager(request)
    }
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager(request) => f.debug_tuple("Eager").field(request).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

/// CRC and sizes of one entry after it has been written to a backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryDigest {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

/// Converts a duration to whole microseconds, clamped to `u64::MAX`.
#[inline]
pub fn duration_to_us(duration: std::time::Duration) -> u64 {
    duration.as_micros().min(u64::MAX as u128) as u64
}
