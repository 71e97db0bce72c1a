use std::io::{self, Read, Take};
use std::sync::Arc;

use super::BufferRegistry;
use crate::compression::{self, CodecError};
use crate::error::ScatterError;
use crate::store::BackingStore;
use crate::types::{CompressionLevel, EntryDigest, EntryMetadata, EntryRequest, Result};

/// One entry held by a [`ScatterBuffer`].
#[derive(Debug, Clone)]
pub struct ScatterRecord {
    /// Position of the producing submission in the global order.
    pub sequence: usize,
    pub metadata: EntryMetadata,
    pub digest: EntryDigest,
    /// Byte offset of the compressed payload inside the backing store.
    pub offset: u64,
}

/// A drained entry: metadata plus a reader over exactly its compressed bytes.
pub struct CompressedEntry<'a> {
    pub sequence: usize,
    pub metadata: &'a EntryMetadata,
    pub digest: EntryDigest,
    pub payload: Take<&'a mut dyn Read>,
}

impl<'a> CompressedEntry<'a> {
    pub fn new(
        sequence: usize,
        metadata: &'a EntryMetadata,
        digest: EntryDigest,
        payload: &'a mut dyn Read,
    ) -> Self {
        Self {
            sequence,
            metadata,
            digest,
            payload: payload.take(digest.compressed_size),
        }
    }
}

/// Per-worker buffer of compressed entries.
///
/// Appends happen only on the owning worker; drains happen later on the
/// gather stage, in append order. Ownership is the only synchronisation.
/// Dropping an unclosed buffer releases its backing store.
pub struct ScatterBuffer {
    id: usize,
    level: CompressionLevel,
    store: Box<dyn BackingStore>,
    records: Vec<ScatterRecord>,
    drained: usize,
    reader: Option<PositionedReader>,
    registry: Arc<BufferRegistry>,
    closed: bool,
}

impl ScatterBuffer {
    pub fn new(
        id: usize,
        level: CompressionLevel,
        store: Box<dyn BackingStore>,
        registry: Arc<BufferRegistry>,
    ) -> Self {
        registry.on_created();
        Self {
            id,
            level,
            store,
            records: Vec::new(),
            drained: 0,
            reader: None,
            registry,
            closed: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Compresses `request` into the backing store and returns its append position.
    ///
    /// The record is only added once the entry is fully written, so a failed
    /// append leaves the index unchanged.
    pub fn append(&mut self, sequence: usize, request: EntryRequest) -> Result<usize> {
        if self.closed || self.reader.is_some() {
            return Err(ScatterError::BackingStore(io::Error::other(
                "scatter buffer no longer accepts entries",
            )));
        }

        let EntryRequest { metadata, source } = request;
        let offset = self.store.len();
        let mut content = source
            .open()
            .map_err(|source| ScatterError::EntryRead {
                sequence,
                name: metadata.name.clone(),
                source,
            })?;

        let digest =
            compression::compress_entry(self.level, metadata.method, &mut *content, &mut self.store)
                .map_err(|error| match error {
                    CodecError::Read(source) => ScatterError::EntryRead {
                        sequence,
                        name: metadata.name.clone(),
                        source,
                    },
                    CodecError::Codec(source) => ScatterError::Compression {
                        sequence,
                        name: metadata.name.clone(),
                        source,
                    },
                    CodecError::Write(source) => ScatterError::BackingStore(source)
                        .with_context(format!("entry #{sequence} ({})", metadata.name)),
                })?;

        self.records.push(ScatterRecord {
            sequence,
            metadata,
            digest,
            offset,
        });
        Ok(self.records.len() - 1)
    }

    /// Returns the next undrained entry, in append order.
    ///
    /// Bytes of a previously drained payload that the caller did not read
    /// are skipped.
    pub fn drain_next(&mut self) -> Result<CompressedEntry<'_>> {
        let record = self
            .records
            .get(self.drained)
            .ok_or(ScatterError::ExhaustedBuffer {
                buffer: self.id,
                drained: self.drained,
            })?;

        if self.reader.is_none() {
            if self.closed {
                return Err(ScatterError::BackingStore(io::Error::other(
                    "scatter buffer already closed",
                )));
            }
            let inner = self
                .store
                .reader()
                .map_err(ScatterError::BackingStore)?;
            self.reader = Some(PositionedReader::new(inner));
        }
        let Some(reader) = self.reader.as_mut() else {
            return Err(ScatterError::ExhaustedBuffer {
                buffer: self.id,
                drained: self.drained,
            });
        };
        reader
            .skip_to(record.offset)
            .map_err(ScatterError::BackingStore)?;

        self.drained += 1;
        Ok(CompressedEntry::new(
            record.sequence,
            &record.metadata,
            record.digest,
            reader,
        ))
    }

    /// Releases the backing store. Safe to call repeatedly and with undrained entries.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.reader = None;
        let result = self.store.release().map_err(ScatterError::BackingStore);
        self.registry.on_released();
        result
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn drained(&self) -> usize {
        self.drained
    }

    pub fn remaining(&self) -> usize {
        self.records.len() - self.drained
    }

    pub fn records(&self) -> &[ScatterRecord] {
        &self.records
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_released(&self) -> bool {
        self.store.is_released()
    }
}

impl Drop for ScatterBuffer {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(buffer = self.id, %error, "failed to release scatter buffer");
        }
    }
}

impl std::fmt::Debug for ScatterBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScatterBuffer")
            .field("id", &self.id)
            .field("entries", &self.records.len())
            .field("drained", &self.drained)
            .field("store_len", &self.store.len())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Sequential reader that knows how far into the store it is.
struct PositionedReader {
    inner: Box<dyn Read + Send>,
    position: u64,
}

impl PositionedReader {
    fn new(inner: Box<dyn Read + Send>) -> Self {
        Self { inner, position: 0 }
    }

    fn skip_to(&mut self, offset: u64) -> io::Result<()> {
        if offset < self.position {
            return Err(io::Error::other("scatter buffer read position moved backwards"));
        }
        let gap = offset - self.position;
        if gap > 0 {
            let skipped = io::copy(&mut self.by_ref().take(gap), &mut io::sink())?;
            if skipped != gap {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "backing store shorter than its index",
                ));
            }
        }
        Ok(())
    }
}

impl Read for PositionedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.position += read as u64;
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::DeflateDecoder;

    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{CompressionMethod, EntrySource};

    fn buffer() -> (ScatterBuffer, Arc<BufferRegistry>) {
        let registry = Arc::new(BufferRegistry::new());
        let buffer = ScatterBuffer::new(
            0,
            CompressionLevel::Default,
            Box::new(MemoryStore::new()),
            Arc::clone(&registry),
        );
        (buffer, registry)
    }

    #[test]
    fn drains_in_append_order_and_then_exhausts() -> Result<()> {
        let (mut buffer, _registry) = buffer();
        assert_eq!(buffer.append(3, EntryRequest::from_bytes("a", "alpha"))?, 0);
        assert_eq!(buffer.append(5, EntryRequest::from_bytes("b", "beta"))?, 1);

        for (expected_seq, expected_body) in [(3usize, "alpha"), (5, "beta")] {
            let mut entry = buffer.drain_next()?;
            assert_eq!(entry.sequence, expected_seq);
            let mut body = String::new();
            DeflateDecoder::new(&mut entry.payload).read_to_string(&mut body)?;
            assert_eq!(body, expected_body);
        }

        assert!(matches!(
            buffer.drain_next(),
            Err(ScatterError::ExhaustedBuffer {
                buffer: 0,
                drained: 2
            })
        ));
        Ok(())
    }

    #[test]
    fn skips_unread_payload_bytes() -> Result<()> {
        let (mut buffer, _registry) = buffer();
        let stored = EntryMetadata::new("raw").with_method(CompressionMethod::Stored);
        buffer.append(0, EntryRequest::new(stored.clone(), EntrySource::from_bytes("0123456789")))?;
        buffer.append(1, EntryRequest::new(stored, EntrySource::from_bytes("abc")))?;

        {
            let mut first = buffer.drain_next()?;
            let mut partial = [0u8; 4];
            first.payload.read_exact(&mut partial)?;
            assert_eq!(&partial, b"0123");
        }
        let mut second = buffer.drain_next()?;
        let mut rest = Vec::new();
        second.payload.read_to_end(&mut rest)?;
        assert_eq!(rest, b"abc");
        Ok(())
    }

    #[test]
    fn failed_append_leaves_index_untouched() -> Result<()> {
        let (mut buffer, _registry) = buffer();
        let failing = EntrySource::from_fn(|| Err(io::Error::other("no such cell data")));
        let error = buffer
            .append(0, EntryRequest::new(EntryMetadata::new("bad"), failing))
            .err();
        assert!(matches!(error, Some(ScatterError::EntryRead { sequence: 0, .. })));
        assert!(buffer.is_empty());

        buffer.append(1, EntryRequest::from_bytes("good", "ok"))?;
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.drain_next()?.sequence, 1);
        Ok(())
    }

    #[test]
    fn close_is_idempotent_and_counted_once() -> Result<()> {
        let (mut buffer, registry) = buffer();
        buffer.append(0, EntryRequest::from_bytes("a", "x"))?;
        buffer.close()?;
        buffer.close()?;
        assert!(buffer.is_released());
        assert_eq!(registry.created(), 1);
        assert_eq!(registry.released(), 1);

        drop(buffer);
        assert_eq!(registry.released(), 1);
        Ok(())
    }

    #[test]
    fn drop_releases_unclosed_buffer() {
        let (buffer, registry) = buffer();
        drop(buffer);
        assert_eq!(registry.outstanding(), 0);
    }
}
