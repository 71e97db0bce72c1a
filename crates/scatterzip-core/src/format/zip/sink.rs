use std::io::{self, Write};
use std::time::Instant;

use crate::error::ScatterError;
use crate::scatter::CompressedEntry;
use crate::telemetry::{self, tags};
use crate::types::Result;

use super::consts::{FLAG_UTF8, HOST_UNIX, MAX_ENTRIES, MAX_FIELD_LEN, MAX_OFFSET, VERSION_NEEDED};
use super::dostime::DosDateTime;
use super::headers::{CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader};

/// Serial consumer of already-compressed entries.
///
/// Entries arrive in final archive order through [`append_raw`](Self::append_raw);
/// [`finish`](Self::finish) writes the closing structure and is called once.
pub trait FinalSink {
    fn append_raw(&mut self, entry: CompressedEntry<'_>) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

/// Writes a classic (non-ZIP64) PKZIP archive from pre-compressed entries.
///
/// Sizes and CRCs are known before each payload is copied, so local headers
/// carry them directly and no data descriptors are emitted.
#[derive(Debug)]
pub struct ZipArchiveSink<W: Write> {
    writer: CountingWriter<W>,
    directory: Vec<CentralDirectoryHeader>,
    finished: bool,
}

impl<W: Write> ZipArchiveSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: CountingWriter::new(writer),
            directory: Vec::new(),
            finished: false,
        }
    }

    /// Number of entries appended so far.
    pub fn entries(&self) -> usize {
        self.directory.len()
    }

    /// Names in the order they were appended.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.directory.iter().map(|header| header.name.as_str())
    }

    /// Bytes written to the underlying writer.
    pub fn bytes_written(&self) -> u64 {
        self.writer.written
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn get_ref(&self) -> &W {
        &self.writer.inner
    }

    pub fn into_inner(self) -> W {
        self.writer.inner
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(ScatterError::InvalidFormat("zip archive already finished"));
        }
        Ok(())
    }
}

impl<W: Write> FinalSink for ZipArchiveSink<W> {
    fn append_raw(&mut self, entry: CompressedEntry<'_>) -> Result<()> {
        self.ensure_open()?;
        let start = Instant::now();
        let CompressedEntry {
            metadata,
            digest,
            mut payload,
            ..
        } = entry;

        if self.directory.len() >= MAX_ENTRIES {
            return Err(ScatterError::ArchiveLimit("more than 65535 entries"));
        }
        if metadata.name.len() > MAX_FIELD_LEN || metadata.comment.len() > MAX_FIELD_LEN {
            return Err(ScatterError::ArchiveLimit("entry name or comment too long"));
        }
        let offset = narrow(self.writer.written, "archive offset beyond 4 GiB")?;
        let compressed_size = narrow(digest.compressed_size, "entry larger than 4 GiB")?;
        let uncompressed_size = narrow(digest.uncompressed_size, "entry larger than 4 GiB")?;

        let flags = if metadata.name.is_ascii() && metadata.comment.is_ascii() {
            0
        } else {
            FLAG_UTF8
        };
        let modified = DosDateTime::from_system_time(metadata.modified);
        let method = metadata.method.zip_id();

        let local = LocalFileHeader {
            flags,
            method,
            modified,
            crc32: digest.crc32,
            compressed_size,
            uncompressed_size,
            name: metadata.name.clone(),
        };
        self.writer
            .write_all(&local.to_bytes())
            .map_err(ScatterError::Sink)?;

        let copied = io::copy(&mut payload, &mut self.writer).map_err(ScatterError::Sink)?;
        if copied != digest.compressed_size {
            return Err(ScatterError::Sink(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "entry {} yielded {copied} of {} compressed bytes",
                    metadata.name, digest.compressed_size
                ),
            )));
        }

        let version_made_by = if metadata.unix_mode.is_some() {
            (HOST_UNIX << 8) | VERSION_NEEDED
        } else {
            VERSION_NEEDED
        };
        self.directory.push(CentralDirectoryHeader {
            version_made_by,
            flags,
            method,
            modified,
            crc32: digest.crc32,
            compressed_size,
            uncompressed_size,
            external_attributes: metadata.external_attributes_field(),
            local_header_offset: offset,
            name: metadata.name.clone(),
            comment: metadata.comment.clone(),
        });

        telemetry::increment_counter(tags::METRIC_GATHER_ENTRY_COUNT, 1);
        telemetry::record_latency(tags::METRIC_GATHER_LATENCY_US, start.elapsed());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.ensure_open()?;

        let directory_start = self.writer.written;
        for header in &self.directory {
            self.writer
                .write_all(&header.to_bytes())
                .map_err(ScatterError::Sink)?;
        }
        let directory_size = self.writer.written - directory_start;

        let trailer = EndOfCentralDirectory {
            entries: self.directory.len() as u16,
            directory_size: narrow(directory_size, "central directory beyond 4 GiB")?,
            directory_offset: narrow(directory_start, "central directory beyond 4 GiB")?,
        };
        self.writer
            .write_all(&trailer.to_bytes())
            .map_err(ScatterError::Sink)?;
        self.writer.flush().map_err(ScatterError::Sink)?;
        self.finished = true;
        Ok(())
    }
}

fn narrow(value: u64, limit: &'static str) -> Result<u32> {
    if value > MAX_OFFSET {
        return Err(ScatterError::ArchiveLimit(limit));
    }
    Ok(value as u32)
}

#[derive(Debug)]
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
