use std::io::{self, ErrorKind, Read, Write};

use crc32fast::Hasher;
use flate2::Compression;
use flate2::write::DeflateEncoder;

use super::READ_CHUNK_SIZE;
use crate::types::EntryDigest;

/// Where a codec run failed.
#[derive(Debug)]
pub enum CodecError {
    /// The entry's content stream failed.
    Read(io::Error),
    /// The destination store failed.
    Write(io::Error),
    /// The encoder itself failed.
    Codec(io::Error),
}

/// Raw DEFLATE (no zlib framing) of `source` into `sink`.
pub fn apply<W: Write>(
    level: u8,
    source: &mut dyn Read,
    sink: &mut W,
) -> Result<EntryDigest, CodecError> {
    let tracked = TrackedSink::new(sink);
    let mut encoder = DeflateEncoder::new(tracked, Compression::new(u32::from(level)));
    let mut hasher = Hasher::new();
    let mut uncompressed_size = 0u64;
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let read = read_chunk(source, &mut chunk)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
        uncompressed_size += read as u64;
        if let Err(error) = encoder.write_all(&chunk[..read]) {
            return Err(encoder.get_ref().classify(error));
        }
    }

    if let Err(error) = encoder.try_finish() {
        return Err(encoder.get_ref().classify(error));
    }
    let tracked = encoder.finish().map_err(CodecError::Codec)?;

    Ok(EntryDigest {
        crc32: hasher.finalize(),
        compressed_size: tracked.written,
        uncompressed_size,
    })
}

/// Copies `source` into `sink` unchanged, computing the same digest.
pub fn store<W: Write>(source: &mut dyn Read, sink: &mut W) -> Result<EntryDigest, CodecError> {
    let mut hasher = Hasher::new();
    let mut size = 0u64;
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let read = read_chunk(source, &mut chunk)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
        sink.write_all(&chunk[..read]).map_err(CodecError::Write)?;
        size += read as u64;
    }

    Ok(EntryDigest {
        crc32: hasher.finalize(),
        compressed_size: size,
        uncompressed_size: size,
    })
}

fn read_chunk(source: &mut dyn Read, chunk: &mut [u8]) -> Result<usize, CodecError> {
    loop {
        match source.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(CodecError::Read(error)),
        }
    }
}

/// Counts bytes reaching the store and remembers whether the store failed,
/// so encoder errors can be told apart from I/O errors underneath it.
struct TrackedSink<W> {
    inner: W,
    written: u64,
    failed: bool,
}

impl<W: Write> TrackedSink<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            written: 0,
            failed: false,
        }
    }

    fn classify(&self, error: io::Error) -> CodecError {
        if self.failed {
            CodecError::Write(error)
        } else {
            CodecError::Codec(error)
        }
    }
}

impl<W: Write> Write for TrackedSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            Ok(written) => {
                self.written += written as u64;
                Ok(written)
            }
            Err(error) => {
                if error.kind() != ErrorKind::Interrupted {
                    self.failed = true;
                }
                Err(error)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().inspect_err(|_| self.failed = true)
    }
}
