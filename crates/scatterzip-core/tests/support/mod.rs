#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use flate2::read::DeflateDecoder;
use scatterzip_core::format::zip::{CentralDirectoryHeader, EndOfCentralDirectory, LocalFileHeader};
use scatterzip_core::{BackingStore, BackingStoreFactory, EntryMetadata, EntryRequest, EntrySource, MemoryStore};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// One entry read back from a finished archive.
#[derive(Debug)]
pub struct ArchivedEntry {
    pub name: String,
    pub method: u16,
    pub external_attributes: u32,
    pub data: Vec<u8>,
}

/// Parses a finished archive through its central directory and inflates every entry.
pub fn read_archive(bytes: &[u8]) -> Result<Vec<ArchivedEntry>, Box<dyn std::error::Error>> {
    let trailer = EndOfCentralDirectory::locate(bytes)?;
    let mut cursor = trailer.directory_offset as usize;
    let mut entries = Vec::with_capacity(trailer.entries as usize);

    for _ in 0..trailer.entries {
        let (central, consumed) = CentralDirectoryHeader::parse(&bytes[cursor..])?;
        cursor += consumed;

        let start = central.local_header_offset as usize;
        let (local, header_len) = LocalFileHeader::parse(&bytes[start..])?;
        assert_eq!(local.name, central.name);
        assert_eq!(local.crc32, central.crc32);

        let payload_start = start + header_len;
        let payload = &bytes[payload_start..payload_start + central.compressed_size as usize];
        let data = match central.method {
            0 => payload.to_vec(),
            8 => {
                let mut inflated = Vec::with_capacity(central.uncompressed_size as usize);
                DeflateDecoder::new(payload).read_to_end(&mut inflated)?;
                inflated
            }
            other => return Err(format!("unexpected method {other}").into()),
        };
        assert_eq!(data.len(), central.uncompressed_size as usize);
        assert_eq!(crc32fast::hash(&data), central.crc32);

        entries.push(ArchivedEntry {
            name: central.name,
            method: central.method,
            external_attributes: central.external_attributes,
            data,
        });
    }

    Ok(entries)
}

pub fn names(entries: &[ArchivedEntry]) -> Vec<&str> {
    entries.iter().map(|entry| entry.name.as_str()).collect()
}

/// Deterministic, mildly compressible payload.
pub fn payload(seed: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|index| b"scatter-gather "[(index + seed) % 15] ^ ((index / 64) as u8))
        .collect()
}

/// Memory-backed factory that remembers whether every store it made was released.
#[derive(Clone, Default)]
pub struct TrackingFactory {
    released: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    write_limit: Option<u64>,
}

impl TrackingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores reject writes once they would hold more than `limit` bytes.
    pub fn with_write_limit(limit: u64) -> Self {
        Self {
            write_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn created(&self) -> usize {
        self.released.lock().expect("tracking lock poisoned").len()
    }

    pub fn all_released(&self) -> bool {
        self.released
            .lock()
            .expect("tracking lock poisoned")
            .iter()
            .all(|flag| flag.load(Ordering::Acquire))
    }

    /// Polls until every store has been released or `timeout` passes.
    pub fn wait_all_released(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if self.all_released() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.all_released()
    }
}

impl BackingStoreFactory for TrackingFactory {
    fn create(&self) -> io::Result<Box<dyn BackingStore>> {
        let flag = Arc::new(AtomicBool::new(false));
        self.released
            .lock()
            .expect("tracking lock poisoned")
            .push(Arc::clone(&flag));
        Ok(Box::new(TrackedStore {
            inner: MemoryStore::new(),
            released: flag,
            write_limit: self.write_limit,
        }))
    }
}

struct TrackedStore {
    inner: MemoryStore,
    released: Arc<AtomicBool>,
    write_limit: Option<u64>,
}

impl Write for TrackedStore {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(limit) = self.write_limit
            && self.inner.len() + buf.len() as u64 > limit
        {
            return Err(io::Error::other("backing store full"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl BackingStore for TrackedStore {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        self.inner.reader()
    }

    fn release(&mut self) -> io::Result<()> {
        self.inner.release()?;
        self.released.store(true, Ordering::Release);
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.inner.is_released()
    }
}

/// Reader that fails after yielding a few bytes.
pub struct FailingReader {
    remaining: usize,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::other("disk went away"));
        }
        let len = buf.len().min(self.remaining);
        buf[..len].fill(b'x');
        self.remaining -= len;
        Ok(len)
    }
}

pub fn failing_entry(name: &str) -> EntryRequest {
    EntryRequest::new(
        EntryMetadata::new(name),
        EntrySource::from_fn(|| Ok(Box::new(FailingReader { remaining: 16 }) as Box<dyn Read + Send>)),
    )
}

/// Reader that sleeps before yielding its content.
pub struct SlowReader {
    delay: Option<Duration>,
    data: io::Cursor<Vec<u8>>,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(delay) = self.delay.take() {
            thread::sleep(delay);
        }
        self.data.read(buf)
    }
}

pub fn slow_entry(name: &str, delay: Duration, data: Vec<u8>) -> EntryRequest {
    EntryRequest::new(
        EntryMetadata::new(name),
        EntrySource::from_reader(SlowReader {
            delay: Some(delay),
            data: io::Cursor::new(data),
        }),
    )
}

/// Archive destination that fails once `capacity` bytes have been accepted.
pub struct ShortWriter {
    pub written: Vec<u8>,
    capacity: usize,
}

impl ShortWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            written: Vec::new(),
            capacity,
        }
    }
}

impl Write for ShortWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.capacity - self.written.len();
        if room == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "destination full"));
        }
        let accepted = room.min(buf.len());
        self.written.extend_from_slice(&buf[..accepted]);
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
