use std::io::{self, Read, Write};

use bytes::{Buf, Bytes};

use super::{BackingStore, BackingStoreFactory, released_error, sealed_error};

/// Heap-backed store; suited to archives that comfortably fit in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Vec<u8>,
    written: u64,
    sealed: bool,
    released: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }
}

impl Write for MemoryStore {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.released {
            return Err(released_error());
        }
        if self.sealed {
            return Err(sealed_error());
        }
        self.data.extend_from_slice(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BackingStore for MemoryStore {
    fn len(&self) -> u64 {
        self.written
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        if self.released {
            return Err(released_error());
        }
        if self.sealed {
            return Err(sealed_error());
        }
        self.sealed = true;
        let data = Bytes::from(std::mem::take(&mut self.data));
        Ok(Box::new(data.reader()))
    }

    fn release(&mut self) -> io::Result<()> {
        self.data = Vec::new();
        self.released = true;
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

/// Creates one [`MemoryStore`] per worker buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStoreFactory {
    initial_capacity: usize,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_capacity(initial_capacity: usize) -> Self {
        Self { initial_capacity }
    }
}

impl BackingStoreFactory for MemoryStoreFactory {
    fn create(&self) -> io::Result<Box<dyn BackingStore>> {
        Ok(Box::new(MemoryStore::with_capacity(self.initial_capacity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_back_appended_bytes() -> io::Result<()> {
        let mut store = MemoryStore::new();
        store.write_all(b"hello ")?;
        store.write_all(b"world")?;
        assert_eq!(store.len(), 11);

        let mut out = Vec::new();
        store.reader()?.read_to_end(&mut out)?;
        assert_eq!(out, b"hello world");
        assert!(store.write_all(b"late").is_err());
        Ok(())
    }

    #[test]
    fn release_is_idempotent() -> io::Result<()> {
        let mut store = MemoryStore::new();
        store.write_all(b"abc")?;
        store.release()?;
        store.release()?;
        assert!(store.is_released());
        assert!(store.reader().is_err());
        Ok(())
    }
}
