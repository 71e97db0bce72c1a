use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};

use super::{BackingStore, BackingStoreFactory, released_error, sealed_error};

/// Prefix for every temporary file created by [`TempFileStoreFactory`].
pub const TEMP_FILE_PREFIX: &str = "scatter";
const TEMP_FILE_SUFFIX: &str = ".tmp";
const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Temporary file store. The file is deleted on [`release`](BackingStore::release)
/// or, failing that, when the store is dropped.
#[derive(Debug)]
pub struct TempFileStore {
    writer: Option<BufWriter<NamedTempFile>>,
    path: PathBuf,
    written: u64,
    sealed: bool,
}

impl TempFileStore {
    pub fn create_in(dir: &Path, buffer_capacity: usize) -> io::Result<Self> {
        let file = Builder::new()
            .prefix(TEMP_FILE_PREFIX)
            .suffix(TEMP_FILE_SUFFIX)
            .tempfile_in(dir)?;
        let path = file.path().to_path_buf();
        Ok(Self {
            writer: Some(BufWriter::with_capacity(buffer_capacity.max(1), file)),
            path,
            written: 0,
            sealed: false,
        })
    }

    /// Location of the temporary file while the store is alive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer_mut(&mut self) -> io::Result<&mut BufWriter<NamedTempFile>> {
        if self.sealed {
            return Err(sealed_error());
        }
        self.writer.as_mut().ok_or_else(released_error)
    }
}

impl Write for TempFileStore {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.writer_mut()?.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer_mut()?.flush()
    }
}

impl BackingStore for TempFileStore {
    fn len(&self) -> u64 {
        self.written
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        let writer = self.writer_mut()?;
        writer.flush()?;
        let file: File = writer.get_ref().reopen()?;
        self.sealed = true;
        Ok(Box::new(BufReader::new(file)))
    }

    fn release(&mut self) -> io::Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        // Unflushed bytes are discarded with the file.
        let (file, _) = writer.into_parts();
        file.close()
    }

    fn is_released(&self) -> bool {
        self.writer.is_none()
    }
}

/// Creates one [`TempFileStore`] per worker buffer.
#[derive(Debug, Clone)]
pub struct TempFileStoreFactory {
    dir: Option<PathBuf>,
    buffer_capacity: usize,
}

impl Default for TempFileStoreFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TempFileStoreFactory {
    /// Temporary files go to the system temp directory.
    pub fn new() -> Self {
        Self {
            dir: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl BackingStoreFactory for TempFileStoreFactory {
    fn create(&self) -> io::Result<Box<dyn BackingStore>> {
        let store = TempFileStore::create_in(&self.dir(), self.buffer_capacity)?;
        Ok(Box::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spills_to_disk_and_removes_file_on_release() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut store = TempFileStore::create_in(dir.path(), 16)?;
        let payload = vec![7u8; 1000];
        store.write_all(&payload)?;
        assert_eq!(store.len(), 1000);
        assert!(store.path().exists());

        let mut out = Vec::new();
        store.reader()?.read_to_end(&mut out)?;
        assert_eq!(out, payload);

        let path = store.path().to_path_buf();
        store.release()?;
        store.release()?;
        assert!(store.is_released());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn factory_places_files_in_configured_dir() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let factory = TempFileStoreFactory::in_dir(dir.path());
        let mut first = factory.create()?;
        let mut second = factory.create()?;
        first.write_all(b"a")?;
        second.write_all(b"b")?;
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 2);

        first.release()?;
        second.release()?;
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }
}
