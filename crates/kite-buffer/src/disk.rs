//! Disk manager for a single index file.

use kite_common::page::{PageNum, PAGE_SIZE};
use kite_common::{KiteError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Manages page-granular I/O for one index file.
///
/// Pages are addressed by page number; page N lives at byte offset
/// `N * PAGE_SIZE`. Allocation only ever grows the file; freed pages are
/// not reused.
pub struct DiskManager {
    /// Path to the backing file.
    path: PathBuf,
    /// The open file handle, serialized behind a mutex.
    file: Mutex<File>,
    /// Next page number to hand out.
    next_page_num: AtomicU32,
}

impl DiskManager {
    /// Creates a new index file. Fails if the file already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            next_page_num: AtomicU32::new(0),
        })
    }

    /// Opens an existing index file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let len = file.metadata()?.len() as usize;
        if len % PAGE_SIZE != 0 {
            return Err(KiteError::InvalidState(format!(
                "index file {} is not page aligned ({} bytes)",
                path.display(),
                len
            )));
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
            next_page_num: AtomicU32::new((len / PAGE_SIZE) as u32),
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> u32 {
        self.next_page_num.load(Ordering::Acquire)
    }

    /// Allocates a new zeroed page at the end of the file and returns its
    /// page number.
    pub fn allocate_page(&self) -> Result<PageNum> {
        let mut file = self.file.lock();
        let page_num = self.next_page_num.fetch_add(1, Ordering::AcqRel);

        let zeroes = [0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        file.write_all(&zeroes)?;

        Ok(page_num)
    }

    /// Reads a page into the provided buffer.
    pub fn read_page(&self, page_num: PageNum, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if page_num >= self.num_pages() {
            return Err(KiteError::PageNotFound { page_num });
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Writes a page from the provided buffer.
    pub fn write_page(&self, page_num: PageNum, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        if page_num >= self.num_pages() {
            return Err(KiteError::PageNotFound { page_num });
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Syncs file contents to stable storage.
    pub fn flush(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        // Best effort; errors on close are unreportable.
        let _ = self.file.lock().sync_all();
    }
}
