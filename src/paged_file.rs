use crate::error::StorageError;
use crate::id::PageNum;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const PAGE_SIZE: usize = 4096;

/// Creates an empty paged file. Fails if the file already exists.
pub fn create_file(path: &Path) -> anyhow::Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => {
            log::debug!("created paged file path={path:?}");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Err(StorageError::FileExists(path.to_path_buf()).into())
        }
        Err(err) => Err(err.into()),
    }
}

pub fn destroy_file(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            log::debug!("destroyed paged file path={path:?}");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(StorageError::FileNotFound(path.to_path_buf()).into())
        }
        Err(err) => Err(err.into()),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub reads: u64,
    pub writes: u64,
    pub appends: u64,
}

/// A handle to one paged file.
///
/// Clones share the same binding and counters, so a scan can keep reading
/// through the handle while the owner keeps mutating the file. Every call
/// goes straight to the OS; nothing is cached.
#[derive(Clone, Default, Debug)]
pub struct FileHandle {
    inner: Arc<HandleInner>,
}

#[derive(Default, Debug)]
struct HandleInner {
    file: Mutex<Option<BoundFile>>,
    reads: AtomicU64,
    writes: AtomicU64,
    appends: AtomicU64,
}

#[derive(Debug)]
struct BoundFile {
    f: File,
    path: PathBuf,
}

impl FileHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let handle = Self::new();
        handle.open_file(path)?;
        Ok(handle)
    }

    /// Binds this handle to `path`. A bound handle is never silently rebound.
    pub fn open_file(&self, path: &Path) -> anyhow::Result<()> {
        let mut file = self.inner.file.lock();
        if let Some(bound) = file.as_ref() {
            return Err(StorageError::HandleInUse(bound.path.clone()).into());
        }

        let f = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::FileNotFound(path.to_path_buf()).into());
            }
            Err(err) => return Err(err.into()),
        };
        *file = Some(BoundFile {
            f,
            path: path.to_path_buf(),
        });
        log::debug!("opened paged file path={path:?}");
        Ok(())
    }

    pub fn close(&self) -> anyhow::Result<()> {
        let Some(bound) = self.inner.file.lock().take() else {
            return Err(StorageError::HandleNotOpen.into());
        };
        bound.f.sync_all()?;
        log::debug!("closed paged file path={:?}", bound.path);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.file.lock().is_some()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.inner.file.lock().as_ref().map(|bound| bound.path.clone())
    }

    pub fn read_page(&self, page: PageNum, buff: &mut [u8; PAGE_SIZE]) -> anyhow::Result<()> {
        let mut file = self.inner.file.lock();
        let bound = file.as_mut().ok_or(StorageError::HandleNotOpen)?;
        let count = page_count(&bound.f)?;
        if page >= count {
            return Err(StorageError::PageOutOfRange { page, count }.into());
        }

        bound.f.seek(SeekFrom::Start(page_offset(page)))?;
        bound.f.read_exact(buff)?;
        self.inner.reads.fetch_add(1, Ordering::Relaxed);
        log::trace!("read page path={:?} page={page}", bound.path);
        Ok(())
    }

    /// Overwrites an existing page. Files only grow through [`FileHandle::append_page`].
    pub fn write_page(&self, page: PageNum, buff: &[u8; PAGE_SIZE]) -> anyhow::Result<()> {
        let mut file = self.inner.file.lock();
        let bound = file.as_mut().ok_or(StorageError::HandleNotOpen)?;
        let count = page_count(&bound.f)?;
        if page >= count {
            return Err(StorageError::PageOutOfRange { page, count }.into());
        }

        bound.f.seek(SeekFrom::Start(page_offset(page)))?;
        bound.f.write_all(buff)?;
        self.inner.writes.fetch_add(1, Ordering::Relaxed);
        log::trace!("write page path={:?} page={page}", bound.path);
        Ok(())
    }

    /// Writes `buff` as a new last page and returns its page number.
    pub fn append_page(&self, buff: &[u8; PAGE_SIZE]) -> anyhow::Result<PageNum> {
        let mut file = self.inner.file.lock();
        let bound = file.as_mut().ok_or(StorageError::HandleNotOpen)?;
        let page = page_count(&bound.f)?;

        bound.f.seek(SeekFrom::Start(page_offset(page)))?;
        bound.f.write_all(buff)?;
        self.inner.appends.fetch_add(1, Ordering::Relaxed);
        log::trace!("append page path={:?} page={page}", bound.path);
        Ok(page)
    }

    pub fn page_count(&self) -> anyhow::Result<PageNum> {
        let file = self.inner.file.lock();
        let bound = file.as_ref().ok_or(StorageError::HandleNotOpen)?;
        page_count(&bound.f)
    }

    /// Returns the read, write and append counters without resetting them.
    pub fn collect_counter_values(&self) -> Counters {
        Counters {
            reads: self.inner.reads.load(Ordering::Relaxed),
            writes: self.inner.writes.load(Ordering::Relaxed),
            appends: self.inner.appends.load(Ordering::Relaxed),
        }
    }
}

fn page_count(f: &File) -> anyhow::Result<PageNum> {
    let size = f.metadata()?.len();
    Ok(PageNum::try_from(size.div_ceil(PAGE_SIZE as u64))?)
}

fn page_offset(page: PageNum) -> u64 {
    page as u64 * PAGE_SIZE as u64
}
