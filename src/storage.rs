//! Page store: the fixed-size page allocation/fetch boundary the index core
//! runs against.
//!
//! The core never does I/O directly; it allocates and fetches pages through
//! [`PageStore`] and touches each page under that page's own `RwLock`, held
//! only for the duration of the touch. [`MemoryPageStore`] backs tests and
//! ephemeral indexes; [`FilePageStore`] keeps a single file of checksummed
//! 8 KiB page images with durability at explicit flush points.

use crate::encoding::{crc32, read_exact_u32};
use crate::error::BitmapError;
use crate::pages::{Page, PAGE_SIZE};
use crate::types::PageId;

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

const STORE_MAGIC: &[u8; 8] = b"HRLXPG01";
const STORE_VERSION: u32 = 1;
const STORE_HEADER_LEN: u64 = 16; // magic + version + reserved

/// Per-page on-disk frame: crc32 over the image, then the image itself.
const FRAME_LEN: u64 = 4 + PAGE_SIZE as u64;

/// A reference-counted handle to one page. Scan positions hold clones of
/// these; dropping the last clone releases the reference.
pub type PageHandle = Arc<RwLock<Page>>;

/// Allocation, fetch and durability boundary for fixed-size pages.
pub trait PageStore: Send + Sync + std::fmt::Debug {
    /// Allocates the next page number and installs `page` there. The first
    /// allocation of a fresh store is always page 0.
    fn alloc(&self, page: Page) -> Result<PageId, BitmapError>;

    /// Fetches a handle to a page. Callers lock the handle read or write
    /// for the single page touch only.
    fn get(&self, id: PageId) -> Result<PageHandle, BitmapError>;

    /// Records that a page was modified and must be written at the next
    /// flush point.
    fn mark_dirty(&self, id: PageId);

    /// Makes all dirty pages durable. No partial index state is durable
    /// before this returns.
    fn flush(&self) -> Result<(), BitmapError>;

    /// Number of allocated pages. Zero means the index is empty/unbuilt.
    fn page_count(&self) -> u64;

    /// Discards every page (vacuum-as-rebuild starts from here).
    fn reset(&self) -> Result<(), BitmapError>;
}

/// Volatile page store; flush and dirty tracking are no-ops.
#[derive(Debug, Default)]
pub struct MemoryPageStore {
    pages: RwLock<Vec<PageHandle>>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemoryPageStore {
    fn alloc(&self, page: Page) -> Result<PageId, BitmapError> {
        let mut pages = self.pages.write()?;
        let id = pages.len() as PageId;
        pages.push(Arc::new(RwLock::new(page)));
        Ok(id)
    }

    fn get(&self, id: PageId) -> Result<PageHandle, BitmapError> {
        let pages = self.pages.read()?;
        pages
            .get(id as usize)
            .cloned()
            .ok_or_else(|| BitmapError::Corrupted {
                details: format!("page {} out of range ({} allocated)", id, pages.len()),
            })
    }

    fn mark_dirty(&self, _id: PageId) {}

    fn flush(&self) -> Result<(), BitmapError> {
        Ok(())
    }

    fn page_count(&self) -> u64 {
        self.pages.read().map(|p| p.len() as u64).unwrap_or(0)
    }

    fn reset(&self) -> Result<(), BitmapError> {
        self.pages.write()?.clear();
        Ok(())
    }
}

/// Durable page store: one file of crc32-framed 8 KiB page images behind an
/// in-memory page table. All pages are loaded and verified at open; dirty
/// pages are written back and fsync'd at flush points.
#[derive(Debug)]
pub struct FilePageStore {
    path: PathBuf,
    file: Mutex<File>,
    pages: RwLock<Vec<PageHandle>>,
    dirty: Mutex<HashSet<PageId>>,
}

impl FilePageStore {
    /// Opens (or creates) the page file in `dir`, verifying every stored
    /// page image against its checksum.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, BitmapError> {
        std::fs::create_dir_all(&dir)?;
        let path = dir.as_ref().join("index.pages");
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        let mut pages = Vec::new();
        if len == 0 {
            write_store_header(&mut file)?;
        } else {
            read_store_header(&mut file, &path)?;
            let body = len - STORE_HEADER_LEN;
            if body % FRAME_LEN != 0 {
                return Err(BitmapError::Corrupted {
                    details: format!("page file {:?} has truncated trailing frame", path),
                });
            }
            let count = body / FRAME_LEN;
            file.seek(SeekFrom::Start(STORE_HEADER_LEN))?;
            let mut image = vec![0u8; PAGE_SIZE];
            for id in 0..count {
                let stored_crc = read_exact_u32(&mut file)?;
                file.read_exact(&mut image)?;
                if crc32(&image) != stored_crc {
                    return Err(BitmapError::Corrupted {
                        details: format!("checksum mismatch on page {} in {:?}", id, path),
                    });
                }
                pages.push(Arc::new(RwLock::new(Page::from_bytes(&image)?)));
            }
        }

        Ok(FilePageStore {
            path,
            file: Mutex::new(file),
            pages: RwLock::new(pages),
            dirty: Mutex::new(HashSet::new()),
        })
    }

    fn write_frame(file: &mut File, id: PageId, page: &Page) -> Result<(), BitmapError> {
        let image = page.to_bytes();
        let crc = crc32(&image);
        file.seek(SeekFrom::Start(STORE_HEADER_LEN + id as u64 * FRAME_LEN))?;
        file.write_all(&crc.to_le_bytes())?;
        file.write_all(&image)?;
        Ok(())
    }
}

impl PageStore for FilePageStore {
    fn alloc(&self, page: Page) -> Result<PageId, BitmapError> {
        let mut pages = self.pages.write()?;
        let id = pages.len() as PageId;
        pages.push(Arc::new(RwLock::new(page)));
        self.dirty.lock()?.insert(id);
        Ok(id)
    }

    fn get(&self, id: PageId) -> Result<PageHandle, BitmapError> {
        let pages = self.pages.read()?;
        pages
            .get(id as usize)
            .cloned()
            .ok_or_else(|| BitmapError::Corrupted {
                details: format!("page {} out of range ({} allocated)", id, pages.len()),
            })
    }

    fn mark_dirty(&self, id: PageId) {
        if let Ok(mut dirty) = self.dirty.lock() {
            dirty.insert(id);
        }
    }

    fn flush(&self) -> Result<(), BitmapError> {
        let mut ids: Vec<PageId> = {
            let dirty = self.dirty.lock()?;
            dirty.iter().copied().collect()
        };
        if ids.is_empty() {
            return Ok(());
        }
        ids.sort_unstable();
        {
            let mut file = self.file.lock()?;
            for &id in &ids {
                let handle = self.get(id)?;
                let guard = handle.read()?;
                Self::write_frame(&mut file, id, &guard)?;
            }
            file.flush()?;
            file.sync_data()?;
        }
        // Only forget dirty pages once they are durable; a failed flush
        // leaves them queued for the next attempt.
        let mut dirty = self.dirty.lock()?;
        for id in ids {
            dirty.remove(&id);
        }
        Ok(())
    }

    fn page_count(&self) -> u64 {
        self.pages.read().map(|p| p.len() as u64).unwrap_or(0)
    }

    fn reset(&self) -> Result<(), BitmapError> {
        let mut pages = self.pages.write()?;
        let mut file = self.file.lock()?;
        self.dirty.lock()?.clear();
        pages.clear();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write_store_header(&mut file)?;
        Ok(())
    }
}

fn write_store_header(file: &mut File) -> Result<(), BitmapError> {
    file.write_all(STORE_MAGIC)?;
    file.write_all(&STORE_VERSION.to_le_bytes())?;
    file.write_all(&0u32.to_le_bytes())?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

fn read_store_header(file: &mut File, path: &Path) -> Result<(), BitmapError> {
    file.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 8];
    if let Err(e) = file.read_exact(&mut magic) {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            return Err(BitmapError::Corrupted {
                details: format!("page file {:?} shorter than its header", path),
            });
        }
        return Err(e.into());
    }
    if &magic != STORE_MAGIC {
        return Err(BitmapError::Corrupted {
            details: format!("bad magic in page file {:?}", path),
        });
    }
    let version = read_exact_u32(file)?;
    if version != STORE_VERSION {
        return Err(BitmapError::Corrupted {
            details: format!("unsupported page file version {} in {:?}", version, path),
        });
    }
    let _reserved = read_exact_u32(file)?;
    Ok(())
}
