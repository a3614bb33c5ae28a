//! List-of-values directory: one entry per distinct indexed value
//! combination, each pointing at its own bitmap-vector chain.
//!
//! The directory has two halves. Page-resident [`LovItemRecord`]s hold the
//! vector pointers and cached tail state; they live on chained LOV pages and
//! are mutated only under their page's write lock. The *catalog* maps value
//! combinations to item locations, standing in for the auxiliary heap/btree
//! pair: an ordered map under `RwLock`, made durable as a checksummed
//! snapshot file. The NULL placeholder item never enters the catalog; it is
//! always at the fixed location `LovHandle::NULL_PLACEHOLDER`.

use crate::encoding::{
    crc32, encode_fill, fill_bit, fill_len, read_exact_u32, LITERAL_ALL_ONE, LITERAL_ALL_ZERO,
    MAX_FILL_LENGTH, WORD_BITS,
};
use crate::error::BitmapError;
use crate::pages::{LovItemRecord, LovPage, Page, LOV_COMP_IS_FILL, LOV_COMP_PRESENT};
use crate::storage::PageStore;
use crate::types::{all_null, Datum, LovHandle, LovKey, Rid, META_PAGE};
use crate::vector::{append_word_to_chain, ensure_tail_room, truncate_tail};

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, RwLock};

const CATALOG_MAGIC: &[u8; 8] = b"HRLXLOV1";
const CATALOG_VERSION: u32 = 1;

impl LovItemRecord {
    /// Bit position where the cached tail literal's coverage starts. The
    /// tail literal always contains the bit of `last_rid`.
    pub(crate) fn last_word_base(&self) -> u64 {
        if self.last_rid == 0 {
            0
        } else {
            (self.last_rid - 1) / WORD_BITS * WORD_BITS
        }
    }

    /// RIDs covered by the cached last complete word.
    pub(crate) fn comp_rids(&self) -> u64 {
        if !self.comp_present() {
            0
        } else if self.comp_is_fill() {
            fill_len(self.last_comp_word) * WORD_BITS
        } else {
            WORD_BITS
        }
    }

    /// RIDs covered by chain words *excluding* the cached tail words, even
    /// when a flush has materialized those into the chain.
    pub(crate) fn chain_rids(&self) -> u64 {
        self.last_word_base() - self.comp_rids()
    }
}

/// Append-path state machine over one item's cached tail. Tracks the chain
/// coverage explicitly while the cached words are in flux.
struct TailOps<'a> {
    store: &'a dyn PageStore,
    item: &'a mut LovItemRecord,
    chain_rids: u64,
}

impl<'a> TailOps<'a> {
    fn new(store: &'a dyn PageStore, item: &'a mut LovItemRecord) -> Self {
        let chain_rids = item.chain_rids();
        TailOps {
            store,
            item,
            chain_rids,
        }
    }

    fn push_chain(&mut self, word: u64, is_fill: bool) -> Result<(), BitmapError> {
        self.chain_rids += if is_fill {
            fill_len(word) * WORD_BITS
        } else {
            WORD_BITS
        };
        append_word_to_chain(self.store, self.item, word, is_fill, self.chain_rids)
    }

    /// Moves the cached complete word (if any) into the page chain.
    fn spill_comp(&mut self) -> Result<(), BitmapError> {
        if self.item.comp_present() {
            let word = self.item.last_comp_word;
            let is_fill = self.item.comp_is_fill();
            self.push_chain(word, is_fill)?;
            self.item.header &= !(LOV_COMP_PRESENT | LOV_COMP_IS_FILL);
            self.item.last_comp_word = 0;
        }
        Ok(())
    }

    /// Accounts `len` words of `bit` as complete, coalescing with the cached
    /// fill when possible. Runs longer than the fill field are split.
    fn merge_fill(&mut self, bit: bool, mut len: u64) -> Result<(), BitmapError> {
        if self.item.comp_present()
            && self.item.comp_is_fill()
            && fill_bit(self.item.last_comp_word) == bit
        {
            let cur = fill_len(self.item.last_comp_word);
            let take = len.min(MAX_FILL_LENGTH - cur);
            self.item.last_comp_word = encode_fill(bit, cur + take);
            len -= take;
        }
        if len == 0 {
            return Ok(());
        }
        self.spill_comp()?;
        while len > MAX_FILL_LENGTH {
            self.push_chain(encode_fill(bit, MAX_FILL_LENGTH), true)?;
            len -= MAX_FILL_LENGTH;
        }
        self.item.last_comp_word = encode_fill(bit, len);
        self.item.header |= LOV_COMP_PRESENT | LOV_COMP_IS_FILL;
        Ok(())
    }

    /// Retires the tail literal as a complete word. A uniform literal turns
    /// into a length-1 fill so it can coalesce with its neighbor; a mixed
    /// literal becomes the new cached complete word.
    fn complete_last_word(&mut self) -> Result<(), BitmapError> {
        let w = self.item.last_word;
        if w == LITERAL_ALL_ZERO {
            self.merge_fill(false, 1)?;
        } else if w == LITERAL_ALL_ONE {
            self.merge_fill(true, 1)?;
        } else {
            self.spill_comp()?;
            self.item.last_comp_word = w;
            self.item.header |= LOV_COMP_PRESENT;
            self.item.header &= !LOV_COMP_IS_FILL;
        }
        self.item.last_word = 0;
        Ok(())
    }
}

/// Sets the bit for `rid` in `item`'s vector, extending the stream with
/// zero fills over any skipped RIDs. RIDs must arrive strictly increasing.
pub(crate) fn append_rid_to_item(
    store: &dyn PageStore,
    item: &mut LovItemRecord,
    rid: Rid,
) -> Result<(), BitmapError> {
    if rid == 0 {
        return Err(BitmapError::Precondition("RID 0 is reserved".to_string()));
    }
    if rid <= item.last_rid {
        return Err(BitmapError::OutOfOrderRid {
            last: item.last_rid,
            got: rid,
        });
    }
    if item.tail_materialized() > 0 {
        reopen_tail(store, item)?;
    }

    let pos = rid - 1;
    let base = item.last_word_base();
    if pos < base + WORD_BITS {
        item.last_word |= 1 << (pos - base);
    } else {
        let mut ops = TailOps::new(store, item);
        ops.complete_last_word()?;
        let skipped = (pos - base - WORD_BITS) / WORD_BITS;
        if skipped > 0 {
            ops.merge_fill(false, skipped)?;
        }
        item.last_word = 1 << (pos % WORD_BITS);
    }
    item.last_rid = rid;
    Ok(())
}

/// Forces the cached tail words into the page chain, contiguously on one
/// page, and records how many landed so a later append can reopen the tail.
/// Idempotent; a no-op for empty vectors.
pub(crate) fn flush_item_tail(
    store: &dyn PageStore,
    item: &mut LovItemRecord,
) -> Result<(), BitmapError> {
    if item.tail_materialized() > 0 || item.last_rid == 0 {
        return Ok(());
    }
    let nwords = if item.comp_present() { 2 } else { 1 };
    ensure_tail_room(store, item, nwords)?;

    let chain_rids = item.chain_rids();
    if item.comp_present() {
        let word = item.last_comp_word;
        let is_fill = item.comp_is_fill();
        let covered = chain_rids + item.comp_rids();
        append_word_to_chain(store, item, word, is_fill, covered)?;
    }
    let covered = item.last_word_base() + WORD_BITS;
    let last_word = item.last_word;
    let last_is_fill = item.last_word_is_fill();
    append_word_to_chain(store, item, last_word, last_is_fill, covered)?;
    item.set_tail_materialized(nwords as u8);
    Ok(())
}

/// Undoes a flush: removes the materialized tail words from the tail page so
/// the cached copies become the live tail again.
fn reopen_tail(store: &dyn PageStore, item: &mut LovItemRecord) -> Result<(), BitmapError> {
    let nwords = item.tail_materialized() as usize;
    let chain_rids = item.chain_rids();
    truncate_tail(store, item, nwords, chain_rids)?;
    item.set_tail_materialized(0);
    Ok(())
}

/// The LOV directory: catalog plus page-resident items.
#[derive(Debug)]
pub(crate) struct LovDirectory {
    store: Arc<dyn PageStore>,
    catalog: RwLock<BTreeMap<LovKey, LovHandle>>,
}

impl LovDirectory {
    pub fn new(store: Arc<dyn PageStore>) -> Self {
        LovDirectory {
            store,
            catalog: RwLock::new(BTreeMap::new()),
        }
    }

    /// Looks up the LOV entry for a value combination. All-null keys
    /// resolve to the fixed placeholder without touching the catalog.
    pub fn lookup(&self, key: &[Datum]) -> Result<Option<LovHandle>, BitmapError> {
        if all_null(key) {
            return Ok(Some(LovHandle::NULL_PLACEHOLDER));
        }
        Ok(self.catalog.read()?.get(key).copied())
    }

    /// Catalog entries whose keys fall in the given bound range, in key
    /// order. All-null keys are outside the catalog and never match.
    pub fn lookup_range(
        &self,
        lo: Bound<LovKey>,
        hi: Bound<LovKey>,
    ) -> Result<Vec<LovHandle>, BitmapError> {
        let catalog = self.catalog.read()?;
        Ok(catalog.range((lo, hi)).map(|(_, &h)| h).collect())
    }

    /// Finds the LOV entry for `key`, creating it (with an allocated empty
    /// vector page) on first sight. Key uniqueness is the catalog map's
    /// invariant and is not re-checked here.
    pub fn find_or_create(&self, key: &[Datum]) -> Result<LovHandle, BitmapError> {
        if all_null(key) {
            return Ok(LovHandle::NULL_PLACEHOLDER);
        }
        if let Some(handle) = self.catalog.read()?.get(key).copied() {
            return Ok(handle);
        }

        let mut catalog = self.catalog.write()?;
        if let Some(handle) = catalog.get(key).copied() {
            return Ok(handle);
        }

        let meta_handle = self.store.get(META_PAGE)?;
        let mut lov_page_id = {
            let guard = meta_handle.read()?;
            guard.as_meta()?.lov_last_page
        };

        let lov_handle = self.store.get(lov_page_id)?;
        let full = {
            let guard = lov_handle.read()?;
            guard.as_lov()?.is_full()
        };
        let (target, target_id) = if full {
            let new_id = self.store.alloc(Page::Lov(LovPage::new()))?;
            {
                let mut guard = lov_handle.write()?;
                guard.as_lov_mut()?.next_page = new_id;
            }
            self.store.mark_dirty(lov_page_id);
            {
                let mut guard = meta_handle.write()?;
                guard.as_meta_mut()?.lov_last_page = new_id;
            }
            self.store.mark_dirty(META_PAGE);
            lov_page_id = new_id;
            (self.store.get(new_id)?, lov_page_id)
        } else {
            (lov_handle, lov_page_id)
        };

        // New items start with an allocated, empty vector page.
        let vector_page = self.store.alloc(Page::Vector(crate::pages::VectorPage::new()))?;
        let mut item = LovItemRecord::empty();
        item.head = vector_page;
        item.tail = vector_page;

        let offset = {
            let mut guard = target.write()?;
            guard.as_lov_mut()?.add_item(item)?
        };
        self.store.mark_dirty(target_id);

        let handle = LovHandle {
            page: target_id,
            offset,
        };
        catalog.insert(key.to_vec(), handle);
        Ok(handle)
    }

    /// Appends `rid` to the item's vector. The item record is mutated under
    /// its LOV page's write lock, which also serializes concurrent appends
    /// to the same tail.
    pub fn append_rid(&self, handle: LovHandle, rid: Rid) -> Result<(), BitmapError> {
        let page = self.store.get(handle.page)?;
        {
            let mut guard = page.write()?;
            let item = guard.as_lov_mut()?.item_mut(handle.offset)?;
            append_rid_to_item(self.store.as_ref(), item, rid)?;
        }
        self.store.mark_dirty(handle.page);
        Ok(())
    }

    /// Forces the item's buffered tail words into its page chain.
    pub fn flush_item(&self, handle: LovHandle) -> Result<(), BitmapError> {
        let page = self.store.get(handle.page)?;
        {
            let mut guard = page.write()?;
            let item = guard.as_lov_mut()?.item_mut(handle.offset)?;
            flush_item_tail(self.store.as_ref(), item)?;
        }
        self.store.mark_dirty(handle.page);
        Ok(())
    }

    /// Flushes every item: the placeholder plus all catalog entries.
    pub fn flush_all(&self) -> Result<(), BitmapError> {
        self.flush_item(LovHandle::NULL_PLACEHOLDER)?;
        let handles: Vec<LovHandle> = self.catalog.read()?.values().copied().collect();
        for handle in handles {
            self.flush_item(handle)?;
        }
        Ok(())
    }

    pub fn distinct_values(&self) -> Result<u64, BitmapError> {
        Ok(self.catalog.read()?.len() as u64)
    }

    pub fn clear_catalog(&self) -> Result<(), BitmapError> {
        self.catalog.write()?.clear();
        Ok(())
    }

    /// Writes the catalog snapshot: magic, version, payload length, crc32,
    /// bincode payload.
    pub fn save_catalog<P: AsRef<Path>>(&self, path: P) -> Result<(), BitmapError> {
        let payload = {
            let catalog = self.catalog.read()?;
            bincode::serialize(&*catalog).map_err(|e| BitmapError::Serialization(e.to_string()))?
        };
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(CATALOG_MAGIC)?;
        file.write_all(&CATALOG_VERSION.to_le_bytes())?;
        file.write_all(&(payload.len() as u32).to_le_bytes())?;
        file.write_all(&crc32(&payload).to_le_bytes())?;
        file.write_all(&payload)?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Loads a catalog snapshot, verifying magic, version and checksum.
    pub fn load_catalog<P: AsRef<Path>>(&self, path: P) -> Result<(), BitmapError> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != CATALOG_MAGIC {
            return Err(BitmapError::Corrupted {
                details: format!("bad magic in catalog snapshot {:?}", path),
            });
        }
        let version = read_exact_u32(&mut file)?;
        if version != CATALOG_VERSION {
            return Err(BitmapError::Corrupted {
                details: format!("unsupported catalog snapshot version {}", version),
            });
        }
        let len = read_exact_u32(&mut file)? as usize;
        let expected_crc = read_exact_u32(&mut file)?;
        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)?;
        if crc32(&payload) != expected_crc {
            return Err(BitmapError::Corrupted {
                details: format!("checksum mismatch in catalog snapshot {:?}", path),
            });
        }
        let map: BTreeMap<LovKey, LovHandle> = bincode::deserialize(&payload)
            .map_err(|e| BitmapError::Serialization(e.to_string()))?;
        *self.catalog.write()? = map;
        Ok(())
    }
}
