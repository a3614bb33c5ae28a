//! Insertion/build engine: empty-index initialization and the bulk-build
//! path. Incremental insert shares the append logic in `lov` and lives on
//! `BitmapIndex` in `core`.

use crate::error::BitmapError;
use crate::lov::LovDirectory;
use crate::pages::{LovItemRecord, LovPage, MetaPage, Page};
use crate::storage::PageStore;
use crate::table::HostTable;
use crate::types::{all_null, LovHandle, LovKey, Rid, LOV_START_PAGE, META_PAGE};

use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Pseudo-identifiers recorded in the meta page once the auxiliary catalog
/// pair exists. Zero means "unset" (the `build_empty` state).
pub(crate) const LOV_HEAP_RELID: u32 = 1;
pub(crate) const LOV_INDEX_RELID: u32 = 2;

/// Result of a bulk build or rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    /// Rows seen in the host-table scan.
    pub heap_tuples: u64,
    /// RID bits appended across all vectors.
    pub index_tuples: u64,
    /// Distinct non-null value combinations.
    pub distinct_values: u64,
}

/// Writes the two pages every index starts from: the meta page at block 0
/// (auxiliary ids unset) and the first LOV page at block 1 holding only the
/// NULL placeholder item.
///
/// Fails with a precondition error unless the page store is completely
/// empty.
pub(crate) fn init_empty(store: &Arc<dyn PageStore>) -> Result<(), BitmapError> {
    if store.page_count() != 0 {
        return Err(BitmapError::Precondition(
            "index already contains data; build requires an empty index".to_string(),
        ));
    }
    let meta_id = store.alloc(Page::Meta(MetaPage {
        lov_heap_id: 0,
        lov_index_id: 0,
        lov_last_page: LOV_START_PAGE,
    }))?;
    let mut lov = LovPage::new();
    lov.add_item(LovItemRecord::empty())?;
    let lov_id = store.alloc(Page::Lov(lov))?;
    if meta_id != META_PAGE || lov_id != LOV_START_PAGE {
        return Err(BitmapError::Corrupted {
            details: format!(
                "fresh store allocated pages {} and {}, expected {} and {}",
                meta_id, lov_id, META_PAGE, LOV_START_PAGE
            ),
        });
    }
    Ok(())
}

/// Bulk build: scans the host table, groups rows by distinct value
/// combination, then streams each group's RIDs (already sorted by the table
/// scan) into its vector. Distinct vectors are independent, so the append
/// fan-out runs in parallel.
pub(crate) fn bulk_build(
    store: &Arc<dyn PageStore>,
    directory: &LovDirectory,
    table: &dyn HostTable,
) -> Result<BuildStats, BitmapError> {
    init_empty(store)?;

    // The catalog pair now exists; record its identifiers in the meta page.
    {
        let meta = store.get(META_PAGE)?;
        let mut guard = meta.write()?;
        let mp = guard.as_meta_mut()?;
        mp.lov_heap_id = LOV_HEAP_RELID;
        mp.lov_index_id = LOV_INDEX_RELID;
    }
    store.mark_dirty(META_PAGE);

    let mut groups: BTreeMap<LovKey, Vec<Rid>> = BTreeMap::new();
    let mut null_rids: Vec<Rid> = Vec::new();
    let mut heap_tuples = 0u64;
    for (rid, values) in table.scan_rows() {
        heap_tuples += 1;
        if all_null(&values) {
            null_rids.push(rid);
        } else {
            groups.entry(values).or_default().push(rid);
        }
    }

    // Directory entries are created serially; the per-vector appends fan
    // out, since distinct items' tails never contend.
    let mut work: Vec<(LovHandle, Vec<Rid>)> = Vec::with_capacity(groups.len() + 1);
    if !null_rids.is_empty() {
        work.push((LovHandle::NULL_PLACEHOLDER, null_rids));
    }
    for (key, rids) in groups {
        let handle = directory.find_or_create(&key)?;
        work.push((handle, rids));
    }

    let index_tuples: u64 = work.iter().map(|(_, rids)| rids.len() as u64).sum();

    work.par_iter().try_for_each(|(handle, rids)| {
        for &rid in rids {
            directory.append_rid(*handle, rid)?;
        }
        Ok::<(), BitmapError>(())
    })?;

    directory.flush_all()?;
    store.flush()?;

    Ok(BuildStats {
        heap_tuples,
        index_tuples,
        distinct_values: directory.distinct_values()?,
    })
}
