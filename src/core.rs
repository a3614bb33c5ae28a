//! Main index API: ties the page store, LOV directory, build engine and
//! scan engine together behind [`BitmapIndex`].

use crate::build::{bulk_build, init_empty, BuildStats};
use crate::error::BitmapError;
use crate::lov::LovDirectory;
use crate::scan::{Predicate, Scan};
use crate::storage::{FilePageStore, PageStore};
use crate::table::HostTable;
use crate::telemetry::{noop_event_listener, IndexEvent, IndexEventListener};
use crate::types::{Datum, LovHandle, Rid};

use std::path::PathBuf;
use std::sync::Arc;

/// Configuration options for a bitmap index.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Where the LOV catalog snapshot is persisted at flush points. `None`
    /// keeps the catalog in memory only (fine for ephemeral indexes).
    pub catalog_path: Option<PathBuf>,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn IndexEventListener>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            catalog_path: None,
            event_listener: noop_event_listener(),
        }
    }
}

/// Statistics returned by `vacuum_cleanup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VacuumStats {
    pub num_pages: u64,
    pub distinct_values: u64,
}

/// An on-disk bitmap index over one or more columns of a host table: one
/// HRL-compressed bitmap vector per distinct value combination.
#[derive(Debug)]
pub struct BitmapIndex {
    store: Arc<dyn PageStore>,
    directory: LovDirectory,
    config: IndexConfig,
}

impl BitmapIndex {
    /// Wraps an existing page store. If the store already holds pages, the
    /// catalog snapshot (when configured and present) is loaded so value
    /// lookups work across restarts.
    pub fn new(store: Arc<dyn PageStore>, config: IndexConfig) -> Result<Self, BitmapError> {
        let directory = LovDirectory::new(store.clone());
        if store.page_count() != 0 {
            if let Some(path) = &config.catalog_path {
                if path.exists() {
                    directory.load_catalog(path)?;
                }
            }
        }
        Ok(BitmapIndex {
            store,
            directory,
            config,
        })
    }

    /// Opens (or creates) a durable index in `dir`: a [`FilePageStore`]
    /// plus the catalog snapshot alongside it.
    pub fn open<P: Into<PathBuf>>(dir: P, mut config: IndexConfig) -> Result<Self, BitmapError> {
        let dir = dir.into();
        let store: Arc<dyn PageStore> = Arc::new(FilePageStore::open(&dir)?);
        if config.catalog_path.is_none() {
            config.catalog_path = Some(dir.join("lov_catalog.bin"));
        }
        Self::new(store, config)
    }

    /// Initializes an empty index: the meta page (auxiliary ids unset) and
    /// the first LOV page holding only the NULL placeholder item. The page
    /// store must be empty.
    pub fn build_empty(&self) -> Result<(), BitmapError> {
        init_empty(&self.store)?;
        self.store.flush()
    }

    /// Builds the index from a full scan of the host table. The page store
    /// must be empty; everything is durable when this returns.
    pub fn build(&self, table: &dyn HostTable) -> Result<BuildStats, BitmapError> {
        let stats = bulk_build(&self.store, &self.directory, table)?;
        self.save_catalog()?;
        self.config.event_listener.on_event(IndexEvent::BuildFinished {
            heap_tuples: stats.heap_tuples,
            index_tuples: stats.index_tuples,
            distinct_values: stats.distinct_values,
        });
        Ok(stats)
    }

    /// Inserts one row: routes the RID to the LOV entry for its value
    /// combination, creating the entry on first sight. Within one insert
    /// stream the host table hands out RIDs in increasing order, which is
    /// exactly the ordering contract `append_rid` enforces.
    pub fn insert(&self, rid: Rid, values: &[Datum]) -> Result<(), BitmapError> {
        self.ensure_initialized()?;
        let handle = self.directory.find_or_create(values)?;
        self.directory.append_rid(handle, rid)
    }

    /// Starts a scan for the given predicate. Values without a LOV entry
    /// contribute zero RIDs. The returned scan is self-contained; combine
    /// the `produce_all` treemaps of several scans for AND/OR across
    /// columns.
    pub fn begin_scan(&self, predicate: &Predicate) -> Result<Scan, BitmapError> {
        self.ensure_initialized()?;
        let handles = self.resolve(predicate)?;
        Ok(Scan::new(self.store.clone(), handles))
    }

    /// Forces buffered tail words into the page chains, persists the
    /// catalog snapshot, and makes all dirty pages durable.
    pub fn flush(&self) -> Result<(), BitmapError> {
        self.ensure_initialized()?;
        self.directory.flush_all()?;
        self.save_catalog()?;
        self.store.flush()
    }

    /// Rebuild-based bulk delete: discards the whole index and rebuilds it
    /// from the (already pruned) host table. There is no incremental
    /// deletion of set bits.
    pub fn bulk_delete(&self, table: &dyn HostTable) -> Result<BuildStats, BitmapError> {
        self.store.reset()?;
        self.directory.clear_catalog()?;
        let stats = bulk_build(&self.store, &self.directory, table)?;
        self.save_catalog()?;
        self.config
            .event_listener
            .on_event(IndexEvent::VacuumRebuildFinished {
                heap_tuples: stats.heap_tuples,
                num_pages: self.store.page_count(),
            });
        Ok(stats)
    }

    /// Post-vacuum statistics; the rebuild already happened in
    /// `bulk_delete`, so there is nothing left to clean.
    pub fn vacuum_cleanup(&self) -> Result<VacuumStats, BitmapError> {
        Ok(VacuumStats {
            num_pages: self.store.page_count(),
            distinct_values: self.directory.distinct_values()?,
        })
    }

    pub fn page_count(&self) -> u64 {
        self.store.page_count()
    }

    fn ensure_initialized(&self) -> Result<(), BitmapError> {
        if self.store.page_count() == 0 {
            return Err(BitmapError::Precondition(
                "index is not initialized; run build or build_empty first".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve(&self, predicate: &Predicate) -> Result<Vec<LovHandle>, BitmapError> {
        match predicate {
            Predicate::Equals(key) => Ok(self.directory.lookup(key)?.into_iter().collect()),
            Predicate::AnyOf(keys) => {
                let mut handles = Vec::new();
                for key in keys {
                    if let Some(h) = self.directory.lookup(key)? {
                        if !handles.contains(&h) {
                            handles.push(h);
                        }
                    }
                }
                Ok(handles)
            }
            Predicate::Range { lo, hi } => {
                // The placeholder never lives in the catalog, so range
                // predicates can never match nulls.
                self.directory.lookup_range(lo.clone(), hi.clone())
            }
            Predicate::IsNull => Ok(vec![LovHandle::NULL_PLACEHOLDER]),
        }
    }

    fn save_catalog(&self) -> Result<(), BitmapError> {
        if let Some(path) = &self.config.catalog_path {
            match self.directory.save_catalog(path) {
                Ok(()) => {
                    self.config
                        .event_listener
                        .on_event(IndexEvent::CatalogSnapshotWritten { path: path.clone() });
                }
                Err(e) => {
                    self.config
                        .event_listener
                        .on_event(IndexEvent::CatalogSnapshotFailed {
                            error: e.to_string(),
                        });
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::ScanDirection;
    use crate::storage::MemoryPageStore;
    use crate::table::MemTable;
    use std::ops::Bound;

    fn mem_index() -> BitmapIndex {
        BitmapIndex::new(Arc::new(MemoryPageStore::new()), IndexConfig::default()).unwrap()
    }

    #[test]
    fn insert_before_build_fails() {
        let index = mem_index();
        assert!(matches!(
            index.insert(1, &[Datum::Int(1)]),
            Err(BitmapError::Precondition(_))
        ));
    }

    #[test]
    fn build_then_scan_equality() {
        let index = mem_index();
        let mut table = MemTable::new();
        table.insert_row(3, vec![Datum::Text("x".into())]);
        table.insert_row(4, vec![Datum::Text("x".into())]);
        table.insert_row(5, vec![Datum::Text("x".into())]);
        table.insert_row(7, vec![Datum::Text("y".into())]);
        table.insert_row(1000, vec![Datum::Text("x".into())]);
        index.build(&table).unwrap();

        let mut scan = index
            .begin_scan(&Predicate::Equals(vec![Datum::Text("x".into())]))
            .unwrap();
        assert_eq!(scan.first(ScanDirection::Forward).unwrap(), Some(3));
        assert_eq!(scan.next(ScanDirection::Forward).unwrap(), Some(4));
        assert_eq!(scan.next(ScanDirection::Forward).unwrap(), Some(5));
        assert_eq!(scan.next(ScanDirection::Forward).unwrap(), Some(1000));
        assert_eq!(scan.next(ScanDirection::Forward).unwrap(), None);
    }

    #[test]
    fn build_over_existing_index_fails() {
        let index = mem_index();
        let table = MemTable::new();
        index.build(&table).unwrap();
        assert!(matches!(
            index.build(&table),
            Err(BitmapError::Precondition(_))
        ));
    }

    #[test]
    fn missing_value_scans_empty() {
        let index = mem_index();
        index.build(&MemTable::new()).unwrap();
        let mut scan = index
            .begin_scan(&Predicate::equals_one(Datum::Int(42)))
            .unwrap();
        assert_eq!(scan.first(ScanDirection::Forward).unwrap(), None);
    }

    #[test]
    fn is_null_scans_placeholder() {
        let index = mem_index();
        let mut table = MemTable::new();
        table.insert_row(2, vec![Datum::Null]);
        table.insert_row(9, vec![Datum::Int(1)]);
        table.insert_row(12, vec![Datum::Null]);
        index.build(&table).unwrap();
        let all: Vec<Rid> = index
            .begin_scan(&Predicate::IsNull)
            .unwrap()
            .produce_all()
            .unwrap()
            .iter()
            .collect();
        assert_eq!(all, vec![2, 12]);
    }

    #[test]
    fn range_predicate_unions_vectors() {
        let index = mem_index();
        let mut table = MemTable::new();
        table.insert_row(1, vec![Datum::Int(10)]);
        table.insert_row(2, vec![Datum::Int(20)]);
        table.insert_row(3, vec![Datum::Int(30)]);
        table.insert_row(4, vec![Datum::Int(40)]);
        index.build(&table).unwrap();
        let all: Vec<Rid> = index
            .begin_scan(&Predicate::Range {
                lo: Bound::Included(vec![Datum::Int(20)]),
                hi: Bound::Included(vec![Datum::Int(30)]),
            })
            .unwrap()
            .produce_all()
            .unwrap()
            .iter()
            .collect();
        assert_eq!(all, vec![2, 3]);
    }

    #[test]
    fn and_across_columns_via_treemap_intersection() {
        // Two single-column indexes over the same table; the executor ANDs
        // the produced RID bitmaps.
        let color = mem_index();
        let size = mem_index();
        let mut color_tbl = MemTable::new();
        let mut size_tbl = MemTable::new();
        for (rid, c, s) in [
            (1, "red", 10i64),
            (2, "red", 20),
            (3, "blue", 10),
            (4, "red", 10),
        ] {
            color_tbl.insert_row(rid, vec![Datum::Text(c.into())]);
            size_tbl.insert_row(rid, vec![Datum::Int(s)]);
        }
        color.build(&color_tbl).unwrap();
        size.build(&size_tbl).unwrap();

        let reds = color
            .begin_scan(&Predicate::equals_one(Datum::Text("red".into())))
            .unwrap()
            .produce_all()
            .unwrap();
        let tens = size
            .begin_scan(&Predicate::equals_one(Datum::Int(10)))
            .unwrap()
            .produce_all()
            .unwrap();
        let both: Vec<Rid> = (reds & tens).iter().collect();
        assert_eq!(both, vec![1, 4]);
    }

    #[test]
    fn bulk_delete_rebuilds_from_table() {
        let index = mem_index();
        let mut table = MemTable::new();
        for rid in 1..=100u64 {
            table.insert_row(rid, vec![Datum::Int((rid % 3) as i64)]);
        }
        index.build(&table).unwrap();

        for rid in (1..=100u64).filter(|r| r % 2 == 0) {
            table.remove_row(rid);
        }
        let stats = index.bulk_delete(&table).unwrap();
        assert_eq!(stats.heap_tuples, 50);

        let zeros: Vec<Rid> = index
            .begin_scan(&Predicate::equals_one(Datum::Int(0)))
            .unwrap()
            .produce_all()
            .unwrap()
            .iter()
            .collect();
        let expected: Vec<Rid> = (1..=100u64).filter(|r| r % 2 == 1 && r % 3 == 0).collect();
        assert_eq!(zeros, expected);

        let stats = index.vacuum_cleanup().unwrap();
        assert!(stats.num_pages >= 2);
    }

    #[test]
    fn incremental_insert_after_build() {
        let index = mem_index();
        index.build(&MemTable::new()).unwrap();
        index.insert(5, &[Datum::Int(1)]).unwrap();
        index.insert(6, &[Datum::Int(2)]).unwrap();
        index.insert(9, &[Datum::Int(1)]).unwrap();
        let ones: Vec<Rid> = index
            .begin_scan(&Predicate::equals_one(Datum::Int(1)))
            .unwrap()
            .produce_all()
            .unwrap()
            .iter()
            .collect();
        assert_eq!(ones, vec![5, 9]);
    }
}
