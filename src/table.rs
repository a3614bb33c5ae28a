//! Host-table boundary: the index core never owns row storage; it pulls
//! rows through this trait during builds and hands RIDs back to the caller
//! for fetching.

use crate::error::BitmapError;
use crate::types::{Rid, RowValues};

use std::collections::BTreeMap;

/// The slice of the host table this core depends on. Row visibility,
/// transactions, and RID allocation policy all belong to the implementor.
pub trait HostTable: Send + Sync {
    /// Fetches one row's indexed values by RID, or `None` if no such row.
    fn fetch_row(&self, rid: Rid) -> Result<Option<RowValues>, BitmapError>;

    /// Scans all rows in increasing RID order. Bulk build relies on this
    /// ordering to uphold the strictly-increasing append contract.
    fn scan_rows(&self) -> Box<dyn Iterator<Item = (Rid, RowValues)> + '_>;
}

/// Simple in-memory host table used by tests and examples.
#[derive(Debug, Default)]
pub struct MemTable {
    rows: BTreeMap<Rid, RowValues>,
}

impl MemTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_row(&mut self, rid: Rid, values: RowValues) {
        self.rows.insert(rid, values);
    }

    pub fn remove_row(&mut self, rid: Rid) {
        self.rows.remove(&rid);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl HostTable for MemTable {
    fn fetch_row(&self, rid: Rid) -> Result<Option<RowValues>, BitmapError> {
        Ok(self.rows.get(&rid).cloned())
    }

    fn scan_rows(&self) -> Box<dyn Iterator<Item = (Rid, RowValues)> + '_> {
        Box::new(self.rows.iter().map(|(&rid, values)| (rid, values.clone())))
    }
}
