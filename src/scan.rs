//! Scan/merge engine: walks one or more bitmap vectors in lock-step,
//! decompressing on the fly, and produces set RIDs in order.
//!
//! A scan is a state machine `Unstarted -> Positioned -> Exhausted` with an
//! optional marked snapshot. Each participating LOV item gets its own
//! [`VectorPosition`]; multiple positions are k-way merged so a disjunctive
//! predicate yields the sorted union with no duplicates. Positions hold
//! reference-counted page handles; marking clones the handles (a second
//! owner of the same pages, not a copy of page contents) and every
//! reference is released exactly once, on overwrite or at scan end.

use crate::encoding::{decode, WordKind, WORD_BITS};
use crate::error::BitmapError;
use crate::storage::PageStore;
use crate::types::{Datum, LovHandle, LovKey, Rid};
use crate::vector::VectorReader;

use roaring::RoaringTreemap;
use std::ops::Bound;
use std::sync::Arc;

/// Scan direction. The chain has no backward links, so backward scans
/// materialize the forward stream once and replay it in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

/// Predicate over indexed value combinations. Equality resolves to at most
/// one LOV entry; `AnyOf` and `Range` may resolve to several; values with
/// no entry contribute zero RIDs (not an error).
#[derive(Debug, Clone)]
pub enum Predicate {
    Equals(LovKey),
    AnyOf(Vec<LovKey>),
    Range { lo: Bound<LovKey>, hi: Bound<LovKey> },
    IsNull,
}

impl Predicate {
    pub fn equals_one(value: Datum) -> Self {
        Predicate::Equals(vec![value])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Unstarted,
    Positioned,
    Exhausted,
}

/// Cursor over one vector's word stream with fill-run decompression state.
#[derive(Debug, Clone)]
struct VectorPosition {
    reader: VectorReader,
    /// Currently decoded word, if not yet fully consumed.
    cur: Option<WordKind>,
    /// Absolute bit position where `cur`'s coverage starts.
    base: u64,
    /// Next absolute bit position to examine; never less than `base`.
    probe: u64,
    finished: bool,
    peeked: Option<Rid>,
}

impl VectorPosition {
    fn open(
        store: Arc<dyn PageStore>,
        handle: LovHandle,
        lower_bound: Rid,
    ) -> Result<Self, BitmapError> {
        Ok(VectorPosition {
            reader: VectorReader::open(store, handle)?,
            cur: None,
            base: 0,
            probe: lower_bound.saturating_sub(1),
            finished: false,
            peeked: None,
        })
    }

    /// Advances to the next set bit at or after `probe`. Zero fills are
    /// skipped in O(1) per run; one fills are emitted bit by bit without
    /// re-decoding.
    fn next_set(&mut self) -> Result<Option<Rid>, BitmapError> {
        if self.finished {
            return Ok(None);
        }
        loop {
            let cur = match self.cur {
                Some(kind) => kind,
                None => match self.reader.next_word()? {
                    Some((word, is_fill)) => {
                        let kind = decode(word, is_fill);
                        self.cur = Some(kind);
                        kind
                    }
                    None => {
                        self.finished = true;
                        return Ok(None);
                    }
                },
            };
            match cur {
                WordKind::Literal(w) => {
                    let off = self.probe - self.base;
                    if off < WORD_BITS {
                        let masked = w & (u64::MAX << off);
                        if masked != 0 {
                            let bit = self.base + masked.trailing_zeros() as u64;
                            self.probe = bit + 1;
                            return Ok(Some(bit + 1));
                        }
                    }
                    self.base += WORD_BITS;
                    self.probe = self.probe.max(self.base);
                    self.cur = None;
                }
                WordKind::Fill { bit: false, len } => {
                    self.base += len * WORD_BITS;
                    self.probe = self.probe.max(self.base);
                    self.cur = None;
                }
                WordKind::Fill { bit: true, len } => {
                    let end = self.base + len * WORD_BITS;
                    if self.probe < end {
                        let bit = self.probe;
                        self.probe = bit + 1;
                        return Ok(Some(bit + 1));
                    }
                    self.base = end;
                    self.cur = None;
                }
            }
        }
    }
}

/// Snapshot taken by `mark()`.
#[derive(Debug, Clone)]
struct MarkedPosition {
    positions: Vec<VectorPosition>,
    state: ScanState,
    backward: Option<BackwardBuf>,
}

#[derive(Debug, Clone)]
struct BackwardBuf {
    rids: Vec<Rid>,
    /// Number of RIDs not yet returned (we walk from the end downward).
    remaining: usize,
}

/// One index scan. Created by `BitmapIndex::begin_scan`; independent of the
/// index handle it came from (it owns its own store reference).
#[derive(Debug)]
pub struct Scan {
    store: Arc<dyn PageStore>,
    handles: Vec<LovHandle>,
    lower_bound: Rid,
    state: ScanState,
    direction: Option<ScanDirection>,
    positions: Vec<VectorPosition>,
    backward: Option<BackwardBuf>,
    marked: Option<MarkedPosition>,
}

impl Scan {
    pub(crate) fn new(store: Arc<dyn PageStore>, handles: Vec<LovHandle>) -> Self {
        Scan {
            store,
            handles,
            lower_bound: 1,
            state: ScanState::Unstarted,
            direction: None,
            positions: Vec::new(),
            backward: None,
            marked: None,
        }
    }

    /// Restricts the scan to RIDs at or after `rid`. Only meaningful before
    /// `first`.
    pub fn with_lower_bound(mut self, rid: Rid) -> Self {
        self.lower_bound = rid;
        self
    }

    /// Positions the scan on the first matching RID in the given direction.
    /// `Unstarted -> Positioned` on success, `Unstarted -> Exhausted` when
    /// no set bit exists.
    pub fn first(&mut self, direction: ScanDirection) -> Result<Option<Rid>, BitmapError> {
        self.release_positions();
        self.marked = None;
        self.backward = None;
        self.direction = Some(direction);
        match direction {
            ScanDirection::Forward => {
                self.positions = self.open_positions()?;
                for pos in &mut self.positions {
                    pos.peeked = pos.next_set()?;
                }
                match self.take_min()? {
                    Some(rid) => {
                        self.state = ScanState::Positioned;
                        Ok(Some(rid))
                    }
                    None => {
                        self.state = ScanState::Exhausted;
                        Ok(None)
                    }
                }
            }
            ScanDirection::Backward => {
                // Materialize the forward stream once, then replay it from
                // the tail; the page chain only links forward.
                let mut positions = self.open_positions()?;
                for pos in &mut positions {
                    pos.peeked = pos.next_set()?;
                }
                let mut rids = Vec::new();
                while let Some(rid) = take_min_of(&mut positions)? {
                    rids.push(rid);
                }
                let remaining = rids.len();
                self.backward = Some(BackwardBuf { rids, remaining });
                self.step_backward()
            }
        }
    }

    /// Returns the next matching RID, or `None` once exhausted. The
    /// direction must match the one given to `first`.
    pub fn next(&mut self, direction: ScanDirection) -> Result<Option<Rid>, BitmapError> {
        match self.state {
            ScanState::Unstarted => {
                return Err(BitmapError::Precondition(
                    "scan_next before scan start".to_string(),
                ))
            }
            ScanState::Exhausted => return Ok(None),
            ScanState::Positioned => {}
        }
        if self.direction != Some(direction) {
            return Err(BitmapError::Precondition(
                "scan direction cannot change mid-scan".to_string(),
            ));
        }
        match direction {
            ScanDirection::Forward => match self.take_min()? {
                Some(rid) => Ok(Some(rid)),
                None => {
                    self.state = ScanState::Exhausted;
                    Ok(None)
                }
            },
            ScanDirection::Backward => self.step_backward(),
        }
    }

    /// Saves the current position. The marked snapshot holds its own page
    /// references until it is overwritten, restored over, or the scan ends.
    pub fn mark(&mut self) -> Result<(), BitmapError> {
        if self.state != ScanState::Positioned {
            return Err(BitmapError::Precondition(
                "no scan position to mark".to_string(),
            ));
        }
        self.marked = Some(MarkedPosition {
            positions: self.positions.clone(),
            state: self.state,
            backward: self.backward.clone(),
        });
        Ok(())
    }

    /// Restores the last saved position, replacing (and thereby releasing)
    /// the current one.
    pub fn restore(&mut self) -> Result<(), BitmapError> {
        let marked = self.marked.as_ref().ok_or_else(|| {
            BitmapError::Precondition("scan_restore without a saved mark".to_string())
        })?;
        self.positions = marked.positions.clone();
        self.state = marked.state;
        self.backward = marked.backward.clone();
        Ok(())
    }

    /// Releases all page references held by current and marked positions.
    /// Idempotent; dropping the scan has the same effect.
    pub fn end(&mut self) {
        self.release_positions();
        self.marked = None;
        self.backward = None;
        self.state = ScanState::Exhausted;
    }

    /// Drains the scan into a RID bitmap, starting it if necessary.
    /// Equivalent to repeated `next` until exhaustion.
    pub fn produce_all(&mut self) -> Result<RoaringTreemap, BitmapError> {
        let mut out = RoaringTreemap::new();
        let mut cur = match self.state {
            ScanState::Unstarted => self.first(ScanDirection::Forward)?,
            ScanState::Positioned => self.next(ScanDirection::Forward)?,
            ScanState::Exhausted => None,
        };
        while let Some(rid) = cur {
            out.insert(rid);
            cur = self.next(ScanDirection::Forward)?;
        }
        Ok(out)
    }

    fn open_positions(&self) -> Result<Vec<VectorPosition>, BitmapError> {
        self.handles
            .iter()
            .map(|&h| VectorPosition::open(self.store.clone(), h, self.lower_bound))
            .collect()
    }

    fn take_min(&mut self) -> Result<Option<Rid>, BitmapError> {
        take_min_of(&mut self.positions)
    }

    fn step_backward(&mut self) -> Result<Option<Rid>, BitmapError> {
        let buf = self.backward.as_mut().ok_or_else(|| {
            BitmapError::Precondition("backward step without a backward scan".to_string())
        })?;
        if buf.remaining == 0 {
            self.state = ScanState::Exhausted;
            return Ok(None);
        }
        buf.remaining -= 1;
        self.state = ScanState::Positioned;
        Ok(Some(buf.rids[buf.remaining]))
    }

    fn release_positions(&mut self) {
        self.positions.clear();
    }
}

/// K-way merge step: returns the smallest peeked RID and advances every
/// position holding it, so a RID present in several vectors is returned
/// exactly once.
fn take_min_of(positions: &mut [VectorPosition]) -> Result<Option<Rid>, BitmapError> {
    let min = positions.iter().filter_map(|p| p.peeked).min();
    let Some(min) = min else {
        return Ok(None);
    };
    for pos in positions.iter_mut() {
        if pos.peeked == Some(min) {
            pos.peeked = pos.next_set()?;
        }
    }
    Ok(Some(min))
}
