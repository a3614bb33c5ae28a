//! Bitmap-vector word streams over page chains: appending encoded words to
//! the tail of a chain and walking a chain forward as a lazy word sequence.
//!
//! Pages are touched under their own lock for the duration of one touch
//! only; a reader copies a page's words into an in-memory batch and releases
//! the lock before decoding.

use crate::encoding::fill_len;
use crate::error::BitmapError;
use crate::pages::{LovItemRecord, Page, VectorPage};
use crate::storage::{PageHandle, PageStore};
use crate::types::{LovHandle, PageId, Rid, Word, INVALID_PAGE};

use std::sync::Arc;

/// Appends one encoded word to the tail page of `item`'s chain, allocating
/// and linking a new page when the tail is full. This allocation is the only
/// point at which a new page is created during normal append.
///
/// `covered_rids` is the total RID count represented by the chain after this
/// word lands; it becomes the tail page's last-RID marker.
pub(crate) fn append_word_to_chain(
    store: &dyn PageStore,
    item: &mut LovItemRecord,
    word: Word,
    is_fill: bool,
    covered_rids: Rid,
) -> Result<(), BitmapError> {
    if item.tail == INVALID_PAGE {
        let id = store.alloc(Page::Vector(VectorPage::new()))?;
        item.head = id;
        item.tail = id;
        item.tail_words_used = 0;
    }

    let tail = store.get(item.tail)?;
    let full = {
        let guard = tail.read()?;
        !guard.as_vector()?.has_room(1)
    };
    if full {
        let new_id = store.alloc(Page::Vector(VectorPage::new()))?;
        {
            let mut guard = tail.write()?;
            guard.as_vector_mut()?.next_page = new_id;
        }
        store.mark_dirty(item.tail);
        item.tail = new_id;
        item.tail_words_used = 0;
    }

    let tail = store.get(item.tail)?;
    {
        let mut guard = tail.write()?;
        let vp = guard.as_vector_mut()?;
        vp.append_word(word, is_fill)?;
        vp.last_rid = covered_rids;
        item.tail_words_used = vp.words_used() as u16;
    }
    store.mark_dirty(item.tail);
    Ok(())
}

/// Guarantees the tail page can take `nwords` more words without spilling,
/// allocating and linking a fresh tail if necessary. Used by the flush path
/// so the materialized tail words land contiguously on one page.
pub(crate) fn ensure_tail_room(
    store: &dyn PageStore,
    item: &mut LovItemRecord,
    nwords: usize,
) -> Result<(), BitmapError> {
    if item.tail == INVALID_PAGE {
        // First append allocates; a fresh page has room for any sane nwords.
        return Ok(());
    }
    let tail = store.get(item.tail)?;
    let needs_new = {
        let guard = tail.read()?;
        !guard.as_vector()?.has_room(nwords)
    };
    if needs_new {
        let new_id = store.alloc(Page::Vector(VectorPage::new()))?;
        {
            let mut guard = tail.write()?;
            guard.as_vector_mut()?.next_page = new_id;
        }
        store.mark_dirty(item.tail);
        item.tail = new_id;
        item.tail_words_used = 0;
    }
    Ok(())
}

/// Removes the last `nwords` words from the tail page (reopening a tail that
/// a flush had materialized) and resets its last-RID marker to
/// `covered_rids`.
pub(crate) fn truncate_tail(
    store: &dyn PageStore,
    item: &mut LovItemRecord,
    nwords: usize,
    covered_rids: Rid,
) -> Result<(), BitmapError> {
    let tail = store.get(item.tail)?;
    {
        let mut guard = tail.write()?;
        let vp = guard.as_vector_mut()?;
        let used = vp.words_used();
        if used < nwords {
            return Err(BitmapError::Corrupted {
                details: format!(
                    "tail page holds {} words but {} materialized tail words are recorded",
                    used, nwords
                ),
            });
        }
        vp.truncate_words(used - nwords);
        vp.last_rid = covered_rids;
        item.tail_words_used = vp.words_used() as u16;
    }
    store.mark_dirty(item.tail);
    Ok(())
}

/// A batch of raw (header, content) words copied out of one page, consumed
/// in lock-step through a cursor.
#[derive(Debug, Clone, Default)]
pub(crate) struct BatchWords {
    startno: usize,
    hwords: Vec<Word>,
    cwords: Vec<Word>,
}

impl BatchWords {
    /// Copies at most `limit` words out of a page. The limit pins the
    /// reader to the tail position captured when it was opened, so words a
    /// concurrent flush appends afterwards are not seen twice.
    fn from_page(vp: &VectorPage, limit: usize) -> Self {
        let take = vp.cwords.len().min(limit);
        BatchWords {
            startno: 0,
            hwords: vp.hwords.clone(),
            cwords: vp.cwords[..take].to_vec(),
        }
    }

    fn from_words(words: &[(Word, bool)]) -> Self {
        let mut hwords = vec![0; crate::encoding::header_words_needed(words.len())];
        let mut cwords = Vec::with_capacity(words.len());
        for (i, &(w, is_fill)) in words.iter().enumerate() {
            cwords.push(w);
            crate::encoding::set_header_bit(&mut hwords, i, is_fill);
        }
        BatchWords {
            startno: 0,
            hwords,
            cwords,
        }
    }

    fn is_consumed(&self) -> bool {
        self.startno >= self.cwords.len()
    }

    fn take(&mut self) -> (Word, bool) {
        let w = self.cwords[self.startno];
        let f = crate::encoding::header_bit(&self.hwords, self.startno);
        self.startno += 1;
        (w, f)
    }
}

/// Lazy forward walk over one vector's word stream: the page chain first,
/// then the LOV item's cached tail words when they are not already
/// materialized in the chain. Cloning a reader clones its page references
/// (the underlying pages are reference-counted, not copied).
#[derive(Debug, Clone)]
pub(crate) struct VectorReader {
    store: Arc<dyn PageStore>,
    /// Pinned LOV page; held for the lifetime of the read position.
    #[allow(dead_code)]
    lov_page: PageHandle,
    /// Item state snapshot taken when the reader was opened.
    item: LovItemRecord,
    /// Page whose words currently sit in `batch`; pinned until refill.
    cur_page: Option<PageHandle>,
    next_page: PageId,
    batch: BatchWords,
    tail_pending: bool,
}

impl VectorReader {
    /// Opens a reader at the head of the vector addressed by `handle`. The
    /// item state is snapshotted here; the walk never goes past the tail
    /// position recorded in the snapshot.
    pub fn open(store: Arc<dyn PageStore>, handle: LovHandle) -> Result<Self, BitmapError> {
        let lov_page = store.get(handle.page)?;
        let item = {
            let guard = lov_page.read()?;
            *guard.as_lov()?.item(handle.offset)?
        };
        Ok(VectorReader {
            store,
            lov_page,
            next_page: item.head,
            tail_pending: item.tail_materialized() == 0,
            item,
            cur_page: None,
            batch: BatchWords::default(),
        })
    }

    /// Returns the next `(word, is_fill)` of the stream, or `None` at end.
    pub fn next_word(&mut self) -> Result<Option<(Word, bool)>, BitmapError> {
        while self.batch.is_consumed() {
            if !self.refill()? {
                return Ok(None);
            }
        }
        let (word, is_fill) = self.batch.take();
        if is_fill && fill_len(word) == 0 {
            // The append path never writes zero-length fills.
            return Err(BitmapError::Corrupted {
                details: "zero-length fill word in bitmap vector".to_string(),
            });
        }
        Ok(Some((word, is_fill)))
    }

    fn refill(&mut self) -> Result<bool, BitmapError> {
        loop {
            if self.next_page != INVALID_PAGE {
                let at_snapshot_tail = self.next_page == self.item.tail;
                let limit = if at_snapshot_tail {
                    self.item.tail_words_used as usize
                } else {
                    usize::MAX
                };
                let handle = self.store.get(self.next_page)?;
                {
                    let guard = handle.read()?;
                    let vp = guard.as_vector()?;
                    self.batch = BatchWords::from_page(vp, limit);
                    self.next_page = if at_snapshot_tail {
                        INVALID_PAGE
                    } else {
                        vp.next_page
                    };
                }
                self.cur_page = Some(handle);
                if self.batch.is_consumed() {
                    // A reopened tail can leave an empty page in the chain.
                    continue;
                }
                return Ok(true);
            }
            if self.tail_pending {
                self.tail_pending = false;
                self.cur_page = None;
                let mut words: Vec<(Word, bool)> = Vec::with_capacity(2);
                if self.item.comp_present() {
                    words.push((self.item.last_comp_word, self.item.comp_is_fill()));
                }
                if self.item.last_rid > 0 {
                    words.push((self.item.last_word, self.item.last_word_is_fill()));
                }
                if words.is_empty() {
                    return Ok(false);
                }
                self.batch = BatchWords::from_words(&words);
                return Ok(true);
            }
            self.cur_page = None;
            return Ok(false);
        }
    }
}
