use serde::{Deserialize, Serialize};

/// Row identifier in the host table. RIDs are 1-based; RID 0 is reserved
/// and never valid as an argument. Bit position of RID `r` within a bitmap
/// vector is `r - 1`.
pub type Rid = u64;

/// One machine word of a bitmap vector, literal or fill. Whether a word is
/// a fill is recorded in the header stream, not in the word's own bits.
pub type Word = u64;

/// Page number within the index relation (block-number style addressing).
pub type PageId = u32;

/// Sentinel for "no page" in next-page links and head/tail pointers.
pub const INVALID_PAGE: PageId = PageId::MAX;

/// The meta page always lives at block 0.
pub const META_PAGE: PageId = 0;

/// The first LOV page always lives at block 1; the NULL placeholder item
/// occupies offset 0 on it.
pub const LOV_START_PAGE: PageId = 1;

/// One indexed attribute value. Multi-column support stores one bitmap per
/// distinct value *combination*, so LOV keys are `Vec<Datum>`.
///
/// `Null` sorts before everything else; a key that is all-null is never
/// stored in the catalog and resolves to the fixed placeholder item instead.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }
}

/// The values of one host-table row, one `Datum` per indexed column.
pub type RowValues = Vec<Datum>;

/// Key of one LOV entry: the distinct value combination it indexes.
pub type LovKey = Vec<Datum>;

/// Location of a LOV item record: page number plus item slot on that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LovHandle {
    pub page: PageId,
    pub offset: u16,
}

impl LovHandle {
    /// Fixed location of the NULL placeholder item, present in every index.
    pub const NULL_PLACEHOLDER: LovHandle = LovHandle {
        page: LOV_START_PAGE,
        offset: 0,
    };
}

pub fn all_null(values: &[Datum]) -> bool {
    values.iter().all(Datum::is_null)
}
