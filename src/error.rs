use crate::types::Rid;
use thiserror::Error;

/// Custom error type for bitmap index operations.
#[derive(Error, Debug)]
pub enum BitmapError {
    /// Fatal caller mistake: building over a non-empty index, restoring a
    /// mark that was never set, operating on an uninitialized index.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// RID appended out of order to a LOV item. RIDs must arrive strictly
    /// increasing per item.
    #[error("RID appended out of order: last={last}, got={got}")]
    OutOfOrderRid { last: Rid, got: Rid },

    /// Structural damage detected on decode (header/content word-count
    /// mismatch, bad page kind, bad checksum). Never silently repaired.
    #[error("Corruption detected: {details}")]
    Corrupted { details: String },

    /// A looked-up value has no LOV entry. Recoverable: scans treat this as
    /// "zero matching RIDs".
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for BitmapError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        BitmapError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}
