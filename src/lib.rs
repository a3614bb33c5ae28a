#![doc = include_str!("../README.md")]
// Declare modules
pub mod build;
pub mod core;
pub mod encoding;
pub mod error;
pub mod lov;
pub mod pages;
pub mod scan;
pub mod storage;
pub mod table;
pub mod telemetry;
pub mod types;
pub mod vector;

/// Result of a bulk build or rebuild.
pub use crate::build::BuildStats;
/// Main entry point: the on-disk bitmap index.
pub use crate::core::BitmapIndex;
/// Configuration options for a bitmap index.
pub use crate::core::IndexConfig;
/// Post-vacuum statistics.
pub use crate::core::VacuumStats;
/// Error type for index operations.
pub use crate::error::BitmapError;
/// Scan predicate over indexed value combinations.
pub use crate::scan::Predicate;
/// One index scan with mark/restore support.
pub use crate::scan::Scan;
/// Scan direction.
pub use crate::scan::ScanDirection;
/// Durable page store over a single file of checksummed 8 KiB pages.
pub use crate::storage::FilePageStore;
/// Volatile page store for tests and ephemeral indexes.
pub use crate::storage::MemoryPageStore;
/// Page allocation/fetch boundary the core runs against.
pub use crate::storage::PageStore;
/// Host-table boundary used by builds.
pub use crate::table::HostTable;
/// Simple in-memory host table.
pub use crate::table::MemTable;
/// Structured event hook for observability.
pub use crate::telemetry::{IndexEvent, IndexEventListener};
/// One indexed attribute value.
pub use crate::types::Datum;
/// Row identifier in the host table.
pub use crate::types::Rid;
