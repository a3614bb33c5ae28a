use std::path::PathBuf;
use std::sync::Arc;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not
/// acceptable for production. Callers can provide an implementation that
/// forwards these events to `tracing`, `log`, metrics, or custom sinks.
pub trait IndexEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: IndexEvent);
}

/// Structured events emitted by the index core.
#[derive(Debug, Clone)]
pub enum IndexEvent {
    BuildFinished {
        heap_tuples: u64,
        index_tuples: u64,
        distinct_values: u64,
    },
    VacuumRebuildFinished {
        heap_tuples: u64,
        num_pages: u64,
    },
    CatalogSnapshotWritten {
        path: PathBuf,
    },
    CatalogSnapshotFailed {
        error: String,
    },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl IndexEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: IndexEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn IndexEventListener> {
    Arc::new(NoopEventListener)
}
