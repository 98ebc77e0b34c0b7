//! logtally metrics
//!
//! The shared, concurrency-safe store that programs write into.
//! Metrics are declared once with a fixed shape (kind, label keys, value
//! type, buckets); value cells are created lazily per label tuple and never
//! removed.

mod atomic;
pub mod error;
pub mod metric;
pub mod snapshot;
pub mod store;

pub use atomic::AtomicF64;
pub use error::{Result, StoreError};
pub use metric::{Kind, Metric, MetricDecl, Number, ValueType, DEFAULT_BUCKETS};
pub use snapshot::{CellSnapshot, CellValue, HistogramSnapshot, MetricSnapshot, Snapshot};
pub use store::Store;
