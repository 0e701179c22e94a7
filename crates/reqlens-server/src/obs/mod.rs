//! Request-level instruments on top of the core registry.
//!
//! The registry itself lives in `reqlens-core`; this module fixes the HTTP
//! instrument names and the bounded label vocabularies the middleware emits.
//! [`heap`] holds the allocator counters behind the heap profile route.

pub mod heap;
pub mod metrics;

pub use heap::{CountingAlloc, HeapDelta, HeapStats};
pub use metrics::{method_label, HttpMetrics, StatusClass};
