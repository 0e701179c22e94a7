//! In-process metric registry.
//!
//! Instruments (counters and histograms) are registered once on a
//! [`MetricRegistry`] and observed through the returned [`InstrumentHandle`].
//! Each instrument keeps one accumulator per label combination ("series") in
//! a `DashMap`. Counters are plain atomics. Each histogram series sits behind
//! its own mutex, so a snapshot never sees half of an observation.
//!
//! Values are unsigned integers in the instrument's base unit. Durations are
//! recorded in microseconds and the unit is carried in the metric name.

pub mod export;
pub mod instrument;
pub mod labels;
pub mod registry;

pub use export::{render_text, AggregatedValue, HistogramValue, SeriesSnapshot};
pub use instrument::{Instrument, InstrumentKind, DEFAULT_SERIES_LIMIT, DURATION_BUCKETS_MICROS};
pub use labels::LabelSet;
pub use registry::{InstrumentHandle, MetricRegistry};
