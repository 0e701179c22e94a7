//! Instrument descriptors.

/// Series cap applied to every instrument unless overridden.
pub const DEFAULT_SERIES_LIMIT: usize = 10_000;

// Fixed buckets in microseconds (µs)
// 100us, 500us, 1ms, 5ms, 10ms, 50ms, 100ms, 500ms, 1s, 2.5s, 5s, 10s
pub const DURATION_BUCKETS_MICROS: [u64; 12] = [
    100, 500, 1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 2_500_000, 5_000_000,
    10_000_000,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentKind {
    Counter,
    /// Ascending, deduplicated upper bounds. `+Inf` is implicit.
    Histogram { buckets: Vec<u64> },
}

impl InstrumentKind {
    /// Name used on the `# TYPE` line.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Counter => "counter",
            InstrumentKind::Histogram { .. } => "histogram",
        }
    }
}

/// Descriptor of a named, typed accumulator.
///
/// Two descriptors have the same *shape* when kind (buckets included) and
/// label names match. Help text and series limit are not part of the shape.
#[derive(Debug, Clone)]
pub struct Instrument {
    name: String,
    help: String,
    kind: InstrumentKind,
    labels: Vec<String>,
    series_limit: usize,
}

impl Instrument {
    pub fn counter(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self::new(name.into(), help.into(), InstrumentKind::Counter)
    }

    pub fn histogram(name: impl Into<String>, help: impl Into<String>, buckets: &[u64]) -> Self {
        let mut buckets = buckets.to_vec();
        buckets.sort_unstable();
        buckets.dedup();
        Self::new(name.into(), help.into(), InstrumentKind::Histogram { buckets })
    }

    fn new(name: String, help: String, kind: InstrumentKind) -> Self {
        Self {
            name,
            help,
            kind,
            labels: Vec::new(),
            series_limit: DEFAULT_SERIES_LIMIT,
        }
    }

    /// Declare label names. Order is kept and used for rendering.
    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_series_limit(mut self, limit: usize) -> Self {
        self.series_limit = limit.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn kind(&self) -> &InstrumentKind {
        &self.kind
    }

    pub fn label_names(&self) -> &[String] {
        &self.labels
    }

    pub fn series_limit(&self) -> usize {
        self.series_limit
    }

    pub(crate) fn same_shape(&self, other: &Instrument) -> bool {
        self.kind == other.kind && self.labels == other.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_are_sorted_and_deduplicated() {
        let h = Instrument::histogram("h", "", &[500, 100, 500, 1_000]);
        assert_eq!(
            h.kind(),
            &InstrumentKind::Histogram {
                buckets: vec![100, 500, 1_000]
            }
        );
    }

    #[test]
    fn help_does_not_change_shape() {
        let a = Instrument::counter("c", "one").with_labels(&["route"]);
        let b = Instrument::counter("c", "two").with_labels(&["route"]);
        let c = Instrument::counter("c", "one").with_labels(&["method"]);
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }
}
