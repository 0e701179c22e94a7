//! Process-scoped registry of instruments and their accumulators.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;

use crate::error::{ReqlensError, Result};

use super::export::{AggregatedValue, HistogramValue, SeriesSnapshot};
use super::instrument::{Instrument, InstrumentKind};
use super::labels::LabelSet;

struct HistogramState {
    /// Per-bucket (non cumulative) counts; overflow only shows up in `count`.
    buckets: Vec<u64>,
    count: u64,
    sum: u64,
}

enum Accumulator {
    Counter(AtomicU64),
    Histogram(Mutex<HistogramState>),
}

impl Accumulator {
    fn new(kind: &InstrumentKind) -> Self {
        match kind {
            InstrumentKind::Counter => Accumulator::Counter(AtomicU64::new(0)),
            InstrumentKind::Histogram { buckets } => Accumulator::Histogram(Mutex::new(HistogramState {
                buckets: vec![0; buckets.len()],
                count: 0,
                sum: 0,
            })),
        }
    }

    fn apply(&self, kind: &InstrumentKind, value: u64) {
        match (self, kind) {
            (Accumulator::Counter(c), _) => {
                c.fetch_add(value, Ordering::Relaxed);
            }
            (Accumulator::Histogram(h), InstrumentKind::Histogram { buckets }) => {
                let mut state = h.lock().unwrap_or_else(PoisonError::into_inner);
                state.count += 1;
                state.sum = state.sum.saturating_add(value);
                if let Some(i) = buckets.iter().position(|&b| value <= b) {
                    state.buckets[i] += 1;
                }
            }
            // Accumulators are built from the same kind they are applied with.
            (Accumulator::Histogram(_), InstrumentKind::Counter) => {}
        }
    }

    fn read(&self, kind: &InstrumentKind) -> AggregatedValue {
        match (self, kind) {
            (Accumulator::Counter(c), _) => AggregatedValue::Counter(c.load(Ordering::Relaxed)),
            (Accumulator::Histogram(h), InstrumentKind::Histogram { buckets }) => {
                let state = h.lock().unwrap_or_else(PoisonError::into_inner);
                let mut cumulative = 0;
                let buckets = buckets
                    .iter()
                    .zip(state.buckets.iter())
                    .map(|(&le, &n)| {
                        cumulative += n;
                        (le, cumulative)
                    })
                    .collect();
                AggregatedValue::Histogram(HistogramValue {
                    buckets,
                    count: state.count,
                    sum: state.sum,
                })
            }
            (Accumulator::Histogram(_), InstrumentKind::Counter) => AggregatedValue::Counter(0),
        }
    }
}

struct InstrumentCell {
    desc: Arc<Instrument>,
    series: DashMap<Box<[String]>, Accumulator>,
}

impl InstrumentCell {
    fn observe(&self, value: u64, labels: &LabelSet) -> Result<()> {
        let desc = &self.desc;
        let key = labels
            .values_in_order(desc.label_names())
            .ok_or_else(|| ReqlensError::LabelMismatch {
                instrument: desc.name().to_string(),
                expected: desc.label_names().join(","),
                got: labels.names(),
            })?;

        if let Some(acc) = self.series.get(&key[..]) {
            acc.apply(desc.kind(), value);
            return Ok(());
        }

        if self.series.len() >= desc.series_limit() {
            return Err(ReqlensError::CardinalityExceeded {
                instrument: desc.name().to_string(),
                limit: desc.series_limit(),
            });
        }

        self.series
            .entry(key.into_boxed_slice())
            .or_insert_with(|| Accumulator::new(desc.kind()))
            .apply(desc.kind(), value);
        Ok(())
    }

    fn value(&self, labels: &LabelSet) -> Option<AggregatedValue> {
        let key = labels.values_in_order(self.desc.label_names())?;
        self.series
            .get(&key[..])
            .map(|acc| acc.read(self.desc.kind()))
    }

    fn snapshot_into(&self, out: &mut Vec<SeriesSnapshot>) {
        let mut rows: Vec<(Box<[String]>, AggregatedValue)> = self
            .series
            .iter()
            .map(|r| (r.key().clone(), r.value().read(self.desc.kind())))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        for (values, value) in rows {
            let labels = self
                .desc
                .label_names()
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect();
            out.push(SeriesSnapshot {
                instrument: Arc::clone(&self.desc),
                labels,
                value,
            });
        }
    }
}

/// Handle to a registered instrument.
///
/// Cheap to clone; observing through a handle does not touch the registry.
#[derive(Clone)]
pub struct InstrumentHandle {
    cell: Arc<InstrumentCell>,
}

impl InstrumentHandle {
    pub fn instrument(&self) -> &Instrument {
        &self.cell.desc
    }

    /// Apply one sample. See [`MetricRegistry::observe`].
    pub fn observe(&self, value: u64, labels: &LabelSet) -> Result<()> {
        self.cell.observe(value, labels)
    }

    /// Current value of one series, if it has been observed.
    pub fn value(&self, labels: &LabelSet) -> Option<AggregatedValue> {
        self.cell.value(labels)
    }

    /// Number of distinct label combinations seen so far.
    pub fn series_count(&self) -> usize {
        self.cell.series.len()
    }
}

impl std::fmt::Debug for InstrumentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentHandle")
            .field("name", &self.cell.desc.name())
            .finish()
    }
}

/// Append-only set of instruments.
///
/// Construct one per process (or per test) and share it via `Arc`.
#[derive(Default)]
pub struct MetricRegistry {
    instruments: RwLock<Vec<Arc<InstrumentCell>>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instrument, or return the existing handle when an
    /// instrument with the same name and shape is already registered.
    pub fn register(&self, instrument: Instrument) -> Result<InstrumentHandle> {
        let mut instruments = self
            .instruments
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = instruments
            .iter()
            .find(|c| c.desc.name() == instrument.name())
        {
            if !existing.desc.same_shape(&instrument) {
                return Err(ReqlensError::RegistrationConflict {
                    name: instrument.name().to_string(),
                });
            }
            return Ok(InstrumentHandle {
                cell: Arc::clone(existing),
            });
        }

        tracing::debug!(
            name = instrument.name(),
            kind = instrument.kind().as_str(),
            "instrument registered"
        );
        let cell = Arc::new(InstrumentCell {
            desc: Arc::new(instrument),
            series: DashMap::new(),
        });
        instruments.push(Arc::clone(&cell));
        Ok(InstrumentHandle { cell })
    }

    /// Apply one sample to `handle`.
    ///
    /// Fails with `LabelMismatch` when the label names differ from the
    /// declared ones, and with `CardinalityExceeded` when a new series would
    /// exceed the instrument's limit.
    pub fn observe(&self, handle: &InstrumentHandle, value: u64, labels: &LabelSet) -> Result<()> {
        handle.observe(value, labels)
    }

    /// Look up a registered instrument by name.
    pub fn get(&self, name: &str) -> Option<InstrumentHandle> {
        self.instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.desc.name() == name)
            .map(|cell| InstrumentHandle {
                cell: Arc::clone(cell),
            })
    }

    pub fn len(&self) -> usize {
        self.instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All series, instruments in registration order, series sorted by label values.
    pub fn snapshot(&self) -> Vec<SeriesSnapshot> {
        // Release the registry lock before walking the series maps.
        let cells: Vec<Arc<InstrumentCell>> = self
            .instruments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut out = Vec::new();
        for cell in &cells {
            cell.snapshot_into(&mut out);
        }
        out
    }

    /// Render the current snapshot in the text exposition format.
    pub fn render(&self) -> String {
        super::export::render_text(&self.snapshot())
    }
}
