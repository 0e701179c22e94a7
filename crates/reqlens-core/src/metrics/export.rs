//! Snapshot types and the stable text export.
//!
//! The text follows the Prometheus exposition format (version 0.0.4): a
//! `# HELP`/`# TYPE` header per instrument, then one line per series with
//! labels in declared order. Histogram buckets are cumulative and their `le`
//! bounds are integers in the instrument's base unit.

use std::fmt::Write;
use std::sync::Arc;

use super::instrument::Instrument;
use super::labels::LabelSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramValue {
    /// `(upper bound, cumulative count)` pairs in ascending order.
    pub buckets: Vec<(u64, u64)>,
    pub count: u64,
    pub sum: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatedValue {
    Counter(u64),
    Histogram(HistogramValue),
}

/// One exported series: instrument, label set, aggregated value.
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub instrument: Arc<Instrument>,
    pub labels: LabelSet,
    pub value: AggregatedValue,
}

// backslash, double quote and newline are the only escapes in a label value
fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

fn label_pairs(labels: &LabelSet) -> Vec<String> {
    labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect()
}

fn braces(pairs: &[String]) -> String {
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

/// Render series in the text exposition format.
///
/// Series of the same instrument must be adjacent, which is how
/// `MetricRegistry::snapshot` orders them.
pub fn render_text(series: &[SeriesSnapshot]) -> String {
    let mut out = String::new();
    let mut current: Option<&str> = None;

    for s in series {
        let name = s.instrument.name();
        if current != Some(name) {
            if !s.instrument.help().is_empty() {
                let _ = writeln!(out, "# HELP {} {}", name, escape_help(s.instrument.help()));
            }
            let _ = writeln!(out, "# TYPE {} {}", name, s.instrument.kind().as_str());
            current = Some(name);
        }

        let pairs = label_pairs(&s.labels);
        match &s.value {
            AggregatedValue::Counter(v) => {
                let _ = writeln!(out, "{}{} {}", name, braces(&pairs), v);
            }
            AggregatedValue::Histogram(h) => {
                for (le, count) in &h.buckets {
                    let mut with_le = pairs.clone();
                    with_le.push(format!("le=\"{}\"", le));
                    let _ = writeln!(out, "{}_bucket{} {}", name, braces(&with_le), count);
                }
                let mut inf = pairs.clone();
                inf.push("le=\"+Inf\"".to_string());
                let _ = writeln!(out, "{}_bucket{} {}", name, braces(&inf), h.count);
                let _ = writeln!(out, "{}_sum{} {}", name, braces(&pairs), h.sum);
                let _ = writeln!(out, "{}_count{} {}", name, braces(&pairs), h.count);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }

    #[test]
    fn unlabeled_series_render_without_braces() {
        let s = SeriesSnapshot {
            instrument: Arc::new(Instrument::counter("up_total", "")),
            labels: LabelSet::new(),
            value: AggregatedValue::Counter(3),
        };
        assert_eq!(render_text(&[s]), "# TYPE up_total counter\nup_total 3\n");
    }
}
