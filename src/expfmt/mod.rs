//! Prometheus/OpenMetrics exposition text handling.
//!
//! One canonical data model and parser is used for every metric source in
//! the pipeline, including the synthetic container-stat families that are
//! generated as text and parsed back.

pub mod encode;
pub mod parse;

pub use parse::{parse_text, ParseError};

/// Exposition metric family types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    Untyped,
}

impl MetricType {
    /// The type keyword used in OpenMetrics `# TYPE` lines.
    pub fn as_openmetrics(self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Untyped => "unknown",
        }
    }
}

/// A single exposition sample: label pairs in source order, a value, and an
/// optional timestamp in milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: Vec<(String, String)>,
    pub value: f64,
    pub timestamp_ms: Option<i64>,
}

/// A named, typed group of samples. Identity is the name; sample order is
/// preserved from the source text through serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricType,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    /// Overwrite every sample timestamp with the given collection instant.
    ///
    /// Timestamps reported by the source itself are intentionally discarded;
    /// the snapshot records when *we* observed the value.
    pub fn stamp(&mut self, timestamp_ms: i64) {
        for sample in &mut self.samples {
            sample.timestamp_ms = Some(timestamp_ms);
        }
    }
}
