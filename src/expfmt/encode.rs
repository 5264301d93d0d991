//! OpenMetrics text serialization.
//!
//! Matches the reference OpenMetrics conversion for counter naming: the
//! `# HELP`/`# TYPE` lines drop a trailing `_total`, while every counter
//! sample line carries it. Timestamps are rendered as epoch seconds with
//! millisecond precision.

use std::fmt::Write;

use super::{MetricFamily, MetricType};

/// End-of-stream marker required by the OpenMetrics format. Written exactly
/// once, after the last family.
pub const EOF: &str = "# EOF\n";

/// Append one family to `out` in OpenMetrics text form.
pub fn write_family(out: &mut String, family: &MetricFamily) {
    let metric_name = compliant_name(family);

    if !family.help.is_empty() {
        out.push_str("# HELP ");
        out.push_str(metric_name);
        out.push(' ');
        escape_text(out, &family.help);
        out.push('\n');
    }

    out.push_str("# TYPE ");
    out.push_str(metric_name);
    out.push(' ');
    out.push_str(family.kind.as_openmetrics());
    out.push('\n');

    for sample in &family.samples {
        out.push_str(metric_name);
        if family.kind == MetricType::Counter {
            out.push_str("_total");
        }

        if !sample.labels.is_empty() {
            out.push('{');
            for (i, (name, value)) in sample.labels.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(name);
                out.push_str("=\"");
                escape_label_value(out, value);
                out.push('"');
            }
            out.push('}');
        }

        out.push(' ');
        write_value(out, sample.value);

        if let Some(ts) = sample.timestamp_ms {
            out.push(' ');
            write_timestamp(out, ts);
        }

        out.push('\n');
    }
}

/// The metric name used on HELP/TYPE lines: counters drop a trailing
/// `_total` because sample lines re-append it.
fn compliant_name(family: &MetricFamily) -> &str {
    if family.kind == MetricType::Counter {
        if let Some(base) = family.name.strip_suffix("_total") {
            return base;
        }
    }
    &family.name
}

fn write_value(out: &mut String, value: f64) {
    if value.is_nan() {
        out.push_str("NaN");
    } else if value == f64::INFINITY {
        out.push_str("+Inf");
    } else if value == f64::NEG_INFINITY {
        out.push_str("-Inf");
    } else {
        let _ = write!(out, "{value}");
    }
}

/// Millisecond epoch timestamp as OpenMetrics epoch seconds.
fn write_timestamp(out: &mut String, timestamp_ms: i64) {
    let secs = timestamp_ms.div_euclid(1000);
    let millis = timestamp_ms.rem_euclid(1000);
    let _ = write!(out, "{secs}.{millis:03}");
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
}

fn escape_label_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expfmt::{parse_text, Sample};

    fn family(name: &str, kind: MetricType, samples: Vec<Sample>) -> MetricFamily {
        MetricFamily {
            name: name.to_string(),
            help: String::new(),
            kind,
            samples,
        }
    }

    fn sample(labels: &[(&str, &str)], value: f64, timestamp_ms: Option<i64>) -> Sample {
        Sample {
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value,
            timestamp_ms,
        }
    }

    #[test]
    fn test_gauge_with_labels_and_timestamp() {
        let mut out = String::new();
        let mut f = family(
            "container_memory_working_set_bytes",
            MetricType::Gauge,
            vec![sample(&[("pod", "w1")], 400.0, Some(1_700_000_000_123))],
        );
        f.help = "Current working set in bytes.".to_string();
        write_family(&mut out, &f);

        assert_eq!(
            out,
            "# HELP container_memory_working_set_bytes Current working set in bytes.\n\
             # TYPE container_memory_working_set_bytes gauge\n\
             container_memory_working_set_bytes{pod=\"w1\"} 400 1700000000.123\n"
        );
    }

    #[test]
    fn test_counter_total_suffix_handling() {
        let mut out = String::new();
        let f = family(
            "container_cpu_usage_seconds_total",
            MetricType::Counter,
            vec![sample(&[("pod", "w1")], 1.0, Some(1_000))],
        );
        write_family(&mut out, &f);

        assert_eq!(
            out,
            "# TYPE container_cpu_usage_seconds counter\n\
             container_cpu_usage_seconds_total{pod=\"w1\"} 1 1.000\n"
        );
    }

    #[test]
    fn test_counter_without_total_suffix_gains_one() {
        let mut out = String::new();
        let f = family(
            "milvus_proxy_req_count",
            MetricType::Counter,
            vec![sample(&[], 7.0, None)],
        );
        write_family(&mut out, &f);

        assert_eq!(
            out,
            "# TYPE milvus_proxy_req_count counter\nmilvus_proxy_req_count_total 7\n"
        );
    }

    #[test]
    fn test_untyped_renders_as_unknown() {
        let mut out = String::new();
        let f = family("x", MetricType::Untyped, vec![sample(&[], 2.5, None)]);
        write_family(&mut out, &f);

        assert_eq!(out, "# TYPE x unknown\nx 2.5\n");
    }

    #[test]
    fn test_special_values_rendered() {
        let mut out = String::new();
        let f = family(
            "x",
            MetricType::Gauge,
            vec![
                sample(&[], f64::INFINITY, None),
                sample(&[], f64::NEG_INFINITY, None),
                sample(&[], f64::NAN, None),
            ],
        );
        write_family(&mut out, &f);

        assert_eq!(out, "# TYPE x gauge\nx +Inf\nx -Inf\nx NaN\n");
    }

    #[test]
    fn test_label_value_escaping() {
        let mut out = String::new();
        let f = family(
            "x",
            MetricType::Gauge,
            vec![sample(&[("path", "a\\b\"c\nd")], 1.0, None)],
        );
        write_family(&mut out, &f);

        assert!(out.contains("x{path=\"a\\\\b\\\"c\\nd\"} 1\n"));
    }

    #[test]
    fn test_round_trip_preserves_identity() {
        let text = "\
# HELP milvus_rootcoord_time_tick_delay Delay in ms.
# TYPE milvus_rootcoord_time_tick_delay gauge
milvus_rootcoord_time_tick_delay{pod=\"p0\"} 3 1700000000123
milvus_rootcoord_time_tick_delay{pod=\"p1\"} 9 1700000000123
";
        let families = parse_text(text).expect("parse");
        let mut out = String::new();
        for f in &families {
            write_family(&mut out, f);
        }
        let reparsed = parse_text(&out).expect("reparse");

        assert_eq!(families, reparsed);
    }
}
