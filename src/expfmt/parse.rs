//! Prometheus text-format parsing into typed metric families.
//!
//! Families are keyed by the exact sample-line name. Child series of a
//! declared histogram or summary (`<base>_bucket`, `<base>_sum`,
//! `<base>_count`) become their own families that inherit the base
//! declaration's type and help, which keeps name-based filtering an exact
//! string match while retaining type information.

use std::collections::HashMap;

use thiserror::Error;

use super::{MetricFamily, MetricType, Sample};

/// Errors that can occur while parsing exposition text.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("line {line}: malformed metadata comment {text:?}")]
    MalformedComment { line: usize, text: String },

    #[error("line {line}: unknown metric type {raw:?}")]
    UnknownMetricType { line: usize, raw: String },

    #[error("line {line}: malformed sample {text:?}")]
    MalformedSample { line: usize, text: String },

    #[error("line {line}: unterminated label set")]
    UnterminatedLabels { line: usize },

    #[error("line {line}: invalid sample value {raw:?}")]
    InvalidValue { line: usize, raw: String },

    #[error("line {line}: invalid timestamp {raw:?}")]
    InvalidTimestamp { line: usize, raw: String },
}

/// Parse a full exposition document into families in first-seen order.
///
/// Families left with no samples (dangling `# HELP`/`# TYPE` declarations,
/// including histogram/summary base declarations whose children were routed
/// to their own families) are dropped from the result.
pub fn parse_text(input: &str) -> Result<Vec<MetricFamily>, ParseError> {
    let mut parser = Parser::default();

    for (idx, raw) in input.lines().enumerate() {
        parser.feed_line(idx + 1, raw)?;
    }

    Ok(parser.finish())
}

#[derive(Default)]
struct Parser {
    families: Vec<MetricFamily>,
    index: HashMap<String, usize>,
}

impl Parser {
    fn feed_line(&mut self, line_no: usize, raw: &str) -> Result<(), ParseError> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(());
        }

        if let Some(rest) = line.strip_prefix('#') {
            return self.feed_comment(line_no, rest.trim_start());
        }

        self.feed_sample(line_no, line)
    }

    fn feed_comment(&mut self, line_no: usize, rest: &str) -> Result<(), ParseError> {
        if let Some(meta) = rest.strip_prefix("HELP") {
            let meta = meta.trim_start();
            let (name, help) = match meta.split_once(char::is_whitespace) {
                Some((name, help)) => (name, help.trim_start()),
                None => (meta, ""),
            };
            if !is_metric_name(name) {
                return Err(ParseError::MalformedComment {
                    line: line_no,
                    text: rest.to_string(),
                });
            }
            let idx = self.family_index(name);
            self.families[idx].help = unescape_help(help);
            return Ok(());
        }

        if let Some(meta) = rest.strip_prefix("TYPE") {
            let meta = meta.trim_start();
            let (name, raw_kind) = meta
                .split_once(char::is_whitespace)
                .ok_or_else(|| ParseError::MalformedComment {
                    line: line_no,
                    text: rest.to_string(),
                })?;
            if !is_metric_name(name) {
                return Err(ParseError::MalformedComment {
                    line: line_no,
                    text: rest.to_string(),
                });
            }
            let kind = match raw_kind.trim() {
                "counter" => MetricType::Counter,
                "gauge" => MetricType::Gauge,
                "histogram" => MetricType::Histogram,
                "summary" => MetricType::Summary,
                "untyped" | "unknown" => MetricType::Untyped,
                other => {
                    return Err(ParseError::UnknownMetricType {
                        line: line_no,
                        raw: other.to_string(),
                    })
                }
            };
            let idx = self.family_index(name);
            self.families[idx].kind = kind;
            return Ok(());
        }

        // Free-form comments (and the "# EOF" marker of OpenMetrics inputs)
        // carry no data.
        Ok(())
    }

    fn feed_sample(&mut self, line_no: usize, line: &str) -> Result<(), ParseError> {
        let name_end = line
            .find(|c: char| c == '{' || c.is_whitespace())
            .unwrap_or(line.len());
        let name = &line[..name_end];
        if !is_metric_name(name) {
            return Err(ParseError::MalformedSample {
                line: line_no,
                text: line.to_string(),
            });
        }

        let mut rest = &line[name_end..];
        let mut labels = Vec::new();
        if rest.starts_with('{') {
            let (parsed, remainder) = parse_labels(line_no, rest)?;
            labels = parsed;
            rest = remainder;
        }

        let mut parts = rest.split_whitespace();
        let raw_value = parts.next().ok_or_else(|| ParseError::MalformedSample {
            line: line_no,
            text: line.to_string(),
        })?;
        let value: f64 = raw_value.parse().map_err(|_| ParseError::InvalidValue {
            line: line_no,
            raw: raw_value.to_string(),
        })?;

        let timestamp_ms = match parts.next() {
            Some(raw) => Some(parse_timestamp_ms(line_no, raw)?),
            None => None,
        };

        if parts.next().is_some() {
            return Err(ParseError::MalformedSample {
                line: line_no,
                text: line.to_string(),
            });
        }

        let idx = self.resolve_sample_family(name);
        self.families[idx].samples.push(Sample {
            labels,
            value,
            timestamp_ms,
        });

        Ok(())
    }

    /// Index of the family a sample line belongs to, creating it on first use.
    ///
    /// An exact name match always wins. Otherwise a `_bucket`/`_sum`/`_count`
    /// suffix of a declared histogram (or `_sum`/`_count` of a summary)
    /// creates a child family inheriting the base declaration.
    fn resolve_sample_family(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }

        if let Some((kind, help)) = self.inherited_declaration(name) {
            let idx = self.push_family(name);
            self.families[idx].kind = kind;
            self.families[idx].help = help;
            return idx;
        }

        self.family_index(name)
    }

    fn inherited_declaration(&self, name: &str) -> Option<(MetricType, String)> {
        for suffix in ["_bucket", "_sum", "_count", "_total"] {
            let Some(base) = name.strip_suffix(suffix) else {
                continue;
            };
            let Some(&base_idx) = self.index.get(base) else {
                continue;
            };
            let base_family = &self.families[base_idx];
            match base_family.kind {
                MetricType::Histogram if suffix != "_total" => {
                    return Some((MetricType::Histogram, base_family.help.clone()))
                }
                MetricType::Summary if suffix == "_sum" || suffix == "_count" => {
                    return Some((MetricType::Summary, base_family.help.clone()))
                }
                // OpenMetrics counters declare the base name and sample the
                // `_total` series.
                MetricType::Counter if suffix == "_total" => {
                    return Some((MetricType::Counter, base_family.help.clone()))
                }
                _ => {}
            }
        }
        None
    }

    fn family_index(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        self.push_family(name)
    }

    fn push_family(&mut self, name: &str) -> usize {
        let idx = self.families.len();
        self.families.push(MetricFamily {
            name: name.to_string(),
            help: String::new(),
            kind: MetricType::Untyped,
            samples: Vec::new(),
        });
        self.index.insert(name.to_string(), idx);
        idx
    }

    fn finish(self) -> Vec<MetricFamily> {
        self.families
            .into_iter()
            .filter(|f| !f.samples.is_empty())
            .collect()
    }
}

/// Parse a sample timestamp into epoch milliseconds. Prometheus text
/// carries integer milliseconds; the OpenMetrics variant carries epoch
/// seconds with a fractional part. Both are accepted.
fn parse_timestamp_ms(line_no: usize, raw: &str) -> Result<i64, ParseError> {
    if !raw.contains('.') {
        return raw.parse::<i64>().map_err(|_| ParseError::InvalidTimestamp {
            line: line_no,
            raw: raw.to_string(),
        });
    }

    let seconds: f64 = raw.parse().map_err(|_| ParseError::InvalidTimestamp {
        line: line_no,
        raw: raw.to_string(),
    })?;
    Ok((seconds * 1000.0).round() as i64)
}

/// Parse a `{name="value",...}` label block, returning the pairs and the
/// text following the closing brace.
fn parse_labels<'a>(
    line_no: usize,
    block: &'a str,
) -> Result<(Vec<(String, String)>, &'a str), ParseError> {
    let mut rest = &block[1..];
    let mut labels = Vec::new();

    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let eq = rest
            .find('=')
            .ok_or(ParseError::UnterminatedLabels { line: line_no })?;
        let name = rest[..eq].trim();
        if !is_label_name(name) {
            return Err(ParseError::MalformedSample {
                line: line_no,
                text: block.to_string(),
            });
        }

        let quoted = rest[eq + 1..].trim_start();
        let quoted = quoted
            .strip_prefix('"')
            .ok_or(ParseError::UnterminatedLabels { line: line_no })?;
        let (value, after) = read_quoted(line_no, quoted)?;
        labels.push((name.to_string(), value));

        rest = after.trim_start();
        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma;
        }
    }
}

/// Read an escaped label value up to its closing quote.
fn read_quoted<'a>(line_no: usize, s: &'a str) -> Result<(String, &'a str), ParseError> {
    let mut out = String::new();
    let mut chars = s.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, &s[i + 1..])),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, '\\')) => out.push('\\'),
                Some((_, '"')) => out.push('"'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => break,
            },
            _ => out.push(c),
        }
    }

    Err(ParseError::UnterminatedLabels { line: line_no })
}

fn unescape_help(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_' || first == ':') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_gauge() {
        let text = "# HELP up Whether the target is up.\n# TYPE up gauge\nup 1\n";
        let families = parse_text(text).expect("parse");

        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "up");
        assert_eq!(families[0].help, "Whether the target is up.");
        assert_eq!(families[0].kind, MetricType::Gauge);
        assert_eq!(families[0].samples.len(), 1);
        assert_eq!(families[0].samples[0].value, 1.0);
        assert_eq!(families[0].samples[0].timestamp_ms, None);
    }

    #[test]
    fn test_parse_labels_and_timestamp() {
        let text = "milvus_proxy_req_count{function_name=\"Search\",status=\"success\"} 42 1700000000123\n";
        let families = parse_text(text).expect("parse");

        assert_eq!(families.len(), 1);
        let sample = &families[0].samples[0];
        assert_eq!(
            sample.labels,
            vec![
                ("function_name".to_string(), "Search".to_string()),
                ("status".to_string(), "success".to_string()),
            ]
        );
        assert_eq!(sample.value, 42.0);
        assert_eq!(sample.timestamp_ms, Some(1_700_000_000_123));
    }

    #[test]
    fn test_parse_escaped_label_value() {
        let text = "m{path=\"a\\\\b\\\"c\\nd\"} 1\n";
        let families = parse_text(text).expect("parse");
        assert_eq!(families[0].samples[0].labels[0].1, "a\\b\"c\nd");
    }

    #[test]
    fn test_histogram_children_inherit_declared_type() {
        let text = "\
# HELP milvus_proxy_sq_latency Search latency.
# TYPE milvus_proxy_sq_latency histogram
milvus_proxy_sq_latency_bucket{le=\"1\"} 3
milvus_proxy_sq_latency_bucket{le=\"+Inf\"} 5
milvus_proxy_sq_latency_sum 12.5
milvus_proxy_sq_latency_count 5
";
        let families = parse_text(text).expect("parse");

        // The sample-less base declaration is dropped; the three child
        // families keep their exact names and the declared type.
        assert_eq!(families.len(), 3);
        assert_eq!(families[0].name, "milvus_proxy_sq_latency_bucket");
        assert_eq!(families[0].kind, MetricType::Histogram);
        assert_eq!(families[0].help, "Search latency.");
        assert_eq!(families[0].samples.len(), 2);
        assert_eq!(families[1].name, "milvus_proxy_sq_latency_sum");
        assert_eq!(families[2].name, "milvus_proxy_sq_latency_count");
        assert_eq!(families[2].samples[0].value, 5.0);
    }

    #[test]
    fn test_count_suffix_without_declared_base_is_standalone() {
        let text = "# TYPE milvus_proxy_req_count counter\nmilvus_proxy_req_count 7\n";
        let families = parse_text(text).expect("parse");

        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "milvus_proxy_req_count");
        assert_eq!(families[0].kind, MetricType::Counter);
    }

    #[test]
    fn test_total_suffix_inherits_declared_counter() {
        let text = "\
# HELP container_cpu_usage_seconds Cumulative cpu time consumed in seconds.
# TYPE container_cpu_usage_seconds counter
container_cpu_usage_seconds_total{pod=\"w1\"} 1 1700000000.123
";
        let families = parse_text(text).expect("parse");

        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "container_cpu_usage_seconds_total");
        assert_eq!(families[0].kind, MetricType::Counter);
        assert_eq!(families[0].samples[0].timestamp_ms, Some(1_700_000_000_123));
    }

    #[test]
    fn test_special_values() {
        let text = "a 0.5\nb +Inf\nc -Inf\nd NaN\n";
        let families = parse_text(text).expect("parse");

        assert_eq!(families[0].samples[0].value, 0.5);
        assert_eq!(families[1].samples[0].value, f64::INFINITY);
        assert_eq!(families[2].samples[0].value, f64::NEG_INFINITY);
        assert!(families[3].samples[0].value.is_nan());
    }

    #[test]
    fn test_family_order_is_first_seen() {
        let text = "b 1\na 2\nb 3\n";
        let families = parse_text(text).expect("parse");

        assert_eq!(families.len(), 2);
        assert_eq!(families[0].name, "b");
        assert_eq!(families[0].samples.len(), 2);
        assert_eq!(families[1].name, "a");
    }

    #[test]
    fn test_free_comments_and_blank_lines_skipped() {
        let text = "\n# just a comment\n# EOF\nx 1\n";
        let families = parse_text(text).expect("parse");
        assert_eq!(families.len(), 1);
    }

    #[test]
    fn test_malformed_sample_is_error() {
        assert!(parse_text("no-value-here\n").is_err());
        assert!(parse_text("{x=\"y\"} 1\n").is_err());
        assert!(parse_text("m 1 2 3\n").is_err());
    }

    #[test]
    fn test_unterminated_labels_is_error() {
        let err = parse_text("m{x=\"y\" 1\n").expect_err("should fail");
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_seconds_timestamp_accepted() {
        let families = parse_text("m 1 1700000000.123\n").expect("parse");
        assert_eq!(families[0].samples[0].timestamp_ms, Some(1_700_000_000_123));
    }

    #[test]
    fn test_invalid_value_and_timestamp() {
        assert!(parse_text("m abc\n").is_err());
        assert!(parse_text("m 1 notatime\n").is_err());
    }

    #[test]
    fn test_unknown_type_is_error() {
        assert!(parse_text("# TYPE m widget\n").is_err());
    }

    #[test]
    fn test_declaration_without_samples_dropped() {
        let text = "# HELP lonely no samples follow\n# TYPE lonely gauge\n";
        let families = parse_text(text).expect("parse");
        assert!(families.is_empty());
    }
}
