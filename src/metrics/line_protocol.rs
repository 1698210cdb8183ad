//! Text line protocol accepted by the time-series collector:
//! `measurement,tag=value,... field=value timestamp\n`

use std::borrow::Cow;
use std::fmt::Write as _;

use super::{Sample, Zone};

/// One queued point, serialized only when a batch is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Point {
    Function {
        timestamp_ms: i64,
        zone: Zone,
        rail: String,
        value: u64,
    },
    Heartbeat {
        timestamp_ms: i64,
        /// Milliseconds since the previous heartbeat
        value: u64,
    },
}

impl Point {
    pub fn heartbeat(timestamp_ms: i64, value: u64) -> Self {
        Self::Heartbeat {
            timestamp_ms,
            value,
        }
    }
}

impl From<&Sample> for Point {
    fn from(sample: &Sample) -> Self {
        Self::Function {
            timestamp_ms: sample.timestamp.timestamp_millis(),
            zone: sample.zone,
            rail: sample.label.clone(),
            value: sample.duration_ms,
        }
    }
}

/// Escape the characters that are structural inside a tag value.
pub fn escape_tag(value: &str) -> Cow<'_, str> {
    if !value.contains(|c: char| matches!(c, ',' | '=' | ' ')) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    Cow::Owned(out)
}

/// Append one newline-terminated record for `point` to `out`.
pub fn write_point(out: &mut String, server: &str, point: &Point) {
    let server = escape_tag(server);
    // Writing into a String cannot fail.
    let _ = match point {
        Point::Function {
            timestamp_ms,
            zone,
            rail,
            value,
        } => writeln!(
            out,
            "function,server={server},zone={zone},rail={} value={value} {timestamp_ms}",
            escape_tag(rail)
        ),
        Point::Heartbeat {
            timestamp_ms,
            value,
        } => writeln!(out, "heartbeat,server={server} value={value} {timestamp_ms}"),
    };
}

/// Serialize a batch into one payload.
pub fn encode_batch(server: &str, points: &[Point]) -> String {
    let mut out = String::with_capacity(points.len() * 64);
    for point in points {
        write_point(&mut out, server, point);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_record() {
        let point = Point::Function {
            timestamp_ms: 1_500_000_000_000,
            zone: Zone::Route,
            rail: "GET./".into(),
            value: 0,
        };
        assert_eq!(
            encode_batch("root", &[point]),
            "function,server=root,zone=route,rail=GET./ value=0 1500000000000\n"
        );
    }

    #[test]
    fn heartbeat_record() {
        let payload = encode_batch("edge", &[Point::heartbeat(42, 1000)]);
        assert_eq!(payload, "heartbeat,server=edge value=1000 42\n");
    }

    #[test]
    fn tag_values_are_escaped() {
        assert_eq!(escape_tag("plain"), "plain");
        assert_eq!(escape_tag("a b,c=d"), "a\\ b\\,c\\=d");

        let point = Point::Function {
            timestamp_ms: 1,
            zone: Zone::Layer,
            rail: "query parser.handle".into(),
            value: 3,
        };
        assert_eq!(
            encode_batch("my host", &[point]),
            "function,server=my\\ host,zone=layer,rail=query\\ parser.handle value=3 1\n"
        );
    }

    #[test]
    fn batch_keeps_order() {
        let points = vec![Point::heartbeat(1, 10), Point::heartbeat(2, 20)];
        let payload = encode_batch("root", &points);
        let lines: Vec<_> = payload.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" 1"));
        assert!(lines[1].ends_with(" 2"));
    }
}
