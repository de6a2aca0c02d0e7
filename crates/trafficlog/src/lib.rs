//! JSON-lines record of interpreter traffic.
//!
//! One line per frame: `{"direction":"inbound","timestamp_ms":..,"payload":".."}`.
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
    sync::Mutex,
    time::UNIX_EPOCH,
};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use transport::{Direction, TrafficObserver, TrafficRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub direction: String,
    pub timestamp_ms: u64,
    pub payload: String,
}

impl TrafficEntry {
    fn from_record(record: &TrafficRecord<'_>) -> Self {
        let timestamp_ms = record
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            direction: record.direction.as_str().to_string(),
            timestamp_ms,
            payload: record.payload.to_string(),
        }
    }

    pub fn is(&self, direction: Direction) -> bool {
        self.direction == direction.as_str()
    }

    /// The payload as JSON, or as a string if it is not JSON.
    pub fn message(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload)
            .unwrap_or_else(|_| serde_json::Value::String(self.payload.clone()))
    }
}

/// Appends every observed frame to a writer, one JSON object per line.
pub struct JsonLinesObserver {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesObserver {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    /// Truncates `path`.
    pub fn create(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let file = File::create(path.as_ref()).context("creating traffic log")?;
        Ok(Self::new(BufWriter::new(file)))
    }

    fn write_entry(&self, entry: &TrafficEntry) -> eyre::Result<()> {
        let line = serde_json::to_string(entry).context("serializing traffic entry")?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| eyre::eyre!("traffic log mutex poisoned"))?;
        writeln!(out, "{line}").context("writing traffic entry")?;
        out.flush().context("flushing traffic log")
    }
}

impl TrafficObserver for JsonLinesObserver {
    fn observe(&self, record: &TrafficRecord<'_>) {
        if let Err(e) = self.write_entry(&TrafficEntry::from_record(record)) {
            tracing::warn!(error = %e, "dropping traffic record");
        }
    }
}

/// Every well-formed entry in the log at `path`. Malformed lines are skipped.
pub fn read_log(path: impl AsRef<Path>) -> eyre::Result<Vec<TrafficEntry>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_entries(BufReader::new(file))
}

pub fn parse_entries(input: impl BufRead) -> eyre::Result<Vec<TrafficEntry>> {
    let mut result = Vec::new();
    for (i, line) in input.lines().enumerate() {
        let line = line.context("reading traffic log")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => result.push(entry),
            Err(e) => tracing::warn!(line = i + 1, error = %e, "invalid traffic entry"),
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use rstest::rstest;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn record(direction: Direction, payload: &str) -> TrafficRecord<'_> {
        TrafficRecord {
            direction,
            timestamp: UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
            payload,
        }
    }

    #[test]
    fn observed_frames_become_lines() {
        let buf = SharedBuf::default();
        let observer = JsonLinesObserver::new(buf.clone());
        observer.observe(&record(Direction::Outbound, r#"["GetThreads",{}]"#));
        observer.observe(&record(Direction::Inbound, "SupportedProtocols=2"));

        let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let entries = parse_entries(Cursor::new(written)).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is(Direction::Outbound));
        assert_eq!(entries[0].timestamp_ms, 1_700_000_000_123);
        assert_eq!(entries[1].payload, "SupportedProtocols=2");
    }

    #[rstest]
    #[case(r#"["SetPromptType",{"type":1}]"#, serde_json::json!(["SetPromptType", {"type": 1}]))]
    #[case("UsingProtocol=2", serde_json::json!("UsingProtocol=2"))]
    fn message_decodes_json_payloads(#[case] payload: &str, #[case] expected: serde_json::Value) {
        let entry = TrafficEntry {
            direction: "inbound".to_string(),
            timestamp_ms: 0,
            payload: payload.to_string(),
        };
        assert_eq!(entry.message(), expected);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let input = "not json\n\n{\"direction\":\"inbound\",\"timestamp_ms\":1,\"payload\":\"x\"}\n";
        let entries = parse_entries(Cursor::new(input)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload, "x");
    }

    #[test]
    fn log_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traffic.jsonl");
        let observer = JsonLinesObserver::create(&path).unwrap();
        observer.observe(&TrafficRecord {
            direction: Direction::Inbound,
            timestamp: SystemTime::now(),
            payload: r#"["ReplyGetThreads",{"threads":[]}]"#,
        });
        drop(observer);

        let entries = read_log(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is(Direction::Inbound));
    }
}
