//! Output channel for SCHEMA, RECORD and STATE messages

use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::State;

/// One line of the output stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Schema {
        stream: String,
        schema: Value,
        key_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: Value,
        time_extracted: String,
    },
    State {
        value: Value,
    },
}

/// Destination for everything a sync run produces
pub trait RecordSink {
    fn emit_schema(&mut self, stream: &str, schema: &Value, key_properties: &[String]) -> io::Result<()>;

    fn emit_record(&mut self, stream: &str, record: &Value, time_extracted: DateTime<Utc>) -> io::Result<()>;

    fn emit_state(&mut self, state: &State) -> io::Result<()>;
}

fn record_message(stream: &str, record: &Value, time_extracted: DateTime<Utc>) -> Message {
    Message::Record {
        stream: stream.to_string(),
        record: record.clone(),
        time_extracted: time_extracted.to_rfc3339_opts(SecondsFormat::Micros, true),
    }
}

fn state_message(state: &State) -> io::Result<Message> {
    Ok(Message::State {
        value: serde_json::to_value(state)?,
    })
}

/// Writes one JSON message per line
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, message: &Message) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn emit_schema(&mut self, stream: &str, schema: &Value, key_properties: &[String]) -> io::Result<()> {
        self.write(&Message::Schema {
            stream: stream.to_string(),
            schema: schema.clone(),
            key_properties: key_properties.to_vec(),
        })
    }

    fn emit_record(&mut self, stream: &str, record: &Value, time_extracted: DateTime<Utc>) -> io::Result<()> {
        self.write(&record_message(stream, record, time_extracted))
    }

    fn emit_state(&mut self, state: &State) -> io::Result<()> {
        self.write(&state_message(state)?)?;
        self.out.flush()
    }
}

/// Keeps every message in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub messages: Vec<Message>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records emitted for `stream`, in order
    pub fn records(&self, stream: &str) -> Vec<&Value> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::Record { stream: s, record, .. } if s == stream => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Streams that received a SCHEMA message, in order
    pub fn schema_streams(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::Schema { stream, .. } => Some(stream.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<&Value> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::State { value } => Some(value),
                _ => None,
            })
            .collect()
    }
}

impl RecordSink for MemorySink {
    fn emit_schema(&mut self, stream: &str, schema: &Value, key_properties: &[String]) -> io::Result<()> {
        self.messages.push(Message::Schema {
            stream: stream.to_string(),
            schema: schema.clone(),
            key_properties: key_properties.to_vec(),
        });
        Ok(())
    }

    fn emit_record(&mut self, stream: &str, record: &Value, time_extracted: DateTime<Utc>) -> io::Result<()> {
        self.messages.push(record_message(stream, record, time_extracted));
        Ok(())
    }

    fn emit_state(&mut self, state: &State) -> io::Result<()> {
        self.messages.push(state_message(state)?);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_lines_output() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let extracted = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);

        sink.emit_schema("users", &json!({"type": "object"}), &["id".to_string()])
            .unwrap();
        sink.emit_record("users", &json!({"id": 1}), extracted).unwrap();
        let mut state = State::default();
        state.set_currently_syncing(Some("projects"));
        sink.emit_state(&state).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            json!({"type": "SCHEMA", "stream": "users", "schema": {"type": "object"}, "key_properties": ["id"]})
        );
        assert_eq!(
            lines[1],
            json!({"type": "RECORD", "stream": "users", "record": {"id": 1}, "time_extracted": "2024-01-02T03:04:05.000000Z"})
        );
        assert_eq!(lines[2]["type"], "STATE");
        assert_eq!(lines[2]["value"]["currentlySyncing"], "projects");
    }

    #[test]
    fn test_memory_sink_filters() {
        let mut sink = MemorySink::new();
        sink.emit_schema("a", &json!({}), &[]).unwrap();
        sink.emit_record("a", &json!({"id": 1}), Utc::now()).unwrap();
        sink.emit_record("b", &json!({"id": 2}), Utc::now()).unwrap();
        sink.emit_state(&State::default()).unwrap();

        assert_eq!(sink.records("a"), vec![&json!({"id": 1})]);
        assert_eq!(sink.schema_streams(), vec!["a"]);
        assert_eq!(sink.states().len(), 1);
    }
}
