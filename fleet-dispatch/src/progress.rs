//! Progress channel: aggregate vs streaming delivery, and the NDJSON wire
//! format used to stream a batch to the presentation layer.
//!
//! A stream is a sequence of `target` records in completion order followed
//! by exactly one `complete` record carrying every result. Each record is a
//! single JSON object terminated by `\n`.

use crate::outcome::{BatchResult, OperationResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ProgressEvent {
    Target {
        address: String,
        result: OperationResult,
    },
    Complete {
        results: Vec<OperationResult>,
        succeeded_count: usize,
        failed_count: usize,
    },
}

impl ProgressEvent {
    pub fn target(result: &OperationResult) -> Self {
        ProgressEvent::Target { address: result.address.clone(), result: result.clone() }
    }

    pub fn complete(batch: &BatchResult) -> Self {
        ProgressEvent::Complete {
            results: batch.results.clone(),
            succeeded_count: batch.succeeded_count,
            failed_count: batch.failed_count,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ProgressEvent::Complete { .. })
    }

    /// One NDJSON record, newline included
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Delivery cadence of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Aggregate,
    Streaming,
}

impl DeliveryMode {
    /// Streaming when asked for, or when the batch is too large to hold the
    /// caller until the end. Small batches default to aggregate.
    pub fn resolve(requested: Option<bool>, target_count: usize, threshold: usize) -> Self {
        if requested == Some(true) || target_count > threshold {
            DeliveryMode::Streaming
        } else {
            DeliveryMode::Aggregate
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("record after the complete event on line {0}")]
    AfterComplete(usize),
    #[error("stream ended without a complete event")]
    MissingComplete,
}

/// Incremental NDJSON reader.
///
/// Chunks may split records (and UTF-8 sequences) anywhere; bytes are
/// buffered until a newline arrives.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
    lines_read: usize,
    complete_seen: bool,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.complete_seen
    }

    /// Feeds a chunk and returns every record it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<ProgressEvent>, StreamError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = self.decode_line(&line[..line.len() - 1])? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Flushes a trailing record without newline and checks the terminal event.
    pub fn finish(mut self) -> Result<Option<ProgressEvent>, StreamError> {
        let rest = std::mem::take(&mut self.buffer);
        let last = self.decode_line(&rest)?;
        if !self.complete_seen {
            return Err(StreamError::MissingComplete);
        }
        Ok(last)
    }

    fn decode_line(&mut self, raw: &[u8]) -> Result<Option<ProgressEvent>, StreamError> {
        let trimmed = trim_ascii(raw);
        if trimmed.is_empty() {
            return Ok(None);
        }
        self.lines_read += 1;
        if self.complete_seen {
            return Err(StreamError::AfterComplete(self.lines_read));
        }
        let event: ProgressEvent = serde_json::from_slice(trimmed)
            .map_err(|source| StreamError::Malformed { line: self.lines_read, source })?;
        if event.is_complete() {
            self.complete_seen = true;
        }
        Ok(Some(event))
    }
}

fn trim_ascii(raw: &[u8]) -> &[u8] {
    let start = raw.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(raw.len());
    let end = raw.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &raw[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{FailureKind, Outcome};
    use serde_json::json;

    fn sample(index: usize, ok: bool) -> OperationResult {
        let outcome = if ok {
            Outcome::Success { payload: json!({"hostname": format!("IBR-{index}")}) }
        } else {
            Outcome::failure(FailureKind::Timeout, "Connection timed out")
        };
        OperationResult { index, address: format!("10.1.0.{index}"), outcome, attempts: 1, elapsed_ms: 12 }
    }

    #[test]
    fn test_wire_shape() {
        let r = sample(1, true);
        let v: serde_json::Value = serde_json::from_str(&ProgressEvent::target(&r).to_ndjson().unwrap()).unwrap();
        assert_eq!(v["event"], "target");
        assert_eq!(v["address"], "10.1.0.1");
        assert_eq!(v["result"]["status"], "success");

        let batch = BatchResult::from_results(vec![r, sample(2, false)]);
        let line = ProgressEvent::complete(&batch).to_ndjson().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["event"], "complete");
        assert_eq!(v["results"].as_array().unwrap().len(), 2);
        assert_eq!(v["failed_count"], 1);
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let batch = BatchResult::from_results(vec![sample(0, true), sample(1, false)]);
        let mut wire = String::new();
        for r in &batch.results {
            wire.push_str(&ProgressEvent::target(r).to_ndjson().unwrap());
        }
        wire.push_str(&ProgressEvent::complete(&batch).to_ndjson().unwrap());

        let mut decoder = NdjsonDecoder::new();
        let mut events = Vec::new();
        for chunk in wire.as_bytes().chunks(7) {
            events.extend(decoder.push(chunk).unwrap());
        }
        assert!(decoder.is_complete());
        assert!(decoder.finish().unwrap().is_none());
        assert_eq!(events.len(), 3);
        assert_eq!(events.iter().filter(|e| e.is_complete()).count(), 1);
    }

    #[test]
    fn test_decoder_accepts_unterminated_last_record() {
        let batch = BatchResult::from_results(vec![sample(0, true)]);
        let line = ProgressEvent::complete(&batch).to_ndjson().unwrap();
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(line.trim_end().as_bytes()).unwrap().is_empty());
        assert!(decoder.finish().unwrap().is_some_and(|e| e.is_complete()));
    }

    #[test]
    fn test_decoder_errors() {
        let mut decoder = NdjsonDecoder::new();
        assert!(matches!(decoder.push(b"{not json}\n"), Err(StreamError::Malformed { line: 1, .. })));

        let decoder = NdjsonDecoder::new();
        assert!(matches!(decoder.finish(), Err(StreamError::MissingComplete)));

        let batch = BatchResult::from_results(vec![]);
        let line = ProgressEvent::complete(&batch).to_ndjson().unwrap();
        let mut decoder = NdjsonDecoder::new();
        decoder.push(line.as_bytes()).unwrap();
        assert!(matches!(decoder.push(line.as_bytes()), Err(StreamError::AfterComplete(2))));
    }

    #[test]
    fn test_delivery_mode() {
        assert_eq!(DeliveryMode::resolve(None, 10, 50), DeliveryMode::Aggregate);
        assert_eq!(DeliveryMode::resolve(Some(true), 10, 50), DeliveryMode::Streaming);
        assert_eq!(DeliveryMode::resolve(None, 50, 50), DeliveryMode::Aggregate);
        assert_eq!(DeliveryMode::resolve(None, 51, 50), DeliveryMode::Streaming);
        assert_eq!(DeliveryMode::resolve(Some(false), 500, 50), DeliveryMode::Streaming);
    }
}
