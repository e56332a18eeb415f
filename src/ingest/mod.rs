//! Observation source abstraction for sensor ingestion.
//!
//! Provides a unified trait for reading raw observations from different
//! sources: JSONL files (replay), stdin (JSON), and the HTTP ingestion
//! endpoint (which bypasses the source loop and calls the engine directly).

mod normalizer;

pub use normalizer::{normalize, InvalidObservation};

use crate::types::RawObservation;
use anyhow::Result;
use async_trait::async_trait;

/// Events produced by an observation source.
pub enum SourceEvent {
    /// A parseable raw observation was read.
    Observation(RawObservation),
    /// Source reached end of data.
    Eof,
}

/// Trait abstracting where raw observations come from.
///
/// Implementations handle format parsing and pacing internally. The
/// ingestion loop calls [`next_observation`] in a select! with cancellation.
#[async_trait]
pub trait ObservationSource: Send + 'static {
    /// Read the next raw observation from the source.
    ///
    /// Returns `SourceEvent::Eof` when no more data is available.
    async fn next_observation(&mut self) -> Result<SourceEvent>;

    /// Human-readable name for logging (e.g. "JSONL", "stdin").
    fn source_name(&self) -> &str;
}

// ============================================================================
// JSONL Source (file replay)
// ============================================================================

/// Replays pre-loaded observations with optional inter-reading delay.
pub struct JsonlSource {
    observations: std::vec::IntoIter<RawObservation>,
    delay_ms: u64,
    yielded_first: bool,
}

impl JsonlSource {
    pub fn new(observations: Vec<RawObservation>, delay_ms: u64) -> Self {
        Self {
            observations: observations.into_iter(),
            delay_ms,
            yielded_first: false,
        }
    }

    /// Load a JSONL file (one raw observation per line). Malformed lines
    /// are skipped with a warning so a partially corrupt capture still
    /// replays.
    pub fn from_file(path: &str, delay_ms: u64) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut observations = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawObservation>(line) {
                Ok(obs) => observations.push(obs),
                Err(e) => {
                    tracing::warn!(line = lineno + 1, error = %e, "[JsonlSource] Skipping malformed line");
                }
            }
        }
        Ok(Self::new(observations, delay_ms))
    }
}

#[async_trait]
impl ObservationSource for JsonlSource {
    async fn next_observation(&mut self) -> Result<SourceEvent> {
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.observations.next() {
            Some(obs) => {
                self.yielded_first = true;
                Ok(SourceEvent::Observation(obs))
            }
            None => Ok(SourceEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "JSONL"
    }
}

// ============================================================================
// Stdin Source (JSON observations, one per line)
// ============================================================================

/// Reads JSON-formatted raw observations from stdin.
///
/// Used with the simulator: `simulate | vigil-os --stdin`
pub struct StdinSource {
    reader: tokio::io::BufReader<tokio::io::Stdin>,
    line_buffer: String,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            reader: tokio::io::BufReader::new(tokio::io::stdin()),
            line_buffer: String::with_capacity(1024),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObservationSource for StdinSource {
    async fn next_observation(&mut self) -> Result<SourceEvent> {
        use tokio::io::AsyncBufReadExt;
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(SourceEvent::Eof);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawObservation>(line) {
                Ok(obs) => return Ok(SourceEvent::Observation(obs)),
                Err(e) => {
                    tracing::warn!("[StdinSource] Failed to parse observation: {}", e);
                    // Skip malformed lines and keep reading
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}
