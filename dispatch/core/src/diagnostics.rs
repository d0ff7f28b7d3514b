//! Call Diagnostics
//!
//! Every backend attempt made by the router and every batch resolved by the
//! aggregator is reported to a [`DiagnosticsSink`]. Sinks are constructed by
//! the owner of the stack and injected, so tests can observe exactly the calls
//! they triggered.
//!
//! | Sink | Use |
//! |------|-----|
//! | [`NullSink`] | discard everything |
//! | [`MemorySink`] | bounded ring of recent traces plus totals |
//! | [`JsonlSink`] | append one JSON object per line to a file |
//! | [`MultiSink`] | fan out to several sinks |

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of traces kept by [`MemorySink`]
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

/// Buffered bytes that force a [`JsonlSink`] flush
const FLUSH_SIZE_BYTES: usize = 64 * 1024;

/// Longest a recorded line may sit in the [`JsonlSink`] buffer
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Trace Records
// ============================================================================

/// One backend attempt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallTrace {
    /// Unique trace id
    pub id: Uuid,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
    /// Backend name
    pub backend: String,
    /// Model name
    pub model: String,
    /// Agent the call was made for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// 1-based attempt number within the router call
    pub attempt: u32,
    /// Whether this backend was reached by fallback
    pub fallback: bool,
    /// Whether the attempt succeeded
    pub success: bool,
    /// Attempt wall time
    pub latency_ms: u64,
    /// Prompt length in characters
    pub prompt_chars: usize,
    /// Response length in characters
    pub response_chars: usize,
    /// Error classification label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallTrace {
    /// A trace stamped with a fresh id and the current time
    pub fn new(backend: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            backend: backend.into(),
            model: model.into(),
            agent_id: None,
            attempt: 1,
            fallback: false,
            success: false,
            latency_ms: 0,
            prompt_chars: 0,
            response_chars: 0,
            error_kind: None,
            error: None,
        }
    }

    /// Whether the attempt was abandoned because its context fired
    pub fn is_interrupted(&self) -> bool {
        self.error_kind.as_deref() == Some("interrupted")
    }
}

/// How a batch was resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// Every agent was served from cache
    Cached,
    /// The combined call succeeded
    Resolved,
    /// The combined call failed and defaults were substituted
    Defaulted,
}

/// One batch resolution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchTrace {
    /// Unique trace id
    pub id: Uuid,
    /// When the batch finished
    pub timestamp: DateTime<Utc>,
    /// Observations in the batch
    pub agents: usize,
    /// Observations served from cache
    pub cached: usize,
    /// Resolution path
    pub outcome: BatchOutcome,
    /// Batch wall time
    pub latency_ms: u64,
}

impl BatchTrace {
    /// A trace stamped with a fresh id and the current time
    pub fn new(agents: usize, cached: usize, outcome: BatchOutcome, latency: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            agents,
            cached,
            outcome,
            latency_ms: latency.as_millis() as u64,
        }
    }
}

// ============================================================================
// Sink Trait
// ============================================================================

/// Receiver of call and batch traces.
///
/// Implementations must not block for long; they are called inline on the
/// request path.
pub trait DiagnosticsSink: Send + Sync {
    /// Record one backend attempt
    fn record_call(&self, trace: &CallTrace);

    /// Record one batch resolution
    fn record_batch(&self, _trace: &BatchTrace) {}
}

/// Discards every trace
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record_call(&self, _trace: &CallTrace) {}
}

// ============================================================================
// Memory Sink
// ============================================================================

/// Totals kept by [`MemorySink`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallTotals {
    /// Attempts recorded
    pub calls: u64,
    /// Failed attempts, interrupted ones excluded
    pub errors: u64,
    /// Attempts abandoned on cancellation or deadline
    pub interrupted: u64,
    /// Batches recorded
    pub batches: u64,
    /// Mean latency of successful attempts
    pub avg_latency_ms: f64,
}

#[derive(Debug, Default)]
struct MemoryState {
    calls: VecDeque<CallTrace>,
    batches: VecDeque<BatchTrace>,
    total_calls: u64,
    total_errors: u64,
    total_interrupted: u64,
    total_batches: u64,
    success_latency_ms: u64,
}

/// Keeps the most recent traces in memory
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    state: Mutex<MemoryState>,
}

impl MemorySink {
    /// Keep at most `capacity` call traces and `capacity` batch traces
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Up to `limit` most recent call traces, oldest first
    pub fn recent_calls(&self, limit: usize) -> Vec<CallTrace> {
        let state = self.state.lock();
        let skip = state.calls.len().saturating_sub(limit);
        state.calls.iter().skip(skip).cloned().collect()
    }

    /// Up to `limit` most recent batch traces, oldest first
    pub fn recent_batches(&self, limit: usize) -> Vec<BatchTrace> {
        let state = self.state.lock();
        let skip = state.batches.len().saturating_sub(limit);
        state.batches.iter().skip(skip).cloned().collect()
    }

    /// Aggregate counters since creation
    pub fn totals(&self) -> CallTotals {
        let state = self.state.lock();
        let successes = state.total_calls - state.total_errors - state.total_interrupted;
        CallTotals {
            calls: state.total_calls,
            errors: state.total_errors,
            interrupted: state.total_interrupted,
            batches: state.total_batches,
            avg_latency_ms: if successes == 0 {
                0.0
            } else {
                state.success_latency_ms as f64 / successes as f64
            },
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

impl DiagnosticsSink for MemorySink {
    fn record_call(&self, trace: &CallTrace) {
        let mut state = self.state.lock();
        state.total_calls += 1;
        if trace.success {
            state.success_latency_ms += trace.latency_ms;
        } else if trace.is_interrupted() {
            state.total_interrupted += 1;
        } else {
            state.total_errors += 1;
        }
        if state.calls.len() == self.capacity {
            state.calls.pop_front();
        }
        state.calls.push_back(trace.clone());
    }

    fn record_batch(&self, trace: &BatchTrace) {
        let mut state = self.state.lock();
        state.total_batches += 1;
        if state.batches.len() == self.capacity {
            state.batches.pop_front();
        }
        state.batches.push_back(trace.clone());
    }
}

// ============================================================================
// JSON Lines Sink
// ============================================================================

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line<'a> {
    Call(&'a CallTrace),
    Batch(&'a BatchTrace),
}

#[derive(Debug)]
struct JsonlBuffer {
    writer: BufWriter<File>,
    pending: Vec<u8>,
    last_flush: Instant,
}

impl JsonlBuffer {
    fn should_flush(&self) -> bool {
        self.pending.len() >= FLUSH_SIZE_BYTES || self.last_flush.elapsed() >= FLUSH_INTERVAL
    }

    fn flush(&mut self) -> io::Result<()> {
        self.last_flush = Instant::now();
        if self.pending.is_empty() {
            return Ok(());
        }
        let result = self
            .writer
            .write_all(&self.pending)
            .and_then(|()| self.writer.flush());
        self.pending.clear();
        result
    }
}

/// Appends traces to a file, one JSON object per line.
///
/// Lines are buffered in memory and written once the buffer grows past
/// 64 KiB or 100 ms have passed since the last write, so recording a trace
/// rarely touches the disk. Call [`flush`](Self::flush) to force pending lines
/// out; dropping the sink flushes as well.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    buffer: Mutex<JsonlBuffer>,
}

impl JsonlSink {
    /// Open `path` for appending, creating it and its parent directories
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            buffer: Mutex::new(JsonlBuffer {
                writer: BufWriter::new(file),
                pending: Vec::new(),
                last_flush: Instant::now(),
            }),
        })
    }

    /// File being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every buffered line to the file
    pub fn flush(&self) {
        if let Err(e) = self.buffer.lock().flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write traces");
        }
    }

    fn append(&self, line: &Line<'_>) {
        let mut buffer = self.buffer.lock();
        let mark = buffer.pending.len();
        if let Err(e) = serde_json::to_writer(&mut buffer.pending, line) {
            tracing::warn!(error = %e, "failed to encode trace");
            buffer.pending.truncate(mark);
            return;
        }
        buffer.pending.push(b'\n');
        if buffer.should_flush() {
            if let Err(e) = buffer.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to write traces");
            }
        }
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        self.flush();
    }
}

impl DiagnosticsSink for JsonlSink {
    fn record_call(&self, trace: &CallTrace) {
        self.append(&Line::Call(trace));
    }

    fn record_batch(&self, trace: &BatchTrace) {
        self.append(&Line::Batch(trace));
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Forwards every trace to each inner sink
#[derive(Default, Clone)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
}

impl MultiSink {
    /// Fan out to `sinks`
    pub fn new(sinks: Vec<Arc<dyn DiagnosticsSink>>) -> Self {
        Self { sinks }
    }

    /// Add another sink
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl DiagnosticsSink for MultiSink {
    fn record_call(&self, trace: &CallTrace) {
        for sink in &self.sinks {
            sink.record_call(trace);
        }
    }

    fn record_batch(&self, trace: &BatchTrace) {
        for sink in &self.sinks {
            sink.record_batch(trace);
        }
    }
}
