// Flight session state machine
// Owns the session state, the ordering guard, the trace recorder and the
// elapsed-time counter. All location ingestion and every reset/freeze of the
// current-location view goes through here.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::guard::{CurrentLocationView, LocationSample, OrderingGuard};
use crate::trace::{FlightTrace, TraceRecorder};

/// Session lifecycle states.
///
/// NotStarted -> Running -> Stopped -> NotStarted, with a separate
/// NotStarted -> TraceDisplay -> NotStarted loop for viewing past flights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    Stopped,
    TraceDisplay,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::NotStarted => "NOT_STARTED",
            SessionState::Running => "RUNNING",
            SessionState::Stopped => "STOPPED",
            SessionState::TraceDisplay => "TRACE_DISPLAY",
        };
        f.write_str(name)
    }
}

/// Durable storage for packed traces. The production implementation writes
/// to the remote store; `MemoryTraceStore` serves tests and single-process
/// embeddings.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn persist(&self, flight_id: &str, packed: &[u8]) -> Result<(), SyncError>;
    async fn load(&self, flight_id: &str) -> Result<Vec<u8>, SyncError>;
}

/// One flight session from start to stop.
///
/// The guard and recorder are created fresh on every start and are reachable
/// only through `ingest`, so the view and the trace have exactly one writer.
#[derive(Debug)]
pub struct FlightSession {
    state: SessionState,
    flight_id: Option<String>,
    guard: OrderingGuard,
    recorder: Option<TraceRecorder>,
    /// Wall-clock counter; starts at 0 on NotStarted -> Running.
    started: Option<Instant>,
    /// Final counter value, frozen on Running -> Stopped.
    stopped_elapsed: Option<u64>,
    started_at: Option<DateTime<Utc>>,
    /// Trace loaded read-only while in TraceDisplay.
    loaded: Option<FlightTrace>,
}

impl FlightSession {
    pub fn new() -> Self {
        FlightSession {
            state: SessionState::NotStarted,
            flight_id: None,
            guard: OrderingGuard::new(),
            recorder: None,
            started: None,
            stopped_elapsed: None,
            started_at: None,
            loaded: None,
        }
    }

    /// NotStarted -> Running. Allocates a fresh view and trace for the
    /// flight and starts the counter at 0.
    ///
    /// # Panics
    /// If the session is not NotStarted. A silently ignored double start
    /// would corrupt the trace's time origin.
    pub fn start(&mut self, flight_id: &str) {
        self.check_transition("start", SessionState::NotStarted);
        info!(flight = %flight_id, "flight session started");
        self.flight_id = Some(flight_id.to_string());
        self.guard = OrderingGuard::new();
        self.recorder = Some(TraceRecorder::new(flight_id));
        self.started = Some(Instant::now());
        self.stopped_elapsed = None;
        self.started_at = Some(Utc::now());
        self.state = SessionState::Running;
    }

    /// Running -> Stopped. Persists the packed trace *before* transitioning;
    /// on persistence failure the session stays Running so the caller can
    /// retry without losing the in-memory trace.
    pub async fn stop(&mut self, store: &dyn TraceStore) -> Result<(), SyncError> {
        self.check_transition("stop", SessionState::Running);
        let trace = self
            .recorder
            .as_ref()
            .map(TraceRecorder::snapshot)
            .unwrap_or_else(|| FlightTrace::new(self.flight_id.as_deref().unwrap_or("")));

        if let Err(err) = store.persist(&trace.flight_id, &trace.pack()).await {
            warn!(flight = %trace.flight_id, %err, "trace persistence failed, session stays RUNNING");
            return Err(err);
        }

        info!(
            flight = %trace.flight_id,
            points = trace.len(),
            elapsed = self.elapsed_seconds(),
            "flight session stopped, trace persisted"
        );
        self.stopped_elapsed = Some(self.elapsed_seconds());
        self.started = None;
        self.state = SessionState::Stopped;
        Ok(())
    }

    /// Stopped -> NotStarted. Discards the view and the in-memory trace.
    pub fn clear(&mut self) {
        self.check_transition("clear", SessionState::Stopped);
        debug!(flight = ?self.flight_id, "session cleared");
        self.flight_id = None;
        self.guard.clear();
        self.recorder = None;
        self.stopped_elapsed = None;
        self.started_at = None;
        self.state = SessionState::NotStarted;
    }

    /// NotStarted -> TraceDisplay. Loads a previously persisted flight's
    /// trace read-only; no counter, no ingestion, view untouched.
    pub async fn display(
        &mut self,
        flight_id: &str,
        store: &dyn TraceStore,
    ) -> Result<(), SyncError> {
        self.check_transition("displayTrace", SessionState::NotStarted);
        let bytes = store.load(flight_id).await?;
        let trace = FlightTrace::unpack(flight_id, &bytes)?;
        debug!(flight = %flight_id, points = trace.len(), "trace loaded for display");
        self.loaded = Some(trace);
        self.state = SessionState::TraceDisplay;
        Ok(())
    }

    /// TraceDisplay -> NotStarted.
    pub fn quit_display(&mut self) {
        self.check_transition("quitDisplay", SessionState::TraceDisplay);
        self.loaded = None;
        self.state = SessionState::NotStarted;
    }

    /// Route one sample through the ordering guard and, on acceptance, the
    /// recorder. Returns false while not Running and for stale samples;
    /// both are expected outcomes, not errors.
    pub fn ingest(&mut self, sample: &LocationSample) -> bool {
        if self.state != SessionState::Running {
            return false;
        }
        if !self.guard.accept(sample) {
            return false;
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.append(sample);
        }
        true
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn flight_id(&self) -> Option<&str> {
        self.flight_id.as_deref()
    }

    /// Whole seconds since the session started. Frozen at the final value
    /// once stopped, 0 when no session has run.
    pub fn elapsed_seconds(&self) -> u64 {
        match (self.started, self.stopped_elapsed) {
            (Some(started), None) => started.elapsed().as_secs(),
            (_, Some(frozen)) => frozen,
            _ => 0,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Cloned snapshot of the current-location view.
    pub fn current_locations(&self) -> CurrentLocationView {
        self.guard.current()
    }

    /// Cloned snapshot of the active trace: the in-progress (or frozen)
    /// recording, or the loaded past trace while in TraceDisplay.
    pub fn current_trace(&self) -> Option<FlightTrace> {
        match self.state {
            SessionState::TraceDisplay => self.loaded.clone(),
            _ => self.recorder.as_ref().map(TraceRecorder::snapshot),
        }
    }

    fn check_transition(&self, op: &str, expected: SessionState) {
        if self.state != expected {
            panic!(
                "illegal session transition: {}() requires {} but state is {}",
                op, expected, self.state
            );
        }
    }
}

impl Default for FlightSession {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory trace store, keyed by flight id. `fail_writes` makes persist
/// return an error so the stay-RUNNING-on-failure contract can be tested.
#[derive(Debug, Default)]
pub struct MemoryTraceStore {
    traces: tokio::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>,
    pub fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceStore for MemoryTraceStore {
    async fn persist(&self, flight_id: &str, packed: &[u8]) -> Result<(), SyncError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SyncError::Persist {
                flight_id: flight_id.to_string(),
                reason: "store unavailable".to_string(),
            });
        }
        self.traces
            .write()
            .await
            .insert(flight_id.to_string(), packed.to_vec());
        Ok(())
    }

    async fn load(&self, flight_id: &str) -> Result<Vec<u8>, SyncError> {
        self.traces
            .read()
            .await
            .get(flight_id)
            .cloned()
            .ok_or_else(|| SyncError::TraceNotFound(flight_id.to_string()))
    }
}
