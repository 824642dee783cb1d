// Crate error taxonomy
//
// Ordering rejections and not-RUNNING publishes are bool returns, not errors
// (expected steady-state outcomes of asynchronous delivery). Illegal session
// transitions are panics: they indicate a caller-side lifecycle bug.

use thiserror::Error;

use crate::trace::POINT_LEN;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A single item in a remote snapshot could not be decoded. Reported
    /// per-item; never aborts the surrounding batch.
    #[error("failed to decode item {id:?} in collection {collection:?}: {source}")]
    Decode {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// Packed trace bytes are not a whole number of points.
    #[error("corrupt trace: {len} bytes is not a multiple of {POINT_LEN}")]
    CorruptTrace { len: usize },

    /// The trace store rejected a write. The session stays RUNNING so the
    /// caller can retry without losing the in-memory trace.
    #[error("trace persistence failed for flight {flight_id:?}: {reason}")]
    Persist { flight_id: String, reason: String },

    /// No persisted trace exists for the requested flight.
    #[error("no persisted trace for flight {0:?}")]
    TraceNotFound(String),
}
