// Location ordering guard
// Per-participant monotonic-timestamp filter over an unordered multi-producer
// location stream. Stale and duplicate samples are dropped, never reordered:
// buffering would be unbounded and would delay the current-position view.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::reconciler::Document;

/// One geolocation report from a participant's device.
///
/// `timestamp` is whole seconds since the flight session started; the
/// ordering key is `(participant_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub participant_id: String,
    pub timestamp: i32,
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationSample {
    pub fn new(participant_id: impl Into<String>, timestamp: i32, latitude: f64, longitude: f64) -> Self {
        LocationSample {
            participant_id: participant_id.into(),
            timestamp,
            latitude,
            longitude,
        }
    }
}

// Location collections are keyed by participant, one live document per
// device, so samples can be reconciled like any other collection.
impl Document for LocationSample {
    fn id(&self) -> &str {
        &self.participant_id
    }
}

/// Latest accepted sample per participant. Written only by the guard;
/// readers take a cloned snapshot.
pub type CurrentLocationView = HashMap<String, LocationSample>;

/// Enforces strictly increasing timestamps per participant.
///
/// The guard is the single write path to the current-location view. The
/// RUNNING gate lives one level up in the session machine, which is the
/// guard's only caller.
#[derive(Debug, Default)]
pub struct OrderingGuard {
    latest: CurrentLocationView,
}

impl OrderingGuard {
    pub fn new() -> Self {
        OrderingGuard { latest: HashMap::new() }
    }

    /// Accept the sample iff its timestamp is strictly newer than the last
    /// accepted one for that participant (first sample always accepted).
    /// Rejections mutate nothing.
    pub fn accept(&mut self, sample: &LocationSample) -> bool {
        if let Some(last) = self.latest.get(&sample.participant_id) {
            // Strict >: an equal timestamp is a duplicate, not an update
            if sample.timestamp <= last.timestamp {
                debug!(
                    participant = %sample.participant_id,
                    stale = sample.timestamp,
                    latest = last.timestamp,
                    "stale location sample dropped"
                );
                return false;
            }
        }
        self.latest.insert(sample.participant_id.clone(), sample.clone());
        true
    }

    /// Cloned snapshot of the current-location view.
    pub fn current(&self) -> CurrentLocationView {
        self.latest.clone()
    }

    /// Number of participants with at least one accepted sample.
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    pub fn clear(&mut self) {
        self.latest.clear();
    }
}
