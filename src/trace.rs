// Flight trace recorder
// Ordered trace buffer for one flight session plus the packed binary
// encoding used for persistence.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::geodesy;
use crate::guard::LocationSample;

/// Bytes per packed trace point: big-endian i32 timestamp + f64 lat + f64 lon.
pub const POINT_LEN: usize = 20;

/// One recorded trace point, derived from an accepted location sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    pub timestamp: i32,
    pub latitude: f64,
    pub longitude: f64,
}

/// The ordered sequence of accepted positions for one flight session.
///
/// Points are strictly increasing in timestamp: every append comes through
/// the ordering guard. Append-only while the session runs, immutable once
/// stopped and persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightTrace {
    pub flight_id: String,
    pub points: Vec<TracePoint>,
}

impl FlightTrace {
    pub fn new(flight_id: impl Into<String>) -> Self {
        FlightTrace {
            flight_id: flight_id.into(),
            points: Vec::new(),
        }
    }

    /// Pack into the persisted byte layout: POINT_LEN bytes per point,
    /// concatenated, no header or separators. Decoding needs only
    /// byte-offset arithmetic.
    pub fn pack(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.points.len() * POINT_LEN);
        for point in &self.points {
            bytes.extend_from_slice(&point.timestamp.to_be_bytes());
            bytes.extend_from_slice(&point.latitude.to_be_bytes());
            bytes.extend_from_slice(&point.longitude.to_be_bytes());
        }
        bytes
    }

    /// Decode a packed trace. A byte length that is not a whole number of
    /// points means the stored blob is corrupt.
    pub fn unpack(flight_id: impl Into<String>, bytes: &[u8]) -> Result<FlightTrace, SyncError> {
        if bytes.len() % POINT_LEN != 0 {
            return Err(SyncError::CorruptTrace { len: bytes.len() });
        }
        let mut points = Vec::with_capacity(bytes.len() / POINT_LEN);
        for chunk in bytes.chunks_exact(POINT_LEN) {
            let timestamp = i32::from_be_bytes(chunk[0..4].try_into().unwrap());
            let latitude = f64::from_be_bytes(chunk[4..12].try_into().unwrap());
            let longitude = f64::from_be_bytes(chunk[12..20].try_into().unwrap());
            points.push(TracePoint { timestamp, latitude, longitude });
        }
        Ok(FlightTrace {
            flight_id: flight_id.into(),
            points,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Total ground distance flown in meters, summed over consecutive legs.
    pub fn total_distance(&self) -> f64 {
        self.points
            .windows(2)
            .map(|leg| {
                geodesy::greatcircle(
                    leg[0].latitude,
                    leg[0].longitude,
                    leg[1].latitude,
                    leg[1].longitude,
                )
            })
            .sum()
    }
}

/// Append-only recorder for the in-progress trace of one RUNNING session.
///
/// Only the session machine holds a recorder, and it appends only samples
/// the ordering guard accepted, so the strictly-increasing-timestamp
/// invariant holds by construction.
#[derive(Debug)]
pub struct TraceRecorder {
    trace: FlightTrace,
}

impl TraceRecorder {
    pub fn new(flight_id: impl Into<String>) -> Self {
        TraceRecorder {
            trace: FlightTrace::new(flight_id),
        }
    }

    pub fn append(&mut self, sample: &LocationSample) {
        self.trace.points.push(TracePoint {
            timestamp: sample.timestamp,
            latitude: sample.latitude,
            longitude: sample.longitude,
        });
    }

    /// Cloned snapshot of the trace so far.
    pub fn snapshot(&self) -> FlightTrace {
        self.trace.clone()
    }

    pub fn len(&self) -> usize {
        self.trace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace.is_empty()
    }
}
