//! Current-track status shared between the playback thread and the web layer.
//!
//! Writers never mutate a snapshot in place: each update builds a new
//! `TrackStatus` and swaps the `Arc`, so a reader always sees one complete
//! version, possibly a stale one.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::dsp::FilterClass;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterParams {
    #[serde(rename = "type")]
    pub kind: FilterClass,
    pub cutoff: f64,
    pub position: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackStatus {
    pub filename: Option<String>,
    #[serde(serialize_with = "empty_when_absent")]
    pub filter_params: Option<FilterParams>,
}

/// Body of `GET /now`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub track: TrackStatus,
    pub vibration: bool,
    pub actuator_attached: bool,
}

fn empty_when_absent<S: Serializer>(params: &Option<FilterParams>, s: S) -> Result<S::Ok, S::Error> {
    match params {
        Some(p) => p.serialize(s),
        None => serde_json::Map::new().serialize(s),
    }
}

pub struct StatusBoard {
    current: RwLock<Arc<TrackStatus>>,
    vibration: AtomicBool,
    actuator_attached: AtomicBool,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(TrackStatus::default())),
            vibration: AtomicBool::new(false),
            actuator_attached: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> Arc<TrackStatus> {
        self.current
            .read()
            .map(|s| Arc::clone(&*s))
            .unwrap_or_else(|poisoned| Arc::clone(&*poisoned.into_inner()))
    }

    /// Start a new track; filter parameters reset until its first segment.
    pub fn set_track(&self, filename: &str) {
        self.publish(TrackStatus {
            filename: Some(filename.to_string()),
            filter_params: None,
        });
    }

    pub fn publish_filter(&self, params: FilterParams) {
        let filename = self.snapshot().filename.clone();
        self.publish(TrackStatus {
            filename,
            filter_params: Some(params),
        });
    }

    fn publish(&self, status: TrackStatus) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(status);
    }

    pub fn vibration_enabled(&self) -> bool {
        self.vibration.load(Ordering::Relaxed)
    }

    pub fn set_vibration(&self, on: bool) {
        self.vibration.store(on, Ordering::Relaxed);
    }

    pub fn actuator_attached(&self) -> bool {
        self.actuator_attached.load(Ordering::Relaxed)
    }

    pub fn set_actuator_attached(&self, attached: bool) {
        self.actuator_attached.store(attached, Ordering::Relaxed);
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            track: (*self.snapshot()).clone(),
            vibration: self.vibration_enabled(),
            actuator_attached: self.actuator_attached(),
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
