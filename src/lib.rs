//! # Ride Tracker
//!
//! Client-side tracking and playback engine for a continuously growing GPS point stream.
//!
//! This library provides:
//! - Timed replay of a bounded point list or ride set, with pause/step controls
//! - A long-lived live session against a remote recorder (join/resume/reset, incremental polling)
//! - Scrubbing through the accumulated point history without losing the live tail
//! - Fetching classified rides for a past date range to replay them
//!
//! ## Features
//!
//! - **`http`** (default) - Enable the `reqwest` client for the recorder API
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ride_tracker::{
//!     GeoPoint, ManualScheduler, NoopSurface, PlaybackConfig, PlaybackData, PlaybackEngine,
//! };
//!
//! let points: Vec<GeoPoint> = (0..10)
//!     .map(|i| GeoPoint::new(51.5 + i as f64 * 0.001, -0.12, 1_700_000_000 + i * 10))
//!     .collect();
//!
//! let scheduler = ManualScheduler::new();
//! let mut engine = PlaybackEngine::new(
//!     PlaybackConfig::default(),
//!     Arc::new(NoopSurface),
//!     Box::new(scheduler.clone()),
//! );
//!
//! engine.start(PlaybackData::Basic(points), None);
//! while let Some(ticket) = scheduler.next_ticket() {
//!     engine.on_timer(ticket);
//! }
//! assert!(engine.is_idle());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;
pub mod geo_utils;

pub mod api;
pub mod history;
pub mod live;
pub mod playback;
pub mod scheduler;
pub mod surface;

// HTTP module for the recorder client
#[cfg(feature = "http")]
pub mod http;

pub use config::{DistanceModel, PlaybackConfig, TrackerConfig};
pub use error::{Result, TrackerError};

pub use api::{
    ActivityStats, DetectRange, DetectResponse, PollRequest, PollResponse, RideSummary,
    SessionMode, SessionResponse, StartRequest, StatusResponse, TrackKind, TrackResponse,
    TrackerApi,
};
pub use history::{CumulativeStat, HistoryNavigator, NavigationCursor, NavigationView, SharedHistory};
pub use live::{
    LiveEvent, LiveSessionController, PollOutcome, SessionPrompt, SessionSnapshot, SessionStatus,
    StartIntent,
};
pub use playback::{
    AnimationState, PlaybackCommand, PlaybackData, PlaybackEngine, Progress, ProgressObserver,
};
pub use scheduler::{ManualScheduler, Scheduler, Ticket, TimerHandle, TokioScheduler};
pub use surface::{Layer, MapSurface, Marker, NoopSurface, SegmentHandle};

#[cfg(feature = "http")]
pub use http::HttpTrackerApi;

// ============================================================================
// Core Types
// ============================================================================

/// A recorded GPS fix.
///
/// `tst` is epoch seconds (UTC). Within a session's point log timestamps are
/// non-decreasing.
///
/// # Example
/// ```
/// use ride_tracker::GeoPoint;
/// let point = GeoPoint::new(45.5017, -73.5673, 1_700_000_000); // Montreal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    pub tst: i64,
}

impl GeoPoint {
    /// Create a new GPS point.
    pub fn new(lat: f64, lng: f64, tst: i64) -> Self {
        Self { lat, lng, tst }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Activity type assigned to a ride by the recorder's classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Car,
    Bike,
    Other,
}

impl ActivityKind {
    /// Every activity type, in the order layers are redrawn.
    pub const ALL: [ActivityKind; 3] = [ActivityKind::Car, ActivityKind::Bike, ActivityKind::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Car => "car",
            ActivityKind::Bike => "bike",
            ActivityKind::Other => "other",
        }
    }

    /// Fallback ride color when the recorder does not send one.
    pub fn default_color(&self) -> &'static str {
        match self {
            ActivityKind::Car => "#FF0000",
            ActivityKind::Bike => "#228B22",
            ActivityKind::Other => "#800080",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified ride as returned by the recorder.
///
/// Immutable once received; `points` are ordered by `tst`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    /// Filled in from the enclosing track response.
    #[serde(rename = "type", default)]
    pub kind: Option<ActivityKind>,
    pub ride_number: u32,
    pub points: Vec<GeoPoint>,
    #[serde(rename = "start_timestamp")]
    pub start_ts: i64,
    #[serde(rename = "end_timestamp")]
    pub end_ts: i64,
    #[serde(rename = "distance", default)]
    pub distance_km: f64,
    #[serde(rename = "duration", default)]
    pub duration_s: i64,
    #[serde(rename = "avg_speed", default)]
    pub avg_speed_kmh: f64,
    #[serde(default)]
    pub color: Option<String>,
}

impl Ride {
    /// Color to draw this ride with.
    pub fn draw_color(&self) -> &str {
        match (&self.color, self.kind) {
            (Some(color), _) => color,
            (None, Some(kind)) => kind.default_color(),
            (None, None) => "#FFA500",
        }
    }
}

/// Bounding box of a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Get the center point of the bounds.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}
