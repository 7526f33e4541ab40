//! Recorder wire types and the client interface the live session talks through.
//!
//! All timestamps are epoch seconds (UTC). Every response carries a `success`
//! flag; `into_result` turns `success: false` into [`TrackerError::Protocol`]
//! so nothing unacknowledged is merged into local state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use crate::{ActivityKind, GeoPoint, Result, Ride, TrackerError};

/// How the recorder attached this client to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Fresh,
    Joined,
    Resumed,
}

/// Per-activity aggregate maintained by the recorder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityStats {
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub total_points: usize,
    #[serde(default)]
    pub total_distance: f64,
    #[serde(default)]
    pub total_duration: i64,
    #[serde(default)]
    pub total_duration_str: Option<String>,
    #[serde(default)]
    pub avg_speed: f64,
    /// Points dropped by the classifier's noise filter
    #[serde(default)]
    pub filtered_count: usize,
}

pub type StatsByKind = BTreeMap<ActivityKind, ActivityStats>;

/// `GET /api/live/status`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub has_session: bool,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_stale: Option<bool>,
    #[serde(default)]
    pub age_days: Option<f64>,
    #[serde(default)]
    pub start_time_str: Option<String>,
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub total_points: usize,
}

/// Body of `POST /api/live/start`.
///
/// An empty body asks for a fresh start, or a join if a session is already active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resume: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reset: bool,
}

/// `POST /api/live/start`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub mode: Option<SessionMode>,
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    #[serde(default)]
    pub start_time_str: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub total_points: Option<usize>,
    #[serde(default)]
    pub total_distance: Option<f64>,
    #[serde(default)]
    pub total_duration: Option<i64>,
    #[serde(default)]
    pub last_point_time: Option<String>,
    #[serde(default)]
    pub stats: Option<StatsByKind>,
}

/// Body of `POST /api/live/poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRequest {
    pub last_drawn_timestamp: i64,
}

/// `POST /api/live/poll`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub total_points: Option<usize>,
    #[serde(default)]
    pub total_distance: Option<f64>,
    #[serde(default)]
    pub total_duration: Option<i64>,
    #[serde(default)]
    pub last_point_time: Option<String>,
    #[serde(default)]
    pub stats: Option<StatsByKind>,
    /// Points newer than the watermark, ascending
    #[serde(default)]
    pub points_to_draw: Vec<GeoPoint>,
}

/// Which track `GET /api/live/track/{kind}` should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Flat point list (basic mode)
    All,
    /// Per-ride rendering (rich mode)
    Activity(ActivityKind),
}

impl TrackKind {
    pub fn path_segment(&self) -> &'static str {
        match self {
            TrackKind::All => "all",
            TrackKind::Activity(kind) => kind.as_str(),
        }
    }
}

/// Aggregate sent along with a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub rides: u32,
    #[serde(default)]
    pub points: usize,
}

/// `GET /api/live/track/{kind}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub rides: Vec<Ride>,
    #[serde(default)]
    pub points: Vec<GeoPoint>,
    #[serde(default)]
    pub stats: Option<LayerStats>,
}

impl TrackResponse {
    /// Rides tagged with their activity type.
    pub fn into_rides(self, kind: ActivityKind) -> Vec<Ride> {
        self.rides
            .into_iter()
            .map(|ride| Ride {
                kind: Some(kind),
                ..ride
            })
            .collect()
    }
}

/// Body of `POST /api/detect`.
///
/// Dates are `YYYY-MM-DD`, times `HH:MM` in the timezone the recorder detects
/// from the first fix of `start_date`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectRange {
    pub start_date: String,
    pub end_date: String,
    pub start_time: String,
    pub end_time: String,
}

impl DetectRange {
    /// Whole days from `start_date` to `end_date` inclusive.
    pub fn days(start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            start_date: start_date.into(),
            end_date: end_date.into(),
            start_time: "00:00".to_string(),
            end_time: "23:59".to_string(),
        }
    }
}

/// One detected ride, without its points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSummary {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub ride_number: u32,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    #[serde(default)]
    pub start_datetime_str: Option<String>,
    #[serde(default)]
    pub end_datetime_str: Option<String>,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub avg_speed: f64,
    /// Number of fixes in the ride
    #[serde(default)]
    pub points: usize,
}

/// Activity boundary on the detected timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: i64,
    /// `car_start`, `bike_end`, `other_start`, ...
    pub event: String,
    /// `real` for classified rides, `generated` for gaps filled as other
    #[serde(rename = "type")]
    pub origin: String,
}

/// `POST /api/detect`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub total_points: usize,
    #[serde(default)]
    pub activity_markers: usize,
    #[serde(default)]
    pub stats: StatsByKind,
    /// Most recent first
    #[serde(default)]
    pub rides: Vec<RideSummary>,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}

impl DetectResponse {
    /// Activity types with at least one ride, in redraw order.
    pub fn detected_kinds(&self) -> Vec<ActivityKind> {
        ActivityKind::ALL
            .into_iter()
            .filter(|kind| self.stats.get(kind).is_some_and(|s| s.count > 0))
            .collect()
    }
}

/// Response shapes that carry a `success`/`error` pair.
pub trait Acknowledged: Sized {
    fn success(&self) -> bool;
    fn error(&self) -> Option<&str>;

    /// `Ok(self)` if the recorder acknowledged the request.
    fn into_result(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(TrackerError::Protocol(
                self.error().unwrap_or("request rejected").to_string(),
            ))
        }
    }
}

macro_rules! acknowledged {
    ($($ty:ty),*) => {
        $(impl Acknowledged for $ty {
            fn success(&self) -> bool {
                self.success
            }

            fn error(&self) -> Option<&str> {
                self.error.as_deref()
            }
        })*
    };
}

acknowledged!(StatusResponse, SessionResponse, PollResponse, TrackResponse, DetectResponse);

/// Client for the remote recorder.
///
/// Implementations return the decoded body even for `success: false`; the
/// caller decides. [`HttpTrackerApi`](crate::HttpTrackerApi) is the production implementation.
pub trait TrackerApi: Send + Sync + 'static {
    fn session_status(&self) -> impl Future<Output = Result<StatusResponse>> + Send;

    fn start_session(&self, request: StartRequest) -> impl Future<Output = Result<SessionResponse>> + Send;

    fn poll(&self, request: PollRequest) -> impl Future<Output = Result<PollResponse>> + Send;

    fn track(&self, kind: TrackKind) -> impl Future<Output = Result<TrackResponse>> + Send;

    /// Mark the session inactive on the recorder; its data is kept.
    fn stop_session(&self) -> impl Future<Output = Result<()>> + Send;

    /// Classify the recorded history in `range`. Feeds [`TrackerApi::history_track`].
    fn detect(&self, range: DetectRange) -> impl Future<Output = Result<DetectResponse>> + Send;

    /// Track of the last detection, `GET /api/track/{kind}`.
    fn history_track(&self, kind: TrackKind) -> impl Future<Output = Result<TrackResponse>> + Send;
}

impl<T: TrackerApi> TrackerApi for Arc<T> {
    fn session_status(&self) -> impl Future<Output = Result<StatusResponse>> + Send {
        (**self).session_status()
    }

    fn start_session(&self, request: StartRequest) -> impl Future<Output = Result<SessionResponse>> + Send {
        (**self).start_session(request)
    }

    fn poll(&self, request: PollRequest) -> impl Future<Output = Result<PollResponse>> + Send {
        (**self).poll(request)
    }

    fn track(&self, kind: TrackKind) -> impl Future<Output = Result<TrackResponse>> + Send {
        (**self).track(kind)
    }

    fn stop_session(&self) -> impl Future<Output = Result<()>> + Send {
        (**self).stop_session()
    }

    fn detect(&self, range: DetectRange) -> impl Future<Output = Result<DetectResponse>> + Send {
        (**self).detect(range)
    }

    fn history_track(&self, kind: TrackKind) -> impl Future<Output = Result<TrackResponse>> + Send {
        (**self).history_track(kind)
    }
}
