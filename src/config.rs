//! Tunables for distance aggregation, playback pacing and the live session.

use std::time::Duration;

/// Rules for turning consecutive fixes into travelled distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceModel {
    /// Sphere radius used by the great-circle formula.
    /// Default: 6371.0 km
    pub earth_radius_km: f64,

    /// Multiplier applied to straight-line segments to approximate road distance.
    /// Default: 1.05
    pub road_factor: f64,

    /// Segments shorter than this are treated as GPS jitter and contribute nothing.
    /// Default: 0.01 km (10 m)
    pub noise_floor_km: f64,
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self {
            earth_radius_km: 6371.0,
            road_factor: 1.05,
            noise_floor_km: 0.01,
        }
    }
}

/// Pacing of the segment-by-segment animation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Target time per drawn segment.
    /// Default: 100 ms
    pub ms_per_point: u64,

    /// Upper bound on the whole animation; long tracks draw faster.
    /// Default: 30 000 ms
    pub max_total_ms: u64,

    /// Lower bound on the per-segment delay.
    /// Default: 10 ms
    pub min_delay_ms: u64,

    /// Pan the map to every newly drawn point.
    /// Default: true
    pub follow: bool,

    pub distance: DistanceModel,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            ms_per_point: 100,
            max_total_ms: 30_000,
            min_delay_ms: 10,
            follow: true,
            distance: DistanceModel::default(),
        }
    }
}

impl PlaybackConfig {
    /// Delay between segment draws for an animation of `segments` segments.
    ///
    /// `max(floor(min(segments * ms_per_point, max_total_ms) / segments), min_delay_ms)`
    pub fn segment_delay(&self, segments: usize) -> Duration {
        if segments == 0 {
            return Duration::from_millis(self.min_delay_ms);
        }
        let n = segments as u64;
        let total = n.saturating_mul(self.ms_per_point).min(self.max_total_ms);
        Duration::from_millis((total / n).max(self.min_delay_ms))
    }
}

/// Configuration for the live session against the recorder.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Recorder root, e.g. `http://tracker.local:5000`.
    pub base_url: String,

    /// Period of the live poll timer.
    /// Default: 30 s
    pub poll_interval: Duration,

    /// Per-request timeout for the HTTP client.
    /// Default: 30 s
    pub request_timeout: Duration,

    /// Sessions older than this are flagged stale when the recorder does not say.
    /// Default: 7 days
    pub stale_after_days: f64,

    /// Retries on HTTP 429 before a request is reported as failed.
    /// Default: 3
    pub max_retries: u32,

    pub distance: DistanceModel,
    pub playback: PlaybackConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            stale_after_days: 7.0,
            max_retries: 3,
            distance: DistanceModel::default(),
            playback: PlaybackConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}
