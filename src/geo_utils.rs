//! # Geographic Utilities
//!
//! Distance and bounds computations shared by playback, history and the live session.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`distance_km`] | Great-circle distance between two fixes |
//! | [`adjusted_segment_distance`] | Road-adjusted segment length with a noise floor |
//! | [`track_distance_km`] | Accumulated adjusted length of a track |
//! | [`compute_bounds`] | Bounding box of a track |
//! | [`format_duration`] | `DD:HH:MM:SS` rendering of a duration |
//!
//! ## Example
//!
//! ```rust
//! use ride_tracker::{GeoPoint, DistanceModel, geo_utils};
//!
//! let track = vec![
//!     GeoPoint::new(45.5017, -73.5673, 0),
//!     GeoPoint::new(45.5030, -73.5690, 30),
//!     GeoPoint::new(45.5050, -73.5700, 60),
//! ];
//!
//! let km = geo_utils::track_distance_km(&track, &DistanceModel::default());
//! println!("Track length: {:.2} km", km);
//! ```
//!
//! ## Algorithm Notes
//!
//! Distances use the haversine formula on a sphere (radius 6371 km by default).
//! Consecutive fixes closer than the noise floor are stationary jitter and add
//! nothing; longer segments are scaled by a road-distortion factor because a
//! straight line between two fixes underestimates the distance actually driven.

use geo::{BoundingRect, Coord, LineString};

use crate::{Bounds, DistanceModel, GeoPoint};

/// Mean Earth radius used by the recorder.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance in kilometres on a sphere of the given radius.
///
/// `geo::Haversine` is pinned to a 6371.0088 km mean radius, so the formula is
/// spelled out here to honour [`DistanceModel::earth_radius_km`].
#[inline]
pub fn great_circle_km(a: &GeoPoint, b: &GeoPoint, radius_km: f64) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    radius_km * 2.0 * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Great-circle distance in kilometres between two fixes (radius 6371 km).
///
/// # Example
///
/// ```rust
/// use ride_tracker::{GeoPoint, geo_utils};
///
/// let montreal = GeoPoint::new(45.5017, -73.5673, 0);
/// let quebec = GeoPoint::new(46.8139, -71.2080, 0);
///
/// let km = geo_utils::distance_km(&montreal, &quebec);
/// assert!((km - 233.0).abs() < 5.0);
/// ```
#[inline]
pub fn distance_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    great_circle_km(a, b, EARTH_RADIUS_KM)
}

/// Road-adjusted length of the segment `a -> b` under the default model.
///
/// Returns exactly `0.0` below 10 m, otherwise `distance_km * 1.05`.
#[inline]
pub fn adjusted_segment_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    DistanceModel::default().segment_km(a, b)
}

impl DistanceModel {
    /// Road-adjusted length of the segment `a -> b` in kilometres.
    pub fn segment_km(&self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        let raw = great_circle_km(a, b, self.earth_radius_km);
        if raw < self.noise_floor_km {
            0.0
        } else {
            raw * self.road_factor
        }
    }
}

/// Sum of adjusted segment lengths along a track. Empty or single-point tracks return 0.0.
pub fn track_distance_km(points: &[GeoPoint], model: &DistanceModel) -> f64 {
    points
        .windows(2)
        .map(|w| model.segment_km(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Compute the bounding box of a track, or `None` when it has no points.
///
/// # Example
///
/// ```rust
/// use ride_tracker::{GeoPoint, geo_utils};
///
/// let track = vec![
///     GeoPoint::new(45.50, -73.57, 0),
///     GeoPoint::new(45.51, -73.56, 10),
/// ];
///
/// let bounds = geo_utils::compute_bounds(&track).unwrap();
/// assert_eq!(bounds.min_lat, 45.50);
/// assert_eq!(bounds.max_lng, -73.56);
/// ```
pub fn compute_bounds(points: &[GeoPoint]) -> Option<Bounds> {
    let line: LineString<f64> = points
        .iter()
        .map(|p| Coord { x: p.lng, y: p.lat })
        .collect();

    line.bounding_rect().map(|rect| Bounds {
        min_lat: rect.min().y,
        max_lat: rect.max().y,
        min_lng: rect.min().x,
        max_lng: rect.max().x,
    })
}

// =============================================================================
// Formatting
// =============================================================================

/// Render a duration in seconds as `DD:HH:MM:SS`.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}:{:02}", days, hours, minutes, secs)
}

/// Average speed in km/h, or 0 when no time has elapsed.
#[inline]
pub fn speed_kmh(distance_km: f64, duration_s: i64) -> f64 {
    if duration_s > 0 {
        distance_km / duration_s as f64 * 3600.0
    } else {
        0.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
