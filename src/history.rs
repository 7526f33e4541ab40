//! Append-only point log with cumulative stats and a scrub cursor.
//!
//! The log and its stats are only ever mutated through [`HistoryNavigator::append`]
//! and [`HistoryNavigator::initialize_from`]. Navigation calls move the cursor and
//! re-render, nothing else.

use log::debug;
use std::sync::{Arc, Mutex};

use crate::surface::{Layer, MapSurface, Marker, LIVE_COLOR};
use crate::{DistanceModel, GeoPoint};

/// Aggregate over points `[0..=i]` of the log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CumulativeStat {
    pub tst: i64,
    pub distance_km: f64,
    /// Seconds since the first point of the log
    pub duration_s: i64,
    pub point_count: usize,
}

/// `active == false` means pinned to the live tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavigationCursor {
    pub active: bool,
    pub index: usize,
}

/// Read-only projection for presentation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationView {
    pub index: usize,
    pub stat: CumulativeStat,
    pub point: GeoPoint,
    pub is_live: bool,
}

/// Log shared between the live poller (writer) and the UI (navigation).
pub type SharedHistory = Arc<Mutex<HistoryNavigator>>;

pub struct HistoryNavigator {
    points: Vec<GeoPoint>,
    stats: Vec<CumulativeStat>,
    cursor: NavigationCursor,
    model: DistanceModel,
    surface: Arc<dyn MapSurface>,
}

impl HistoryNavigator {
    pub fn new(model: DistanceModel, surface: Arc<dyn MapSurface>) -> Self {
        Self {
            points: Vec::new(),
            stats: Vec::new(),
            cursor: NavigationCursor::default(),
            model,
            surface,
        }
    }

    /// Wrap in the shared handle the live controller appends through.
    pub fn shared(self) -> SharedHistory {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn stats(&self) -> &[CumulativeStat] {
        &self.stats
    }

    pub fn cursor(&self) -> NavigationCursor {
        self.cursor
    }

    pub fn is_scrubbing(&self) -> bool {
        self.cursor.active
    }

    pub fn tail(&self) -> Option<&GeoPoint> {
        self.points.last()
    }

    /// Extend the log. Points older than the current tail are dropped.
    ///
    /// Returns the number of points accepted.
    pub fn append(&mut self, points: &[GeoPoint]) -> usize {
        let mut accepted = 0;
        for point in points {
            if let Some(last) = self.points.last() {
                if point.tst < last.tst {
                    debug!(
                        "[History] Dropping out-of-order point at {} (tail {})",
                        point.tst, last.tst
                    );
                    continue;
                }
            }
            self.push(*point);
            accepted += 1;
        }
        accepted
    }

    /// Rebuild log and stats from scratch and return to the live tail.
    pub fn initialize_from(&mut self, points: &[GeoPoint]) {
        self.points.clear();
        self.stats.clear();
        self.cursor = NavigationCursor::default();
        self.points.reserve(points.len());
        self.stats.reserve(points.len());
        let accepted = self.append(points);
        debug!("[History] Initialized with {} points", accepted);
    }

    /// Move the scrub cursor by `delta` points.
    ///
    /// Enters scrub mode at the tail if needed. Overshooting the tail returns to live.
    pub fn seek(&mut self, delta: i64) -> Option<NavigationView> {
        let tail = self.points.len().checked_sub(1)?;
        if !self.cursor.active {
            self.cursor = NavigationCursor {
                active: true,
                index: tail,
            };
        }

        let target = (self.cursor.index as i64).saturating_add(delta);
        if target > tail as i64 {
            self.exit();
        } else {
            self.cursor.index = target.clamp(0, tail as i64) as usize;
            self.render_position();
        }
        self.current_view()
    }

    /// Toggle between the live tail and the first point.
    pub fn jump_to_edge(&mut self) -> Option<NavigationView> {
        if self.cursor.active {
            self.exit();
        } else if self.points.len() > 1 {
            self.cursor = NavigationCursor {
                active: true,
                index: 0,
            };
            self.render_position();
        }
        self.current_view()
    }

    /// Leave scrub mode: full path, no position marker, pan to the tail.
    pub fn exit(&mut self) {
        if !self.cursor.active {
            return;
        }
        self.cursor = NavigationCursor::default();
        self.surface.draw_path(Layer::Live, &self.points, LIVE_COLOR);
        self.surface.hide_marker(Marker::Position);
        if let Some(tail) = self.points.last() {
            self.surface.pan_to(tail);
        }
    }

    pub fn current_view(&self) -> Option<NavigationView> {
        let tail = self.points.len().checked_sub(1)?;
        let index = if self.cursor.active {
            self.cursor.index.min(tail)
        } else {
            tail
        };
        Some(NavigationView {
            index,
            stat: self.stats[index],
            point: self.points[index],
            is_live: !self.cursor.active,
        })
    }

    fn push(&mut self, point: GeoPoint) {
        let stat = match (self.points.last(), self.stats.last(), self.points.first()) {
            (Some(prev), Some(prev_stat), Some(first)) => CumulativeStat {
                tst: point.tst,
                distance_km: prev_stat.distance_km + self.model.segment_km(prev, &point),
                duration_s: point.tst - first.tst,
                point_count: prev_stat.point_count + 1,
            },
            _ => CumulativeStat {
                tst: point.tst,
                distance_km: 0.0,
                duration_s: 0,
                point_count: 1,
            },
        };
        self.points.push(point);
        self.stats.push(stat);
    }

    /// Truncate the live path to the cursor and mark the position.
    fn render_position(&self) {
        let index = self.cursor.index;
        let Some(point) = self.points.get(index) else {
            return;
        };
        self.surface
            .draw_path(Layer::Live, &self.points[..=index], LIVE_COLOR);
        self.surface.show_marker(Marker::Position, point);
        self.surface.pan_to(point);
    }
}
