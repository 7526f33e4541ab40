//! Map-surface capability interface.
//!
//! The engine never renders anything itself; it tells a [`MapSurface`] what to
//! draw. Every method has a no-op default so a surface only implements what it
//! can actually display, and [`NoopSurface`] implements nothing at all.

use crate::{ActivityKind, Bounds, GeoPoint};

/// Color of the raw live polyline.
pub const LIVE_COLOR: &str = "#FF4500";

/// Opaque handle to a drawn segment, used to undo it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SegmentHandle(pub u64);

/// Rendering layers the engine draws into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Raw polyline of the live point log
    Live,
    /// Per-ride rendering of one activity type
    Activity(ActivityKind),
    /// Segments drawn by the playback animation
    Playback,
}

/// Markers the engine places on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Scrub position while viewing history
    Position,
    /// Start of a ride in a rich layer
    RideStart { layer: Layer, ride_number: u32 },
    /// End of a ride in a rich layer
    RideEnd { layer: Layer, ride_number: u32 },
}

/// Rendering collaborator.
///
/// Implementations are shared between the playback driver and the live
/// poller, so methods take `&self`; use interior mutability as needed.
#[allow(unused_variables)]
pub trait MapSurface: Send + Sync {
    /// Draw one segment and return a handle that can later remove it.
    fn draw_segment(&self, layer: Layer, from: &GeoPoint, to: &GeoPoint, color: &str) -> SegmentHandle {
        SegmentHandle::default()
    }

    fn remove_segment(&self, handle: SegmentHandle) {}

    /// Replace the contents of `layer` with a single path through `points`.
    fn draw_path(&self, layer: Layer, points: &[GeoPoint], color: &str) {}

    fn clear_layer(&self, layer: Layer) {}

    fn set_bounds(&self, bounds: &Bounds) {}

    fn pan_to(&self, point: &GeoPoint) {}

    fn show_marker(&self, marker: Marker, point: &GeoPoint) {}

    fn hide_marker(&self, marker: Marker) {}
}

/// Surface that renders nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSurface;

impl MapSurface for NoopSurface {}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Everything a [`RecordingSurface`] was asked to do.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Segment { layer: Layer, handle: SegmentHandle, to: GeoPoint },
        Remove(SegmentHandle),
        Path { layer: Layer, len: usize },
        Clear(Layer),
        Bounds(Bounds),
        Pan(GeoPoint),
        Show(Marker, GeoPoint),
        Hide(Marker),
    }

    #[derive(Default)]
    pub struct RecordingSurface {
        next_handle: AtomicU64,
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingSurface {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        /// Segments currently on the map (drawn and not removed).
        pub fn live_segments(&self, layer: Layer) -> usize {
            let calls = self.calls();
            let removed: Vec<SegmentHandle> = calls
                .iter()
                .filter_map(|c| match c {
                    Call::Remove(h) => Some(*h),
                    _ => None,
                })
                .collect();
            calls
                .iter()
                .filter(|c| matches!(c, Call::Segment { layer: l, handle, .. } if *l == layer && !removed.contains(handle)))
                .count()
        }

        pub fn last_pan(&self) -> Option<GeoPoint> {
            self.calls().iter().rev().find_map(|c| match c {
                Call::Pan(p) => Some(*p),
                _ => None,
            })
        }

        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl MapSurface for RecordingSurface {
        fn draw_segment(&self, layer: Layer, _from: &GeoPoint, to: &GeoPoint, _color: &str) -> SegmentHandle {
            let handle = SegmentHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
            self.push(Call::Segment { layer, handle, to: *to });
            handle
        }

        fn remove_segment(&self, handle: SegmentHandle) {
            self.push(Call::Remove(handle));
        }

        fn draw_path(&self, layer: Layer, points: &[GeoPoint], _color: &str) {
            self.push(Call::Path { layer, len: points.len() });
        }

        fn clear_layer(&self, layer: Layer) {
            self.push(Call::Clear(layer));
        }

        fn set_bounds(&self, bounds: &Bounds) {
            self.push(Call::Bounds(*bounds));
        }

        fn pan_to(&self, point: &GeoPoint) {
            self.push(Call::Pan(*point));
        }

        fn show_marker(&self, marker: Marker, point: &GeoPoint) {
            self.push(Call::Show(marker, *point));
        }

        fn hide_marker(&self, marker: Marker) {
            self.push(Call::Hide(marker));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_surface_accepts_everything() {
        let surface = NoopSurface;
        let p = GeoPoint::new(45.5, -73.5, 0);
        let handle = surface.draw_segment(Layer::Live, &p, &p, "#000");
        surface.remove_segment(handle);
        surface.draw_path(Layer::Playback, &[p], "#000");
        surface.clear_layer(Layer::Activity(ActivityKind::Car));
        surface.pan_to(&p);
        surface.show_marker(Marker::Position, &p);
        surface.hide_marker(Marker::Position);
        assert_eq!(handle, SegmentHandle::default());
    }
}
