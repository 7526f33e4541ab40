//! Timed segment-by-segment replay of a ride set or a flat point list.
//!
//! ```text
//! Idle --start--> Running --pause--> Paused --resume--> Running
//! Running --segments exhausted--> Complete
//! Paused --step_forward exhausts segments--> Complete
//! any --stop--> Idle
//! ```
//!
//! The engine is a plain state machine. It arms timers through a [`Scheduler`]
//! and expects the owner to feed expired [`Ticket`]s back via
//! [`PlaybackEngine::on_timer`]. Tickets that do not match the timer the engine
//! is waiting for are dropped, so nothing fires after `stop()` or `pause()`.
//! [`PlaybackEngine::drive`] wires this up on a Tokio task.

use log::{debug, info};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::api::{Acknowledged, DetectRange, TrackKind, TrackerApi};
use crate::geo_utils::{compute_bounds, speed_kmh};
use crate::scheduler::{Scheduler, Ticket, TimerHandle};
use crate::surface::{Layer, MapSurface, Marker, SegmentHandle};
use crate::{GeoPoint, PlaybackConfig, Result, Ride};

/// Color of the flat polyline in basic mode.
const BASIC_COLOR: &str = "#1E90FF";

/// What to animate.
#[derive(Debug, Clone)]
pub enum PlaybackData {
    /// Per-ride segments, colored by ride, with end markers on completion
    Rich(Vec<Ride>),
    /// Adjacent pairs of one flat point list
    Basic(Vec<GeoPoint>),
}

impl PlaybackData {
    /// Run a detection over `range` and fetch the rides of every activity
    /// type it found, oldest first.
    pub async fn fetch_detected<A: TrackerApi>(api: &A, range: DetectRange) -> Result<Self> {
        let detection = api.detect(range).await?.into_result()?;
        let kinds = detection.detected_kinds();
        info!(
            "[Playback] Detected {} points ({:?}), fetching {:?}",
            detection.total_points, detection.timezone, kinds
        );

        let tracks = futures::future::join_all(
            kinds
                .iter()
                .map(|kind| api.history_track(TrackKind::Activity(*kind))),
        )
        .await;

        let mut rides = Vec::new();
        for (kind, track) in kinds.into_iter().zip(tracks) {
            rides.extend(track?.into_result()?.into_rides(kind));
        }
        rides.sort_by_key(|ride| ride.start_ts);
        Ok(PlaybackData::Rich(rides))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    Idle,
    Running,
    Paused,
    /// Finished; behaves like `Idle` for every control
    Complete,
}

/// Reported after every drawn or undone segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub distance_km: f64,
    /// Seconds between the first point and the last drawn point
    pub duration_s: i64,
    pub speed_kmh: f64,
    /// Segments drawn so far
    pub point_index: usize,
    pub total_points: usize,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: i64,
}

pub type ProgressObserver = Box<dyn FnMut(&Progress) + Send>;
pub type CompletionCallback = Box<dyn FnOnce() + Send>;

/// Commands accepted by [`PlaybackEngine::drive`].
pub enum PlaybackCommand {
    Start {
        data: PlaybackData,
        on_complete: Option<CompletionCallback>,
    },
    Pause,
    Resume,
    StepForward,
    StepBack,
    Stop,
}

impl fmt::Debug for PlaybackCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackCommand::Start { data, on_complete } => {
                let (mode, len) = match data {
                    PlaybackData::Rich(rides) => ("rich", rides.len()),
                    PlaybackData::Basic(points) => ("basic", points.len()),
                };
                write!(f, "Start({} x{}, callback={})", mode, len, on_complete.is_some())
            }
            PlaybackCommand::Pause => f.write_str("Pause"),
            PlaybackCommand::Resume => f.write_str("Resume"),
            PlaybackCommand::StepForward => f.write_str("StepForward"),
            PlaybackCommand::StepBack => f.write_str("StepBack"),
            PlaybackCommand::Stop => f.write_str("Stop"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    from: GeoPoint,
    to: GeoPoint,
    /// Index into the ride list (rich mode)
    ride: Option<usize>,
    /// First segment of its ride
    opens_ride: bool,
}

#[derive(Debug, Clone, Copy)]
struct DrawnSegment {
    handle: SegmentHandle,
    distance_before: f64,
}

struct Animation {
    rides: Vec<Ride>,
    segments: Vec<Segment>,
    index: usize,
    distance_km: f64,
    drawn: Vec<DrawnSegment>,
    first_tst: i64,
    delay: Duration,
    on_complete: Option<CompletionCallback>,
    /// Timer currently armed (Running)
    pending: Option<(TimerHandle, Ticket)>,
    /// Continuation stored by `pause` (Paused)
    continuation: Option<Ticket>,
}

/// Timer-driven animator.
pub struct PlaybackEngine {
    config: PlaybackConfig,
    surface: Arc<dyn MapSurface>,
    scheduler: Box<dyn Scheduler>,
    observer: Option<ProgressObserver>,
    state: AnimationState,
    generation: u64,
    animation: Option<Animation>,
    last_progress: Option<Progress>,
}

impl PlaybackEngine {
    pub fn new(
        config: PlaybackConfig,
        surface: Arc<dyn MapSurface>,
        scheduler: Box<dyn Scheduler>,
    ) -> Self {
        Self {
            config,
            surface,
            scheduler,
            observer: None,
            state: AnimationState::Idle,
            generation: 0,
            animation: None,
            last_progress: None,
        }
    }

    /// Register the progress observer, replacing any previous one.
    pub fn set_observer(&mut self, observer: ProgressObserver) {
        self.observer = Some(observer);
    }

    pub fn state(&self) -> AnimationState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, AnimationState::Idle | AnimationState::Complete)
    }

    /// Cumulative distance of the drawn segments.
    pub fn distance_km(&self) -> f64 {
        self.animation.as_ref().map_or(0.0, |a| a.distance_km)
    }

    /// Number of segments drawn so far.
    pub fn index(&self) -> usize {
        self.animation.as_ref().map_or(0, |a| a.index)
    }

    pub fn total_segments(&self) -> usize {
        self.animation.as_ref().map_or(0, |a| a.segments.len())
    }

    /// Segments currently rendered (and undoable).
    pub fn drawn_count(&self) -> usize {
        self.animation.as_ref().map_or(0, |a| a.drawn.len())
    }

    pub fn delay(&self) -> Option<Duration> {
        self.animation.as_ref().map(|a| a.delay)
    }

    /// Most recent progress report, kept after completion.
    pub fn last_progress(&self) -> Option<&Progress> {
        self.last_progress.as_ref()
    }

    /// Start a new animation, stopping any animation already in progress.
    ///
    /// Empty input (no adjacent point pairs) completes immediately.
    pub fn start(&mut self, data: PlaybackData, on_complete: Option<CompletionCallback>) {
        self.stop();
        self.surface.clear_layer(Layer::Playback);
        self.last_progress = None;

        let (rides, segments, all_points) = build_segments(data);
        if segments.is_empty() {
            info!("[Playback] Nothing to animate, completing immediately");
            self.state = AnimationState::Complete;
            if let Some(done) = on_complete {
                done();
            }
            return;
        }

        if let Some(bounds) = compute_bounds(&all_points) {
            self.surface.set_bounds(&bounds);
        }

        let delay = self.config.segment_delay(segments.len());
        info!(
            "[Playback] Starting {} animation: {} segments, {:?} per segment",
            if rides.is_empty() { "basic" } else { "rich" },
            segments.len(),
            delay
        );

        self.generation += 1;
        self.animation = Some(Animation {
            first_tst: segments[0].from.tst,
            rides,
            segments,
            index: 0,
            distance_km: 0.0,
            drawn: Vec::new(),
            delay,
            on_complete,
            pending: None,
            continuation: None,
        });
        self.state = AnimationState::Running;
        self.arm_timer();
    }

    /// Feed an expired timer back to the engine.
    ///
    /// Returns `false` if the ticket is stale (engine stopped, paused or restarted).
    pub fn on_timer(&mut self, ticket: Ticket) -> bool {
        if self.state != AnimationState::Running {
            debug!("[Playback] Ignoring ticket {:?} while {:?}", ticket, self.state);
            return false;
        }
        let Some(animation) = self.animation.as_mut() else {
            return false;
        };
        if animation.pending.map(|(_, expected)| expected) != Some(ticket) {
            debug!("[Playback] Ignoring stale ticket {:?}", ticket);
            return false;
        }
        animation.pending = None;
        self.advance();
        true
    }

    /// Suspend a running animation. No-op unless `Running`.
    pub fn pause(&mut self) -> bool {
        if self.state != AnimationState::Running {
            return false;
        }
        let Some(animation) = self.animation.as_mut() else {
            return false;
        };
        if let Some((handle, _)) = animation.pending.take() {
            self.scheduler.cancel(handle);
        }
        self.generation += 1;
        animation.continuation = Some(Ticket {
            generation: self.generation,
            step: animation.index,
        });
        self.state = AnimationState::Paused;
        debug!("[Playback] Paused at segment {}", animation.index);
        true
    }

    /// Re-invoke the continuation stored by `pause`. No-op unless `Paused`.
    pub fn resume(&mut self) -> bool {
        if self.state != AnimationState::Paused {
            return false;
        }
        let Some(animation) = self.animation.as_mut() else {
            return false;
        };
        let Some(continuation) = animation.continuation.take() else {
            return false;
        };
        if continuation.step != animation.index {
            return false;
        }
        debug!("[Playback] Resuming at segment {}", animation.index);
        self.state = AnimationState::Running;
        self.advance();
        true
    }

    /// Draw exactly one more segment without arming a timer. Only while `Paused`.
    pub fn step_forward(&mut self) -> bool {
        if self.state != AnimationState::Paused {
            return false;
        }
        let Some(animation) = self.animation.as_ref() else {
            return false;
        };
        if animation.index >= animation.segments.len() {
            return false;
        }

        self.draw_next();

        let Some(animation) = self.animation.as_mut() else {
            return false;
        };
        if animation.index == animation.segments.len() {
            self.complete();
        } else {
            animation.continuation = Some(Ticket {
                generation: self.generation,
                step: animation.index,
            });
        }
        true
    }

    /// Undo the most recently drawn segment. Only while `Paused`.
    pub fn step_back(&mut self) -> bool {
        if self.state != AnimationState::Paused {
            return false;
        }
        let Some(animation) = self.animation.as_mut() else {
            return false;
        };
        let Some(last) = animation.drawn.pop() else {
            return false;
        };

        self.surface.remove_segment(last.handle);
        animation.distance_km = last.distance_before.max(0.0);
        animation.index -= 1;

        let undone = animation.segments[animation.index];
        if undone.opens_ride {
            if let Some(ride) = undone.ride.and_then(|i| animation.rides.get(i)) {
                self.surface.hide_marker(Marker::RideStart {
                    layer: Layer::Playback,
                    ride_number: ride.ride_number,
                });
            }
        }

        let position = if animation.index > 0 {
            let point = animation.segments[animation.index - 1].to;
            if self.config.follow {
                self.surface.pan_to(&point);
            }
            point
        } else {
            animation.segments[0].from
        };
        animation.continuation = Some(Ticket {
            generation: self.generation,
            step: animation.index,
        });

        self.report_progress(position);
        true
    }

    /// Cancel pending timers and discard the animation. Always safe.
    pub fn stop(&mut self) {
        if let Some(mut animation) = self.animation.take() {
            if let Some((handle, _)) = animation.pending.take() {
                self.scheduler.cancel(handle);
            }
            debug!(
                "[Playback] Stopped at segment {}/{}",
                animation.index,
                animation.segments.len()
            );
        }
        self.generation += 1;
        self.state = AnimationState::Idle;
    }

    /// Apply a driver command. Returns whether it changed anything.
    pub fn apply(&mut self, command: PlaybackCommand) -> bool {
        match command {
            PlaybackCommand::Start { data, on_complete } => {
                self.start(data, on_complete);
                true
            }
            PlaybackCommand::Pause => self.pause(),
            PlaybackCommand::Resume => self.resume(),
            PlaybackCommand::StepForward => self.step_forward(),
            PlaybackCommand::StepBack => self.step_back(),
            PlaybackCommand::Stop => {
                self.stop();
                true
            }
        }
    }

    /// Run the engine until the command channel closes.
    ///
    /// `tickets` is the receiver paired with the engine's [`TokioScheduler`](crate::TokioScheduler).
    pub async fn drive(
        &mut self,
        mut tickets: mpsc::UnboundedReceiver<Ticket>,
        mut commands: mpsc::Receiver<PlaybackCommand>,
    ) {
        loop {
            tokio::select! {
                Some(ticket) = tickets.recv() => {
                    self.on_timer(ticket);
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        self.apply(command);
                    }
                    None => break,
                },
            }
        }
        self.stop();
    }

    fn arm_timer(&mut self) {
        let generation = self.generation;
        let Some(animation) = self.animation.as_mut() else {
            return;
        };
        let ticket = Ticket {
            generation,
            step: animation.index,
        };
        let handle = self.scheduler.schedule(animation.delay, ticket);
        animation.pending = Some((handle, ticket));
    }

    /// Draw the next segment, then either finish or arm the next timer.
    fn advance(&mut self) {
        self.draw_next();
        let finished = self
            .animation
            .as_ref()
            .map_or(true, |a| a.index >= a.segments.len());
        if finished {
            self.complete();
        } else {
            self.arm_timer();
        }
    }

    fn draw_next(&mut self) {
        let Some(animation) = self.animation.as_mut() else {
            return;
        };
        let Some(segment) = animation.segments.get(animation.index).copied() else {
            return;
        };
        let ride = segment.ride.and_then(|i| animation.rides.get(i));
        let color = ride.map_or(BASIC_COLOR, |r| r.draw_color());

        if segment.opens_ride {
            if let Some(ride) = ride {
                self.surface.show_marker(
                    Marker::RideStart {
                        layer: Layer::Playback,
                        ride_number: ride.ride_number,
                    },
                    &segment.from,
                );
            }
        }

        let handle = self
            .surface
            .draw_segment(Layer::Playback, &segment.from, &segment.to, color);
        animation.drawn.push(DrawnSegment {
            handle,
            distance_before: animation.distance_km,
        });
        animation.distance_km += self.config.distance.segment_km(&segment.from, &segment.to);
        animation.index += 1;

        if self.config.follow {
            self.surface.pan_to(&segment.to);
        }
        self.report_progress(segment.to);
    }

    fn report_progress(&mut self, point: GeoPoint) {
        let Some(animation) = self.animation.as_ref() else {
            return;
        };
        let duration_s = point.tst - animation.first_tst;
        let progress = Progress {
            distance_km: animation.distance_km,
            duration_s,
            speed_kmh: speed_kmh(animation.distance_km, duration_s),
            point_index: animation.index,
            total_points: animation.segments.len(),
            lat: point.lat,
            lng: point.lng,
            timestamp: point.tst,
        };
        if let Some(observer) = self.observer.as_mut() {
            observer(&progress);
        }
        self.last_progress = Some(progress);
    }

    fn complete(&mut self) {
        let Some(mut animation) = self.animation.take() else {
            return;
        };
        if let Some((handle, _)) = animation.pending.take() {
            self.scheduler.cancel(handle);
        }

        for ride in &animation.rides {
            if let Some(end) = ride.points.last() {
                self.surface.show_marker(
                    Marker::RideEnd {
                        layer: Layer::Playback,
                        ride_number: ride.ride_number,
                    },
                    end,
                );
            }
        }

        info!(
            "[Playback] Complete: {} segments, {:.2} km",
            animation.segments.len(),
            animation.distance_km
        );
        self.generation += 1;
        self.state = AnimationState::Complete;

        // Last, so the callback may start another animation.
        if let Some(done) = animation.on_complete.take() {
            done();
        }
    }
}

/// Flatten the input into drawable segments. Also returns every point, for bounds.
fn build_segments(data: PlaybackData) -> (Vec<Ride>, Vec<Segment>, Vec<GeoPoint>) {
    match data {
        PlaybackData::Basic(points) => {
            let segments = points
                .windows(2)
                .map(|w| Segment {
                    from: w[0],
                    to: w[1],
                    ride: None,
                    opens_ride: false,
                })
                .collect();
            (Vec::new(), segments, points)
        }
        PlaybackData::Rich(rides) => {
            let mut segments = Vec::new();
            let mut all_points = Vec::new();
            for (ride_idx, ride) in rides.iter().enumerate() {
                all_points.extend_from_slice(&ride.points);
                segments.extend(ride.points.windows(2).enumerate().map(|(i, w)| Segment {
                    from: w[0],
                    to: w[1],
                    ride: Some(ride_idx),
                    opens_ride: i == 0,
                }));
            }
            (rides, segments, all_points)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use crate::surface::testing::{Call, RecordingSurface};
    use crate::{ActivityKind, TokioScheduler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Harness {
        engine: PlaybackEngine,
        scheduler: ManualScheduler,
        surface: Arc<RecordingSurface>,
        reports: Arc<Mutex<Vec<Progress>>>,
    }

    impl Harness {
        fn new() -> Self {
            let scheduler = ManualScheduler::new();
            let surface = Arc::new(RecordingSurface::default());
            let mut engine = PlaybackEngine::new(
                PlaybackConfig::default(),
                surface.clone(),
                Box::new(scheduler.clone()),
            );
            let reports = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&reports);
            engine.set_observer(Box::new(move |p| sink.lock().unwrap().push(p.clone())));
            Self { engine, scheduler, surface, reports }
        }

        /// Fire `n` timers (or fewer if the engine stops arming them).
        fn fire(&mut self, n: usize) {
            for _ in 0..n {
                match self.scheduler.next_ticket() {
                    Some(ticket) => {
                        self.engine.on_timer(ticket);
                    }
                    None => break,
                }
            }
        }

        fn run_to_end(&mut self) {
            while let Some(ticket) = self.scheduler.next_ticket() {
                self.engine.on_timer(ticket);
            }
        }

        fn report_count(&self) -> usize {
            self.reports.lock().unwrap().len()
        }
    }

    fn counter() -> (Arc<AtomicUsize>, CompletionCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    /// Points ~111 m apart heading north, one every 10 s.
    fn track(n: usize) -> Vec<GeoPoint> {
        (0..n)
            .map(|i| GeoPoint::new(45.5 + i as f64 * 0.001, -73.5, 1_000 + i as i64 * 10))
            .collect()
    }

    fn ride(number: u32, points: Vec<GeoPoint>) -> Ride {
        Ride {
            kind: Some(ActivityKind::Bike),
            ride_number: number,
            start_ts: points.first().map_or(0, |p| p.tst),
            end_ts: points.last().map_or(0, |p| p.tst),
            points,
            distance_km: 0.0,
            duration_s: 0,
            avg_speed_kmh: 0.0,
            color: None,
        }
    }

    #[test]
    fn test_basic_ten_points_draws_nine_segments() {
        let mut h = Harness::new();
        let (done, on_complete) = counter();

        h.engine.start(PlaybackData::Basic(track(10)), Some(on_complete));
        assert_eq!(h.engine.state(), AnimationState::Running);
        assert_eq!(h.engine.delay(), Some(Duration::from_millis(100)));

        h.fire(8);
        assert_eq!(done.load(Ordering::SeqCst), 0);

        h.fire(1);
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(h.scheduler.now(), Duration::from_millis(900));
        assert_eq!(h.surface.live_segments(Layer::Playback), 9);
        assert_eq!(h.report_count(), 9);
        assert!(h.engine.is_idle());
        assert_eq!(h.scheduler.pending(), 0);

        // Nothing else fires
        h.run_to_end();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_progress_report() {
        let mut h = Harness::new();
        h.engine.start(PlaybackData::Basic(track(3)), None);
        h.run_to_end();

        let last = h.engine.last_progress().unwrap().clone();
        assert_eq!(last.point_index, 2);
        assert_eq!(last.total_points, 2);
        assert_eq!(last.duration_s, 20);
        assert_eq!(last.timestamp, 1_020);
        assert!(last.distance_km > 0.2 && last.distance_km < 0.25);
        assert!((last.speed_kmh - last.distance_km / 20.0 * 3600.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input_completes_immediately() {
        for points in [vec![], track(1)] {
            let mut h = Harness::new();
            let (done, on_complete) = counter();
            h.engine.start(PlaybackData::Basic(points), Some(on_complete));
            assert_eq!(done.load(Ordering::SeqCst), 1);
            assert!(h.engine.is_idle());
            assert_eq!(h.scheduler.pending(), 0);
            assert_eq!(h.surface.live_segments(Layer::Playback), 0);
        }
    }

    #[test]
    fn test_pause_cancels_timer_and_ignores_stale_ticket() {
        let mut h = Harness::new();
        h.engine.start(PlaybackData::Basic(track(10)), None);
        h.fire(3);

        let before = h.scheduler.pending();
        assert_eq!(before, 1);
        assert!(h.engine.pause());
        assert_eq!(h.engine.state(), AnimationState::Paused);
        assert_eq!(h.scheduler.pending(), 0);

        // A ticket that slipped through before the cancel is ignored
        let stale = Ticket { generation: 1, step: 3 };
        assert!(!h.engine.on_timer(stale));
        assert_eq!(h.engine.index(), 3);

        // Pausing twice is a no-op
        assert!(!h.engine.pause());
    }

    #[test]
    fn test_resume_continues_without_dropping_or_duplicating() {
        let mut h = Harness::new();
        let (done, on_complete) = counter();
        h.engine.start(PlaybackData::Basic(track(10)), Some(on_complete));
        h.fire(4);
        assert!(h.engine.pause());

        assert!(h.engine.resume());
        // The continuation draws immediately
        assert_eq!(h.engine.index(), 5);
        assert_eq!(h.engine.state(), AnimationState::Running);

        h.run_to_end();
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(h.surface.live_segments(Layer::Playback), 9);
        assert_eq!(h.report_count(), 9);

        // Resume outside Paused is a no-op
        assert!(!h.engine.resume());
    }

    #[test]
    fn test_steps_require_pause() {
        let mut h = Harness::new();
        assert!(!h.engine.step_forward());
        assert!(!h.engine.step_back());

        h.engine.start(PlaybackData::Basic(track(5)), None);
        h.fire(1);
        assert!(!h.engine.step_forward());
        assert!(!h.engine.step_back());
        assert_eq!(h.engine.index(), 1);
    }

    #[test]
    fn test_step_forward_draws_without_scheduling() {
        let mut h = Harness::new();
        h.engine.start(PlaybackData::Basic(track(10)), None);
        h.fire(2);
        h.engine.pause();

        assert!(h.engine.step_forward());
        assert_eq!(h.engine.index(), 3);
        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(h.surface.last_pan(), Some(track(10)[3]));
        assert_eq!(h.report_count(), 3);
    }

    #[test]
    fn test_step_round_trip_restores_state() {
        let mut h = Harness::new();
        h.engine.start(PlaybackData::Basic(track(10)), None);
        h.fire(2);
        h.engine.pause();

        let distance = h.engine.distance_km();
        let index = h.engine.index();
        let drawn = h.surface.live_segments(Layer::Playback);

        for _ in 0..4 {
            assert!(h.engine.step_forward());
        }
        assert!(h.engine.distance_km() > distance);
        for _ in 0..4 {
            assert!(h.engine.step_back());
        }

        assert_eq!(h.engine.distance_km(), distance);
        assert_eq!(h.engine.index(), index);
        assert_eq!(h.engine.drawn_count(), index);
        assert_eq!(h.surface.live_segments(Layer::Playback), drawn);
        assert_eq!(h.surface.last_pan(), Some(track(10)[2]));
    }

    #[test]
    fn test_step_back_to_start_leaves_view() {
        let mut h = Harness::new();
        h.engine.start(PlaybackData::Basic(track(5)), None);
        h.fire(1);
        h.engine.pause();

        let pans_before = h.surface.calls().iter().filter(|c| matches!(c, Call::Pan(_))).count();
        assert!(h.engine.step_back());
        let pans_after = h.surface.calls().iter().filter(|c| matches!(c, Call::Pan(_))).count();
        assert_eq!(pans_before, pans_after);
        assert_eq!(h.engine.distance_km(), 0.0);
        assert_eq!(h.engine.index(), 0);

        // Nothing left to undo
        assert!(!h.engine.step_back());

        // Resume picks up from the first segment again
        assert!(h.engine.resume());
        assert_eq!(h.engine.index(), 1);
    }

    #[test]
    fn test_step_forward_to_end_completes() {
        let mut h = Harness::new();
        let (done, on_complete) = counter();
        h.engine.start(PlaybackData::Basic(track(4)), Some(on_complete));
        h.fire(1);
        h.engine.pause();

        assert!(h.engine.step_forward());
        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert!(h.engine.step_forward());
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(h.engine.is_idle());
        assert!(!h.engine.step_forward());
    }

    #[test]
    fn test_stop_is_immediate() {
        let mut h = Harness::new();
        let (done, on_complete) = counter();
        h.engine.start(PlaybackData::Basic(track(10)), Some(on_complete));
        h.fire(3);

        h.engine.stop();
        assert_eq!(h.engine.state(), AnimationState::Idle);
        assert_eq!(h.scheduler.pending(), 0);
        assert!(!h.engine.on_timer(Ticket { generation: 1, step: 3 }));
        assert_eq!(done.load(Ordering::SeqCst), 0);
        assert_eq!(h.engine.index(), 0);

        // Safe to call again
        h.engine.stop();
    }

    #[test]
    fn test_start_while_running_restarts() {
        let mut h = Harness::new();
        let (first_done, first) = counter();
        let (second_done, second) = counter();

        h.engine.start(PlaybackData::Basic(track(10)), Some(first));
        h.fire(2);
        h.engine.start(PlaybackData::Basic(track(3)), Some(second));
        assert_eq!(h.scheduler.pending(), 1);

        h.run_to_end();
        assert_eq!(first_done.load(Ordering::SeqCst), 0);
        assert_eq!(second_done.load(Ordering::SeqCst), 1);
        assert!(h.surface.calls().contains(&Call::Clear(Layer::Playback)));
    }

    #[test]
    fn test_rich_mode_segments_stay_within_rides() {
        let mut h = Harness::new();
        let all = track(6);
        let rides = vec![
            ride(1, all[..3].to_vec()),
            ride(2, all[3..].to_vec()),
            ride(3, vec![]),
        ];

        h.engine.start(PlaybackData::Rich(rides), None);
        assert_eq!(h.engine.total_segments(), 4);
        h.run_to_end();

        let calls = h.surface.calls();
        let ends: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Show(Marker::RideEnd { ride_number, .. }, p) => Some((*ride_number, p.tst)),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![(1, all[2].tst), (2, all[5].tst)]);

        let starts = calls
            .iter()
            .filter(|c| matches!(c, Call::Show(Marker::RideStart { .. }, _)))
            .count();
        assert_eq!(starts, 2);
        assert!(calls.iter().any(|c| matches!(c, Call::Bounds(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_with_tokio_scheduler() {
        let (scheduler, tickets) = TokioScheduler::new();
        let mut engine = PlaybackEngine::new(
            PlaybackConfig::default(),
            Arc::new(RecordingSurface::default()),
            Box::new(scheduler),
        );
        let (commands, command_rx) = mpsc::channel(8);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let driver = tokio::spawn(async move {
            engine.drive(tickets, command_rx).await;
            engine
        });

        commands
            .send(PlaybackCommand::Start {
                data: PlaybackData::Basic(track(10)),
                on_complete: Some(Box::new(move || {
                    let _ = done_tx.send(());
                })),
            })
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        done_rx.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(900));

        drop(commands);
        let engine = driver.await.unwrap();
        assert!(engine.is_idle());
        assert_eq!(engine.last_progress().unwrap().point_index, 9);
    }
}
