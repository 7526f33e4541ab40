//! Live session lifecycle and the poll loop.
//!
//! A [`LiveSessionController`] attaches to the recorder (fresh, join, resume or
//! reset), then polls on a fixed period. Each poll sends the watermark (the
//! `tst` of the last point drawn), appends whatever is newer to the shared
//! history log, draws it incrementally on the live layer and redraws any
//! activity layer whose ride or point count moved.
//!
//! At most one poll is in flight. Starting a new session or stopping the
//! poller bumps an epoch; a response that comes back under an old epoch is
//! dropped without touching local state.

use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::{
    Acknowledged, PollRequest, PollResponse, SessionMode, SessionResponse, StartRequest,
    StatsByKind, StatusResponse, TrackKind, TrackerApi,
};
use crate::history::{HistoryNavigator, SharedHistory};
use crate::surface::{Layer, MapSurface, Marker, LIVE_COLOR};
use crate::{ActivityKind, GeoPoint, Result, Ride, TrackerConfig, TrackerError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Session status
// ============================================================================

/// What the recorder knows about the current session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub has_session: bool,
    pub is_active: bool,
    pub is_stale: bool,
    pub age_days: Option<f64>,
    pub start_time: Option<String>,
    pub start_timestamp: Option<i64>,
    pub total_points: usize,
}

/// The choice a caller should offer for a given [`SessionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPrompt {
    /// Nothing to attach to
    Fresh,
    /// Another client is recording right now
    Join,
    /// A persisted session exists but nothing is recording
    Resume { stale: bool },
}

impl SessionStatus {
    fn from_response(response: &StatusResponse, stale_after_days: f64) -> Self {
        let is_stale = response.is_stale.unwrap_or_else(|| {
            response
                .age_days
                .map(|age| age > stale_after_days)
                .unwrap_or(false)
        });
        Self {
            has_session: response.has_session,
            is_active: response.is_active,
            is_stale,
            age_days: response.age_days,
            start_time: response.start_time_str.clone(),
            start_timestamp: response.start_timestamp,
            total_points: response.total_points,
        }
    }

    pub fn prompt(&self) -> SessionPrompt {
        if !self.has_session {
            SessionPrompt::Fresh
        } else if self.is_active {
            SessionPrompt::Join
        } else {
            SessionPrompt::Resume {
                stale: self.is_stale,
            }
        }
    }
}

/// How to attach to the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartIntent {
    /// New session, or join if one is already active
    Fresh,
    Join,
    /// Continue a persisted, inactive session
    Resume,
    /// Discard the persisted session and start over
    Reset,
}

impl StartIntent {
    fn request(self) -> StartRequest {
        match self {
            StartIntent::Fresh | StartIntent::Join => StartRequest::default(),
            StartIntent::Resume => StartRequest {
                resume: true,
                reset: false,
            },
            StartIntent::Reset => StartRequest {
                resume: false,
                reset: true,
            },
        }
    }

    fn expected_mode(self) -> SessionMode {
        match self {
            StartIntent::Fresh | StartIntent::Reset => SessionMode::Fresh,
            StartIntent::Join => SessionMode::Joined,
            StartIntent::Resume => SessionMode::Resumed,
        }
    }
}

// ============================================================================
// Snapshot and events
// ============================================================================

/// Last known session state, merged field by field from every successful poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub mode: Option<SessionMode>,
    pub start_ts: Option<i64>,
    pub start_time_str: Option<String>,
    pub timezone: Option<String>,
    pub total_points: usize,
    pub total_distance_km: f64,
    pub total_duration_s: i64,
    pub last_point_time: Option<String>,
    pub stats_by_type: StatsByKind,
}

impl SessionSnapshot {
    fn from_session(mode: SessionMode, response: &SessionResponse) -> Self {
        Self {
            mode: Some(mode),
            start_ts: response.start_timestamp,
            start_time_str: response.start_time_str.clone(),
            timezone: response.timezone.clone(),
            total_points: response.total_points.unwrap_or(0),
            total_distance_km: response.total_distance.unwrap_or(0.0),
            total_duration_s: response.total_duration.unwrap_or(0),
            last_point_time: response.last_point_time.clone(),
            stats_by_type: response.stats.clone().unwrap_or_default(),
        }
    }

    fn merge_poll(&mut self, response: &PollResponse) {
        if let Some(total) = response.total_points {
            self.total_points = total;
        }
        if let Some(distance) = response.total_distance {
            self.total_distance_km = distance;
        }
        if let Some(duration) = response.total_duration {
            self.total_duration_s = duration;
        }
        if let Some(time) = &response.last_point_time {
            self.last_point_time = Some(time.clone());
        }
        if let Some(stats) = &response.stats {
            self.stats_by_type
                .extend(stats.iter().map(|(kind, s)| (*kind, s.clone())));
        }
    }
}

/// Things the presentation layer may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// An activity layer was cleared and redrawn from a fresh fetch.
    /// `animate` is set on the first redraw after a session start.
    LayerRedrawn {
        kind: ActivityKind,
        rides: Vec<Ride>,
        animate: bool,
    },
    /// Points of a resumed session, offered for animated replay
    BacklogReplay { points: Vec<GeoPoint> },
    PointsAppended { count: usize, watermark: i64 },
}

/// Result of a single [`LiveSessionController::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll was still in flight
    Skipped,
    /// The session was restarted or polling stopped while the request was out
    Discarded,
    Applied {
        new_points: usize,
        redrawn: Vec<ActivityKind>,
    },
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Default)]
struct LiveState {
    snapshot: Option<SessionSnapshot>,
    watermark: i64,
    /// `(ride count, point count)` per activity as of the last redraw
    counters: HashMap<ActivityKind, (u32, usize)>,
    first_animation_shown: bool,
    events: Vec<LiveEvent>,
}

struct Inner<A> {
    api: A,
    config: TrackerConfig,
    surface: Arc<dyn MapSurface>,
    history: SharedHistory,
    state: Mutex<LiveState>,
    in_flight: AtomicBool,
    epoch: AtomicU64,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl<A> Inner<A> {
    /// Drop any response still on the wire and free the single-flight slot.
    fn invalidate_polls(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.in_flight.store(false, Ordering::Release);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }
}

/// Releases the single-flight slot unless the epoch moved on, in which case
/// whoever moved it already did.
struct FlightGuard<'a, A> {
    inner: &'a Inner<A>,
    epoch: u64,
}

impl<A> Drop for FlightGuard<'_, A> {
    fn drop(&mut self) {
        if self.inner.is_current(self.epoch) {
            self.inner.in_flight.store(false, Ordering::Release);
        }
    }
}

/// Drives one live session against a [`TrackerApi`].
///
/// Cheap to clone; clones share the same session.
pub struct LiveSessionController<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for LiveSessionController<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: TrackerApi> LiveSessionController<A> {
    pub fn new(api: A, config: TrackerConfig, surface: Arc<dyn MapSurface>) -> Self {
        let history = HistoryNavigator::new(config.distance, Arc::clone(&surface)).shared();
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                surface,
                history,
                state: Mutex::new(LiveState::default()),
                in_flight: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn history(&self) -> SharedHistory {
        Arc::clone(&self.inner.history)
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        lock(&self.inner.state).snapshot.clone()
    }

    pub fn watermark(&self) -> i64 {
        lock(&self.inner.state).watermark
    }

    pub fn drain_events(&self) -> Vec<LiveEvent> {
        std::mem::take(&mut lock(&self.inner.state).events)
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.inner.poller)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn check_status(&self) -> Result<SessionStatus> {
        let response = self.inner.api.session_status().await?.into_result()?;
        let status = SessionStatus::from_response(&response, self.inner.config.stale_after_days);
        debug!(
            "[Live] Status: has_session={} active={} stale={} points={}",
            status.has_session, status.is_active, status.is_stale, status.total_points
        );
        Ok(status)
    }

    /// Attach to the recorder.
    ///
    /// On failure nothing local changes. On success local bookkeeping follows
    /// the mode the recorder reports.
    pub async fn start(&self, intent: StartIntent) -> Result<SessionSnapshot> {
        let response = self
            .inner
            .api
            .start_session(intent.request())
            .await
            .and_then(Acknowledged::into_result)
            .map_err(|e| {
                warn!("[Live] Session start ({:?}) failed: {}", intent, e);
                e
            })?;

        let mode = response.mode.unwrap_or_else(|| intent.expected_mode());
        info!(
            "[Live] Session {:?} (start {:?}, {} points)",
            mode,
            response.start_time_str,
            response.total_points.unwrap_or(0)
        );

        self.inner.invalidate_polls();
        match mode {
            SessionMode::Fresh => self.reset_local(),
            SessionMode::Joined => self.attach(false).await,
            SessionMode::Resumed => self.attach(true).await,
        }
        self.inner.invalidate_polls();

        let snapshot = SessionSnapshot::from_session(mode, &response);
        lock(&self.inner.state).snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    fn clear_layers(&self) {
        self.inner.surface.clear_layer(Layer::Live);
        for kind in ActivityKind::ALL {
            self.inner.surface.clear_layer(Layer::Activity(kind));
        }
    }

    fn reset_local(&self) {
        self.clear_layers();
        lock(&self.inner.history).initialize_from(&[]);
        *lock(&self.inner.state) = LiveState::default();
    }

    /// Load the existing track into history. Activity counters are reset so
    /// the next poll redraws every layer once.
    async fn attach(&self, replay: bool) {
        let points = match self
            .inner
            .api
            .track(TrackKind::All)
            .await
            .and_then(Acknowledged::into_result)
        {
            Ok(track) => track.points,
            Err(e) => {
                warn!("[Live] Could not load existing track: {}", e);
                Vec::new()
            }
        };

        self.clear_layers();
        let watermark = {
            let mut history = lock(&self.inner.history);
            history.initialize_from(&points);
            history.tail().map(|p| p.tst).unwrap_or(0)
        };
        if !points.is_empty() {
            self.inner.surface.draw_path(Layer::Live, &points, LIVE_COLOR);
            if let Some(tail) = points.last() {
                self.inner.surface.pan_to(tail);
            }
        }
        info!(
            "[Live] Attached with {} points, watermark {}",
            points.len(),
            watermark
        );

        let mut state = lock(&self.inner.state);
        *state = LiveState {
            watermark,
            first_animation_shown: replay,
            ..LiveState::default()
        };
        if replay && !points.is_empty() {
            state.events.push(LiveEvent::BacklogReplay { points });
        }
    }

    /// One poll round trip. A no-op while another poll is in flight.
    ///
    /// Failures change nothing and are retried on the next tick.
    pub async fn poll(&self) -> Result<PollOutcome> {
        let inner = &*self.inner;
        if inner.in_flight.swap(true, Ordering::AcqRel) {
            debug!("[Live] Poll already in flight, skipping");
            return Ok(PollOutcome::Skipped);
        }
        let epoch = inner.epoch.load(Ordering::Acquire);
        let _guard = FlightGuard { inner, epoch };

        let watermark = lock(&inner.state).watermark;
        let response = inner
            .api
            .poll(PollRequest {
                last_drawn_timestamp: watermark,
            })
            .await;
        if !inner.is_current(epoch) {
            debug!("[Live] Discarding poll response from a previous session");
            return Ok(PollOutcome::Discarded);
        }
        let response = response.and_then(Acknowledged::into_result).map_err(|e| {
            warn!("[Live] Poll failed: {}", e);
            e
        })?;

        let Some(new_points) = self.apply_points(&response, epoch) else {
            return Ok(PollOutcome::Discarded);
        };
        let changed = {
            let mut state = lock(&inner.state);
            if !inner.is_current(epoch) {
                return Ok(PollOutcome::Discarded);
            }
            state
                .snapshot
                .get_or_insert_with(SessionSnapshot::default)
                .merge_poll(&response);
            changed_layers(&state.counters, response.stats.as_ref())
        };

        let mut redrawn = Vec::new();
        if !changed.is_empty() {
            redrawn = self.redraw_layers(&changed, epoch).await;
            if !inner.is_current(epoch) {
                return Ok(PollOutcome::Discarded);
            }
        }

        Ok(PollOutcome::Applied {
            new_points,
            redrawn,
        })
    }

    /// Append the points newer than the watermark and draw them.
    ///
    /// `None` if the epoch moved on; the check and the append happen under
    /// the same locks a session reset takes.
    fn apply_points(&self, response: &PollResponse, epoch: u64) -> Option<usize> {
        let inner = &*self.inner;
        let mut state = lock(&inner.state);
        let mut history = lock(&inner.history);
        if !inner.is_current(epoch) {
            debug!("[Live] Session changed before points were applied");
            return None;
        }

        let watermark = state.watermark;
        let fresh: Vec<GeoPoint> = response
            .points_to_draw
            .iter()
            .filter(|p| p.tst > watermark)
            .copied()
            .collect();
        let Some(last) = fresh.last() else {
            return Some(0);
        };

        let before = history.len();
        let accepted = history.append(&fresh);
        if !history.is_scrubbing() {
            let drawn = &history.points()[before.saturating_sub(1)..];
            for pair in drawn.windows(2) {
                inner
                    .surface
                    .draw_segment(Layer::Live, &pair[0], &pair[1], LIVE_COLOR);
            }
            if let Some(tail) = history.tail() {
                inner.surface.pan_to(tail);
            }
        }

        state.watermark = last.tst;
        state.events.push(LiveEvent::PointsAppended {
            count: accepted,
            watermark: last.tst,
        });
        debug!(
            "[Live] Appended {} points, watermark {} (tail {:?})",
            accepted,
            last.tst,
            history.tail().map(|p| p.tst)
        );
        Some(accepted)
    }

    /// Refetch and redraw each changed activity layer. A layer whose counts
    /// dropped to zero is cleared without a fetch. Counters only move for
    /// layers that were actually redrawn.
    async fn redraw_layers(
        &self,
        changed: &[(ActivityKind, (u32, usize))],
        epoch: u64,
    ) -> Vec<ActivityKind> {
        let inner = &*self.inner;
        let fetches = changed.iter().map(|(kind, counters)| async move {
            if *counters == (0, 0) {
                None
            } else {
                Some(inner.api.track(TrackKind::Activity(*kind)).await)
            }
        });
        let results = join_all(fetches).await;

        let mut redrawn = Vec::new();
        for ((kind, counters), result) in changed.iter().zip(results) {
            let rides = match result.map(|fetched| fetched.and_then(Acknowledged::into_result)) {
                None => Vec::new(),
                Some(Ok(track)) => track.into_rides(*kind),
                Some(Err(e)) => {
                    warn!("[Live] Refetch of {} layer failed: {}", kind, e);
                    continue;
                }
            };

            let mut state = lock(&inner.state);
            if !inner.is_current(epoch) {
                break;
            }
            draw_rides(inner.surface.as_ref(), *kind, &rides);
            state.counters.insert(*kind, *counters);
            let animate = !rides.is_empty() && !state.first_animation_shown;
            if animate {
                state.first_animation_shown = true;
            }
            info!(
                "[Live] Redrew {} layer: {} rides, {} points",
                kind, counters.0, counters.1
            );
            state.events.push(LiveEvent::LayerRedrawn {
                kind: *kind,
                rides,
                animate,
            });
            redrawn.push(*kind);
        }
        redrawn
    }

    /// Poll now and then every `poll_interval`. Idempotent.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_polling(&self) -> Result<()> {
        let mut poller = lock(&self.inner.poller);
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TrackerError::Runtime(format!("Polling needs a Tokio runtime: {}", e)))?;

        let period = self.inner.config.poll_interval;
        let controller = self.clone();
        *poller = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let this = controller.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.poll().await {
                        debug!("[Live] Poll tick failed: {}", e);
                    }
                });
            }
        }));
        info!("[Live] Polling every {:?}", period);
        Ok(())
    }

    /// Stop the timer and free the single-flight slot. Idempotent.
    pub fn stop_polling(&self) {
        if let Some(handle) = lock(&self.inner.poller).take() {
            handle.abort();
            info!("[Live] Polling stopped");
        }
        self.inner.invalidate_polls();
    }

    /// Stop polling and mark the session inactive on the recorder.
    pub async fn end_session(&self) -> Result<()> {
        self.stop_polling();
        self.inner.api.stop_session().await?;
        info!("[Live] Session ended");
        Ok(())
    }
}

/// Activities whose `(rides, points)` differ from the last redraw.
fn changed_layers(
    counters: &HashMap<ActivityKind, (u32, usize)>,
    stats: Option<&StatsByKind>,
) -> Vec<(ActivityKind, (u32, usize))> {
    let Some(stats) = stats else {
        return Vec::new();
    };
    ActivityKind::ALL
        .iter()
        .filter_map(|kind| {
            let current = stats
                .get(kind)
                .map(|s| (s.count, s.total_points))
                .unwrap_or((0, 0));
            let previous = counters.get(kind).copied().unwrap_or((0, 0));
            (current != previous).then_some((*kind, current))
        })
        .collect()
}

fn draw_rides(surface: &dyn MapSurface, kind: ActivityKind, rides: &[Ride]) {
    let layer = Layer::Activity(kind);
    surface.clear_layer(layer);
    for ride in rides {
        let (Some(first), Some(last)) = (ride.points.first(), ride.points.last()) else {
            continue;
        };
        surface.draw_path(layer, &ride.points, ride.draw_color());
        let ride_number = ride.ride_number;
        surface.show_marker(Marker::RideStart { layer, ride_number }, first);
        surface.show_marker(Marker::RideEnd { layer, ride_number }, last);
    }
}
