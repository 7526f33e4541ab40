//! Timer abstraction for the playback animation.
//!
//! A [`Scheduler`] arms one-shot timers that deliver a [`Ticket`] back to the
//! owner when they expire. The owner hands the ticket to the engine, which
//! ignores it unless it is the timer it is currently waiting for. That check
//! is what makes cancellation safe: a timer that fires after `stop()` or
//! `pause()` carries a stale ticket and does nothing.
//!
//! Two implementations ship with the crate:
//! - [`TokioScheduler`] sleeps on the Tokio timer and sends tickets over a channel
//! - [`ManualScheduler`] keeps a virtual clock, for tests and deterministic stepping

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identity of one scheduled continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    /// Engine run this ticket belongs to; bumped on every start/stop/pause.
    pub generation: u64,
    /// Segment index the continuation will draw.
    pub step: usize,
}

/// Handle used to cancel a pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// `schedule(delay, ticket) -> handle` plus `cancel(handle)`.
pub trait Scheduler: Send {
    fn schedule(&mut self, delay: Duration, ticket: Ticket) -> TimerHandle;

    /// Cancel a pending timer. Cancelling a fired or unknown handle is a no-op.
    fn cancel(&mut self, handle: TimerHandle);
}

// ============================================================================
// Virtual clock
// ============================================================================

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    pending: Vec<(Duration, TimerHandle, Ticket)>,
}

/// Scheduler driven by hand.
///
/// Clones share the same clock, so a test keeps one clone and gives another to
/// the engine.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed so far.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Pop the earliest armed timer, moving the clock to its deadline.
    pub fn next_ticket(&self) -> Option<Ticket> {
        let mut state = self.lock();
        let pos = state
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, (deadline, handle, _))| (*deadline, handle.0))
            .map(|(i, _)| i)?;
        let (deadline, _, ticket) = state.pending.remove(pos);
        state.now = state.now.max(deadline);
        Some(ticket)
    }

    /// Pop every timer due within `by` from now, in deadline order, and move the clock.
    ///
    /// Timers armed while the caller processes the returned tickets are not included.
    pub fn advance(&self, by: Duration) -> Vec<Ticket> {
        let mut state = self.lock();
        let until = state.now + by;
        let mut due: Vec<(Duration, TimerHandle, Ticket)> = Vec::new();
        state.pending.retain(|entry| {
            if entry.0 <= until {
                due.push(*entry);
                false
            } else {
                true
            }
        });
        state.now = until;
        due.sort_by_key(|(deadline, handle, _)| (*deadline, handle.0));
        due.into_iter().map(|(_, _, ticket)| ticket).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration, ticket: Ticket) -> TimerHandle {
        let mut state = self.lock();
        state.next_id += 1;
        let handle = TimerHandle(state.next_id);
        let deadline = state.now + delay;
        state.pending.push((deadline, handle, ticket));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.lock().pending.retain(|(_, h, _)| *h != handle);
    }
}

// ============================================================================
// Tokio timers
// ============================================================================

/// Scheduler backed by `tokio::time::sleep`.
///
/// Expired tickets arrive on the receiver returned by [`TokioScheduler::new`].
/// Must be used from within a Tokio runtime.
pub struct TokioScheduler {
    tickets: mpsc::UnboundedSender<Ticket>,
    next_id: u64,
    timers: HashMap<u64, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Ticket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tickets: tx,
                next_id: 0,
                timers: HashMap::new(),
            },
            rx,
        )
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, ticket: Ticket) -> TimerHandle {
        self.timers.retain(|_, task| !task.is_finished());

        self.next_id += 1;
        let tx = self.tickets.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the driver shut down.
            let _ = tx.send(ticket);
        });
        self.timers.insert(self.next_id, task);
        TimerHandle(self.next_id)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.timers.remove(&handle.0) {
            debug!("[Scheduler] Cancelling timer #{}", handle.0);
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
    }
}
