//! Playback state machine
//!
//! [`Playback`] is the pure cursor/status machine. It never touches a clock:
//! each transition returns a [`TimerCommand`] and the owner applies it to a
//! [`PlaybackTimer`], which holds at most one armed tick on an injected
//! [`Scheduler`]. Every tick carries the token of the timer that produced it,
//! so ticks from cancelled or superseded timers are recognised and dropped.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default interval between frames while playing.
pub const TICK_INTERVAL: Duration = Duration::from_millis(2000);

/// Playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    /// No result loaded
    Idle,
    /// Result loaded, cursor at 0, not yet playing
    Ready,
    Playing,
    Paused,
    /// Cursor on the last frame
    Finished,
}

/// What the timer owner must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Schedule the next tick, replacing any armed one
    Arm,
    /// Cancel the armed tick, if any
    Cancel,
    /// Leave the timer as it is
    Keep,
}

/// Cursor and status over a fixed-length frame array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playback {
    status: PlaybackStatus,
    cursor: Option<usize>,
    len: usize,
}

impl Default for Playback {
    fn default() -> Self {
        Self::idle()
    }
}

impl Playback {
    pub fn idle() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            cursor: None,
            len: 0,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    /// Index of the displayed frame; `None` before a result is loaded.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    fn last_index(&self) -> usize {
        self.len.saturating_sub(1)
    }

    /// Load `len` frames. Passes through `Ready` and starts playing right away;
    /// a single frame is already `Finished`.
    pub fn load(&mut self, len: usize) -> TimerCommand {
        if len == 0 {
            return self.reset();
        }
        self.len = len;
        self.cursor = Some(0);
        self.status = PlaybackStatus::Ready;
        self.start_from_cursor()
    }

    fn start_from_cursor(&mut self) -> TimerCommand {
        if self.cursor == Some(self.last_index()) {
            self.status = PlaybackStatus::Finished;
            TimerCommand::Cancel
        } else {
            self.status = PlaybackStatus::Playing;
            TimerCommand::Arm
        }
    }

    /// Advance one frame. Ignored unless playing.
    pub fn tick(&mut self) -> TimerCommand {
        if self.status != PlaybackStatus::Playing {
            return TimerCommand::Cancel;
        }
        let next = self.cursor.map_or(0, |c| c + 1).min(self.last_index());
        self.cursor = Some(next);
        self.start_from_cursor()
    }

    /// Pause, resume, or restart from frame 0 when finished.
    pub fn toggle(&mut self) -> TimerCommand {
        match self.status {
            PlaybackStatus::Idle => TimerCommand::Keep,
            PlaybackStatus::Playing => {
                self.status = PlaybackStatus::Paused;
                TimerCommand::Cancel
            }
            PlaybackStatus::Ready | PlaybackStatus::Paused => self.start_from_cursor(),
            PlaybackStatus::Finished => {
                self.cursor = Some(0);
                self.start_from_cursor()
            }
        }
    }

    /// Jump to the last frame and stop.
    pub fn skip_to_end(&mut self) -> TimerCommand {
        if self.status == PlaybackStatus::Idle {
            return TimerCommand::Keep;
        }
        self.cursor = Some(self.last_index());
        self.status = PlaybackStatus::Finished;
        TimerCommand::Cancel
    }

    /// Drop the loaded result.
    pub fn reset(&mut self) -> TimerCommand {
        *self = Self::idle();
        TimerCommand::Cancel
    }
}

/// Identifies one scheduled tick.
pub type TickToken = u64;

/// A scheduled tick that can be cancelled.
pub struct TimerHandle {
    token: TickToken,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(token: TickToken, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            token,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn token(&self) -> TickToken {
        self.token
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle").field("token", &self.token).finish()
    }
}

/// Source of delayed ticks.
pub trait Scheduler: Send {
    /// Deliver `token` once after `delay` unless the handle is cancelled first.
    fn schedule(&mut self, delay: Duration, token: TickToken) -> TimerHandle;
}

/// Holds at most one armed tick.
#[derive(Debug)]
pub struct PlaybackTimer<S> {
    scheduler: S,
    interval: Duration,
    armed: Option<TimerHandle>,
    next_token: TickToken,
}

impl<S: Scheduler> PlaybackTimer<S> {
    pub fn new(scheduler: S, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
            armed: None,
            next_token: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn apply(&mut self, command: TimerCommand) {
        match command {
            TimerCommand::Arm => self.arm(),
            TimerCommand::Cancel => self.cancel(),
            TimerCommand::Keep => {}
        }
    }

    /// Replace any armed tick with a fresh one.
    pub fn arm(&mut self) {
        self.cancel();
        self.next_token += 1;
        let handle = self.scheduler.schedule(self.interval, self.next_token);
        self.armed = Some(handle);
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.armed.take() {
            handle.cancel();
        }
    }

    /// Claim a delivered tick. Returns `false` for stale tokens, which must be
    /// ignored.
    pub fn accept(&mut self, token: TickToken) -> bool {
        match &self.armed {
            Some(handle) if handle.token() == token => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}

impl<S> Drop for PlaybackTimer<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.armed.take() {
            handle.cancel();
        }
    }
}

#[derive(Debug, Default)]
struct ManualClock {
    now: Duration,
    pending: Vec<(Duration, TickToken)>,
}

/// Virtual-time scheduler. Time only moves through [`ManualScheduler::advance`].
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    clock: Arc<Mutex<ManualClock>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward and return the tokens that came due, in deadline
    /// order.
    pub fn advance(&self, by: Duration) -> Vec<TickToken> {
        let Ok(mut clock) = self.clock.lock() else {
            return Vec::new();
        };
        clock.now += by;
        let now = clock.now;
        let mut due: Vec<(Duration, TickToken)> = Vec::new();
        clock.pending.retain(|&(deadline, token)| {
            if deadline <= now {
                due.push((deadline, token));
                false
            } else {
                true
            }
        });
        due.sort();
        due.into_iter().map(|(_, token)| token).collect()
    }

    /// Number of ticks scheduled and not yet due or cancelled.
    pub fn pending(&self) -> usize {
        self.clock.lock().map(|c| c.pending.len()).unwrap_or(0)
    }

    pub fn now(&self) -> Duration {
        self.clock.lock().map(|c| c.now).unwrap_or_default()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration, token: TickToken) -> TimerHandle {
        if let Ok(mut clock) = self.clock.lock() {
            let deadline = clock.now + delay;
            clock.pending.push((deadline, token));
        }
        let clock = Arc::clone(&self.clock);
        TimerHandle::new(token, move || {
            if let Ok(mut clock) = clock.lock() {
                clock.pending.retain(|&(_, t)| t != token);
            }
        })
    }
}

/// Scheduler backed by tokio timers. Fired tokens are handed to `on_fire`.
#[derive(Clone)]
pub struct TokioScheduler {
    on_fire: Arc<dyn Fn(TickToken) + Send + Sync>,
}

impl TokioScheduler {
    pub fn new(on_fire: impl Fn(TickToken) + Send + Sync + 'static) -> Self {
        Self {
            on_fire: Arc::new(on_fire),
        }
    }
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler").finish_non_exhaustive()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration, token: TickToken) -> TimerHandle {
        let on_fire = Arc::clone(&self.on_fire);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(token);
        });
        TimerHandle::new(token, move || task.abort())
    }
}
