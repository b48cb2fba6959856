//! Purpose: Per-port timer state machine (IDLE / AGAIN / WRITE) with cancellation tokens.
//! Exports: `TimerState`, `TimerId`, `TimerToken`, `TimerSlot`, `Fired`.
//! Role: Gates the queue engine while a continuation is parked and schedules write flushes.
//! Invariants: AGAIN holds exactly one parked task; IDLE holds no token.
//! Invariants: Arming always cancels the previous token first; stale ids never fire.
use std::fmt;
use std::mem;

use tokio::task::AbortHandle;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerState {
    Idle,
    Again,
    Write,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Handle for one armed timer. Dropping it does not cancel; `cancel` does.
#[derive(Debug)]
pub struct TimerToken {
    id: TimerId,
    abort: Option<AbortHandle>,
}

impl TimerToken {
    pub fn new(id: TimerId) -> Self {
        Self { id, abort: None }
    }

    pub fn with_abort(id: TimerId, abort: AbortHandle) -> Self {
        Self {
            id,
            abort: Some(abort),
        }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn cancel(self) {
        if let Some(abort) = self.abort {
            abort.abort();
        }
    }
}

#[derive(Debug)]
pub enum Fired<T> {
    /// Cancelled or superseded timer; nothing to do.
    Stale,
    Resume(T),
    Flush,
}

#[derive(Debug)]
pub struct TimerSlot<T> {
    state: TimerState,
    token: Option<TimerToken>,
    parked: Option<T>,
}

impl<T> Default for TimerSlot<T> {
    fn default() -> Self {
        Self {
            state: TimerState::Idle,
            token: None,
            parked: None,
        }
    }
}

impl<T> TimerSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == TimerState::Idle
    }

    /// Parks a continuation; any pending write flush timer is cancelled.
    pub fn park(&mut self, task: T, token: TimerToken) {
        self.cancel_token();
        self.state = TimerState::Again;
        self.parked = Some(task);
        self.token = Some(token);
    }

    pub fn arm_write(&mut self, token: TimerToken) {
        assert!(
            self.is_idle(),
            "write timer armed in {:?} state",
            self.state
        );
        self.state = TimerState::Write;
        self.token = Some(token);
    }

    /// Drops a pending write flush timer. Returns whether one was pending.
    pub fn cancel_write(&mut self) -> bool {
        if self.state != TimerState::Write {
            return false;
        }
        self.cancel_token();
        self.state = TimerState::Idle;
        true
    }

    /// Resolves a timer expiry. State is back to IDLE before the caller acts on the result.
    pub fn fire(&mut self, id: TimerId) -> Fired<T> {
        match &self.token {
            Some(token) if token.id() == id => {}
            _ => return Fired::Stale,
        }
        self.token = None;
        // a live token implies AGAIN or WRITE
        if mem::replace(&mut self.state, TimerState::Idle) == TimerState::Write {
            return Fired::Flush;
        }
        match self.parked.take() {
            Some(task) => Fired::Resume(task),
            None => panic!("{id} fired in AGAIN with no parked task"),
        }
    }

    fn cancel_token(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}
