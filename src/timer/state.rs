use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::models::SessionType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerState {
    Idle,
    Working,
    Break,
    LongBreak,
    Paused,
}

impl Default for TimerState {
    fn default() -> Self {
        TimerState::Idle
    }
}

impl TimerState {
    pub fn running(session_type: SessionType) -> Self {
        match session_type {
            SessionType::Work => TimerState::Working,
            SessionType::Break => TimerState::Break,
            SessionType::LongBreak => TimerState::LongBreak,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            TimerState::Working | TimerState::Break | TimerState::LongBreak
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimerState::Idle => "idle",
            TimerState::Working => "working",
            TimerState::Break => "break",
            TimerState::LongBreak => "longBreak",
            TimerState::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The countdown was not running, or a completion is still undelivered.
    Ignored,
    Counting { remaining: u64 },
    Completed { session_type: SessionType },
}

/// Countdown bookkeeping without any scheduling. The engine feeds it ticks
/// and instants; every transition that does not apply to the current state is
/// a no-op.
#[derive(Debug, Clone, Default)]
pub struct Countdown {
    state: TimerState,
    session_type: Option<SessionType>,
    remaining: u64,
    total: u64,
    pause_accumulated: u64,
    pause_started_at: Option<Instant>,
    /// Bumped on every start and reset so a stale completion can be told apart.
    run: u64,
    /// Set when the countdown hits zero, cleared once the completion is taken.
    completion_pending: bool,
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn session_type(&self) -> Option<SessionType> {
        self.session_type
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn run(&self) -> u64 {
        self.run
    }

    pub fn start(&mut self, duration_secs: u64, session_type: SessionType) -> Result<u64> {
        if duration_secs == 0 {
            bail!("session duration must be greater than zero");
        }

        *self = Self {
            state: TimerState::running(session_type),
            session_type: Some(session_type),
            remaining: duration_secs,
            total: duration_secs,
            pause_accumulated: 0,
            pause_started_at: None,
            run: self.run.wrapping_add(1),
            completion_pending: false,
        };
        Ok(self.run)
    }

    pub fn pause(&mut self, now: Instant) -> bool {
        if !self.state.is_running() {
            return false;
        }
        self.state = TimerState::Paused;
        self.pause_started_at = Some(now);
        true
    }

    pub fn resume(&mut self, session_type: SessionType, now: Instant) -> bool {
        if self.state != TimerState::Paused {
            return false;
        }
        if let Some(started) = self.pause_started_at.take() {
            self.pause_accumulated += now.saturating_duration_since(started).as_secs();
        }
        self.state = TimerState::running(session_type);
        self.session_type = Some(session_type);
        true
    }

    pub fn reset(&mut self) {
        *self = Self {
            run: self.run.wrapping_add(1),
            ..Self::default()
        };
    }

    pub fn tick(&mut self) -> TickOutcome {
        if !self.state.is_running() || self.completion_pending {
            return TickOutcome::Ignored;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return TickOutcome::Counting {
                remaining: self.remaining,
            };
        }

        self.state = TimerState::Idle;
        self.completion_pending = true;
        match self.session_type {
            Some(session_type) => TickOutcome::Completed { session_type },
            None => TickOutcome::Ignored,
        }
    }

    /// Run id and type of a completion that has fired but not been taken.
    pub fn pending_completion(&self) -> Option<(u64, SessionType)> {
        if self.completion_pending {
            self.session_type.map(|ty| (self.run, ty))
        } else {
            None
        }
    }

    /// Clears the pending completion for `run`. Returns false when there is
    /// nothing to deliver, which makes a second delivery a no-op.
    pub fn take_completion(&mut self, run: u64) -> bool {
        if self.completion_pending && self.run == run {
            self.completion_pending = false;
            true
        } else {
            false
        }
    }

    /// Seconds paused so far, including a pause still in progress.
    pub fn pause_duration(&self, now: Instant) -> u64 {
        let current = self
            .pause_started_at
            .map(|started| now.saturating_duration_since(started).as_secs())
            .unwrap_or(0);
        self.pause_accumulated + current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run_to_end(countdown: &mut Countdown) -> (u64, usize) {
        let mut ticks = 0;
        let mut completions = 0;
        for _ in 0..10_000 {
            match countdown.tick() {
                TickOutcome::Counting { .. } => ticks += 1,
                TickOutcome::Completed { .. } => {
                    ticks += 1;
                    completions += 1;
                }
                TickOutcome::Ignored => {}
            }
        }
        (ticks, completions)
    }

    #[test]
    fn rejects_zero_duration() {
        let mut countdown = Countdown::new();
        assert!(countdown.start(0, SessionType::Work).is_err());
        assert_eq!(countdown.state(), TimerState::Idle);
        assert_eq!(countdown.run(), 0);
    }

    #[test]
    fn completes_exactly_once_after_duration_ticks() {
        for duration in [1, 2, 7, 60] {
            let mut countdown = Countdown::new();
            countdown.start(duration, SessionType::Work).unwrap();

            let (ticks, completions) = run_to_end(&mut countdown);

            assert_eq!(ticks, duration);
            assert_eq!(completions, 1);
            assert_eq!(countdown.state(), TimerState::Idle);
            assert_eq!(countdown.remaining(), 0);
        }
    }

    #[test]
    fn completion_guard_holds_until_taken() {
        let mut countdown = Countdown::new();
        let run = countdown.start(1, SessionType::Break).unwrap();

        assert_eq!(
            countdown.tick(),
            TickOutcome::Completed {
                session_type: SessionType::Break
            }
        );
        assert_eq!(countdown.tick(), TickOutcome::Ignored);
        assert_eq!(countdown.pending_completion(), Some((run, SessionType::Break)));

        assert!(!countdown.take_completion(run + 1));
        assert!(countdown.take_completion(run));
        assert!(!countdown.take_completion(run));
        assert_eq!(countdown.pending_completion(), None);
    }

    #[test]
    fn restart_and_reset_discard_pending_completion() {
        let mut countdown = Countdown::new();
        let first = countdown.start(1, SessionType::Work).unwrap();
        countdown.tick();

        let second = countdown.start(5, SessionType::Break).unwrap();
        assert_ne!(first, second);
        assert!(!countdown.take_completion(first));
        assert_eq!(countdown.state(), TimerState::Break);

        countdown.tick();
        countdown.reset();
        assert_eq!(countdown.pending_completion(), None);
        assert_eq!(countdown.tick(), TickOutcome::Ignored);
    }

    #[test]
    fn paused_ticks_do_not_count_down() {
        let origin = Instant::now();
        let mut countdown = Countdown::new();
        countdown.start(100, SessionType::Work).unwrap();
        for _ in 0..10 {
            countdown.tick();
        }

        assert!(countdown.pause(origin));
        for _ in 0..5 {
            assert_eq!(countdown.tick(), TickOutcome::Ignored);
        }
        assert_eq!(countdown.pause_duration(origin + Duration::from_secs(3)), 3);

        assert!(countdown.resume(SessionType::Work, origin + Duration::from_millis(5_400)));
        assert_eq!(countdown.state(), TimerState::Working);
        assert_eq!(countdown.remaining(), 90);

        let (ticks, completions) = run_to_end(&mut countdown);
        assert_eq!(ticks, 90);
        assert_eq!(completions, 1);
        assert_eq!(countdown.pause_duration(origin + Duration::from_secs(500)), 5);
    }

    #[test]
    fn invalid_transitions_are_no_ops() {
        let now = Instant::now();
        let mut countdown = Countdown::new();
        assert!(!countdown.pause(now));
        assert!(!countdown.resume(SessionType::Work, now));

        countdown.start(10, SessionType::LongBreak).unwrap();
        assert!(!countdown.resume(SessionType::Work, now));
        assert_eq!(countdown.state(), TimerState::LongBreak);

        assert!(countdown.pause(now));
        assert!(!countdown.pause(now + Duration::from_secs(4)));
        assert_eq!(countdown.pause_duration(now + Duration::from_secs(4)), 4);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut countdown = Countdown::new();
        countdown.start(30, SessionType::Work).unwrap();
        countdown.pause(Instant::now());

        countdown.reset();
        let once = (
            countdown.state(),
            countdown.remaining(),
            countdown.total(),
            countdown.session_type(),
            countdown.pause_duration(Instant::now()),
        );
        countdown.reset();
        let twice = (
            countdown.state(),
            countdown.remaining(),
            countdown.total(),
            countdown.session_type(),
            countdown.pause_duration(Instant::now()),
        );

        assert_eq!(once, twice);
        assert_eq!(once, (TimerState::Idle, 0, 0, None, 0));
    }
}
