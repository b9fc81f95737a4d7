use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::models::SessionType;

use super::state::{Countdown, TickOutcome, TimerState};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::log_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// One period of the ticker elapsed. `epoch` identifies the ticker task
    /// that produced it.
    Tick { epoch: u64 },
    /// The countdown of `run` reached zero.
    Completed { run: u64, session_type: SessionType },
}

/// Receives engine events. Implementations must only enqueue the event and
/// return; the engine is never re-entered from inside the callback.
pub type EngineSignal = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Countdown driver: runs a once-per-interval ticker task while a session is
/// running and reports ticks and completions through the signal. The owner
/// feeds `Tick` events back into [`TimerEngine::on_tick`] and `Completed`
/// events into [`TimerEngine::take_completion`], from the same task that
/// issues every other engine call.
pub struct TimerEngine {
    countdown: Countdown,
    ticker: Option<JoinHandle<()>>,
    ticker_epoch: u64,
    tick_interval: Duration,
    signal: EngineSignal,
}

impl TimerEngine {
    pub fn new(tick_interval: Duration, signal: EngineSignal) -> Self {
        Self {
            countdown: Countdown::new(),
            ticker: None,
            ticker_epoch: 0,
            tick_interval,
            signal,
        }
    }

    pub fn state(&self) -> TimerState {
        self.countdown.state()
    }

    pub fn session_type(&self) -> Option<SessionType> {
        self.countdown.session_type()
    }

    pub fn time_remaining(&self) -> u64 {
        self.countdown.remaining()
    }

    pub fn total_time(&self) -> u64 {
        self.countdown.total()
    }

    pub fn pause_duration(&self) -> u64 {
        self.countdown.pause_duration(Instant::now())
    }

    pub fn pending_completion(&self) -> Option<(u64, SessionType)> {
        self.countdown.pending_completion()
    }

    pub fn start(&mut self, duration_secs: u64, session_type: SessionType) -> Result<()> {
        let run = self.countdown.start(duration_secs, session_type)?;
        log_debug!(
            "timer run {run} started: {} for {duration_secs}s",
            session_type.as_str()
        );
        self.spawn_ticker();
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.countdown.pause(Instant::now()) {
            self.cancel_ticker();
            log_debug!("timer paused at {}s remaining", self.countdown.remaining());
        }
    }

    pub fn resume(&mut self, session_type: SessionType) {
        if self.countdown.resume(session_type, Instant::now()) {
            self.spawn_ticker();
            log_debug!("timer resumed at {}s remaining", self.countdown.remaining());
        }
    }

    pub fn reset(&mut self) {
        self.cancel_ticker();
        self.countdown.reset();
    }

    /// Applies one tick. Ticks from a cancelled ticker are ignored. On the
    /// zero crossing the ticker is stopped and the completion is signalled;
    /// the signal is only queued, so delivery happens after this returns.
    pub fn on_tick(&mut self, epoch: u64) -> TickOutcome {
        if epoch != self.ticker_epoch || self.ticker.is_none() {
            return TickOutcome::Ignored;
        }

        let outcome = self.countdown.tick();
        if let TickOutcome::Completed { session_type } = outcome {
            self.cancel_ticker();
            let run = self.countdown.run();
            log_debug!("timer run {run} reached zero");
            (self.signal)(EngineEvent::Completed { run, session_type });
        }
        outcome
    }

    /// Consumes the pending completion of `run`. Returns false for a
    /// completion that was already delivered or belongs to an older run.
    pub fn take_completion(&mut self, run: u64) -> bool {
        self.countdown.take_completion(run)
    }

    fn spawn_ticker(&mut self) {
        self.cancel_ticker();
        self.ticker_epoch = self.ticker_epoch.wrapping_add(1);

        let epoch = self.ticker_epoch;
        let period = self.tick_interval;
        let signal = self.signal.clone();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                signal(EngineEvent::Tick { epoch });
            }
        });

        self.ticker = Some(handle);
    }

    fn cancel_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        self.cancel_ticker();
    }
}
