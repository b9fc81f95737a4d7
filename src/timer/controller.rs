use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::SessionClock,
    format::format_clock,
    identity::UserId,
    models::{Session, SessionType},
    notifications::{Notification, NotificationSink},
    settings::{NotificationSettings, PomodoroSettings, SettingsProvider},
    store::{SessionRepository, SessionStore},
};

use super::{
    engine::{EngineEvent, EngineSignal, TimerEngine},
    state::{TickOutcome, TimerState},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Pause between a finished session and the auto-started next one.
pub const DEFAULT_AUTO_CHAIN_DELAY: Duration = Duration::from_millis(500);

/// Abort reason for a session cut short by a user change.
pub const SIGNED_OUT_REASON: &str = "Signed out";
/// Abort reason for a session replaced by a manual start.
pub const REPLACED_REASON: &str = "Replaced by a new session";

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    pub tick_interval: Duration,
    pub auto_chain_delay: Duration,
    pub clock: SessionClock,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            auto_chain_delay: DEFAULT_AUTO_CHAIN_DELAY,
            clock: SessionClock::system(),
        }
    }
}

/// External services the focus loop depends on.
pub struct Collaborators {
    pub identity: watch::Receiver<Option<UserId>>,
    pub settings: Arc<dyn SettingsProvider>,
    pub repository: Arc<dyn SessionRepository>,
    pub notifier: Arc<dyn NotificationSink>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub timer_state: TimerState,
    pub time_remaining: u64,
    pub total_time: u64,
    pub current_session: Option<Session>,
    /// Work sessions started.
    pub session_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusSnapshot {
    pub timer_state: TimerState,
    pub time_remaining: u64,
    pub total_time: u64,
    pub current_session: Option<Session>,
    pub session_count: u32,
    pub sessions: Vec<Session>,
}

pub(crate) enum Command {
    Start {
        session_type: SessionType,
        reply: oneshot::Sender<Result<TimerSnapshot>>,
    },
    Pause {
        reply: oneshot::Sender<TimerSnapshot>,
    },
    Resume {
        reply: oneshot::Sender<TimerSnapshot>,
    },
    Skip {
        reply: oneshot::Sender<Result<Option<Session>>>,
    },
    Stop {
        reason: Option<String>,
        reply: oneshot::Sender<Option<Session>>,
    },
    Snapshot {
        reply: oneshot::Sender<FocusSnapshot>,
    },
}

enum Internal {
    Engine(EngineEvent),
    AutoStart { next: SessionType, seq: u64 },
}

struct PendingContinuation {
    seq: u64,
    next: SessionType,
    token: CancellationToken,
}

/// Type that follows `finished`. After work, the break is long when the
/// number of work sessions started is a multiple of the cadence.
pub fn next_session_type(
    finished: SessionType,
    work_session_count: u32,
    sessions_until_long_break: u32,
) -> SessionType {
    match finished {
        SessionType::Work => {
            if work_session_count % sessions_until_long_break.max(1) == 0 {
                SessionType::LongBreak
            } else {
                SessionType::Break
            }
        }
        SessionType::Break | SessionType::LongBreak => SessionType::Work,
    }
}

fn started_message(session_type: SessionType) -> &'static str {
    match session_type {
        SessionType::Work => "Focus session started!",
        SessionType::Break => "Break time started!",
        SessionType::LongBreak => "Long break started!",
    }
}

fn completed_message(session_type: SessionType) -> &'static str {
    match session_type {
        SessionType::Work => "Work session completed! Time for a break.",
        SessionType::Break => "Break completed! Ready to get back to work?",
        SessionType::LongBreak => "Long break completed! Ready to get back to work?",
    }
}

/// Single task that owns the timer engine and the session store. Commands,
/// engine ticks, completions and auto-start continuations are all handled
/// here one at a time, so no two operations interleave.
pub(crate) struct FocusLoop {
    engine: TimerEngine,
    store: SessionStore,
    settings: Arc<dyn SettingsProvider>,
    notifier: Arc<dyn NotificationSink>,
    identity: watch::Receiver<Option<UserId>>,
    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    snapshots: watch::Sender<TimerSnapshot>,
    auto_chain_delay: Duration,
    continuation: Option<PendingContinuation>,
    continuation_seq: u64,
}

impl FocusLoop {
    pub(crate) fn new(
        collaborators: Collaborators,
        options: OrchestratorOptions,
        commands: mpsc::UnboundedReceiver<Command>,
        snapshots: watch::Sender<TimerSnapshot>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let engine_tx = internal_tx.clone();
        let signal: EngineSignal = Arc::new(move |event| {
            let _ = engine_tx.send(Internal::Engine(event));
        });

        Self {
            engine: TimerEngine::new(options.tick_interval, signal),
            store: SessionStore::new(collaborators.repository, options.clock),
            settings: collaborators.settings,
            notifier: collaborators.notifier,
            identity: collaborators.identity,
            commands,
            internal_tx,
            internal_rx,
            snapshots,
            auto_chain_delay: options.auto_chain_delay,
            continuation: None,
            continuation_seq: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let initial = self.identity.borrow_and_update().clone();
        self.store.switch_user(initial).await;
        self.publish();

        let mut identity_open = true;
        loop {
            tokio::select! {
                biased;

                Some(event) = self.internal_rx.recv() => self.handle_internal(event).await,
                changed = self.identity.changed(), if identity_open => match changed {
                    Ok(()) => {
                        let user = self.identity.borrow_and_update().clone();
                        self.change_user(user).await;
                    }
                    Err(_) => identity_open = false,
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
            self.publish();
        }

        self.cancel_continuation();
        self.engine.reset();
        log_info!("focus loop shutting down");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                session_type,
                reply,
            } => {
                let result = self
                    .manual_start(session_type)
                    .await
                    .map(|_| self.timer_snapshot());
                let _ = reply.send(result);
            }
            Command::Pause { reply } => {
                self.engine.pause();
                let _ = reply.send(self.timer_snapshot());
            }
            Command::Resume { reply } => {
                self.resume();
                let _ = reply.send(self.timer_snapshot());
            }
            Command::Skip { reply } => {
                let result = self.skip().await;
                let _ = reply.send(result);
            }
            Command::Stop { reason, reply } => {
                let stopped = self.stop(reason).await;
                let _ = reply.send(stopped);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.focus_snapshot());
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Engine(EngineEvent::Tick { epoch }) => {
                if let TickOutcome::Counting { remaining } = self.engine.on_tick(epoch) {
                    self.warn_before_end(remaining);
                }
            }
            Internal::Engine(EngineEvent::Completed { run, session_type }) => {
                if self.engine.take_completion(run) {
                    self.finish_run(session_type, true).await;
                }
            }
            Internal::AutoStart { next, seq } => self.run_continuation(next, seq).await,
        }
    }

    async fn manual_start(&mut self, session_type: SessionType) -> Result<()> {
        self.settle_pending_completion().await;
        self.cancel_continuation();
        self.start_session(session_type).await
    }

    async fn start_session(&mut self, session_type: SessionType) -> Result<()> {
        let settings = self.settings.snapshot();
        let duration = settings.pomodoro.duration_secs(session_type);
        if duration == 0 {
            bail!("no duration configured for {} sessions", session_type.as_str());
        }

        if self.engine.state() != TimerState::Idle {
            let pause = self.engine.pause_duration();
            if let Some(replaced) = self
                .store
                .abort_session(pause, Some(REPLACED_REASON.to_string()))
                .await
            {
                log_info!("session {} replaced by a new {} session", replaced.id, session_type.as_str());
            }
        }

        self.engine.start(duration, session_type)?;
        match self.store.create_session(session_type, duration) {
            Some(session) => log_info!("started {} session {}", session_type.as_str(), session.id),
            None => log_info!(
                "started {} timer without a signed-in user; it will not be logged",
                session_type.as_str()
            ),
        }

        self.notify(started_message(session_type), &settings.notifications);
        Ok(())
    }

    fn resume(&mut self) {
        let session_type = self
            .store
            .current_session()
            .map(|session| session.session_type)
            .or_else(|| self.engine.session_type());
        if let Some(session_type) = session_type {
            self.engine.resume(session_type);
        }
    }

    async fn skip(&mut self) -> Result<Option<Session>> {
        let settled = self.settle_pending_completion().await;
        self.cancel_continuation();

        let (finished_type, finalized) = match settled {
            Some((session_type, finalized)) => (Some(session_type), finalized),
            None => {
                let finished_type = self
                    .store
                    .current_session()
                    .map(|session| session.session_type)
                    .or_else(|| self.engine.session_type());
                let pause = self.engine.pause_duration();
                let finalized = self.store.complete_session(pause).await;
                (finished_type, finalized)
            }
        };
        self.engine.reset();
        self.store.reset_current_session();

        let next = match finished_type {
            Some(finished) => next_session_type(
                finished,
                self.store.work_session_count(),
                self.settings.snapshot().pomodoro.sessions_until_long_break,
            ),
            None => SessionType::Work,
        };
        self.start_session(next).await?;
        Ok(finalized)
    }

    async fn stop(&mut self, reason: Option<String>) -> Option<Session> {
        self.settle_pending_completion().await;
        self.cancel_continuation();

        let pause = self.engine.pause_duration();
        let stopped = self.store.abort_session(pause, reason).await;
        self.engine.reset();
        self.store.reset_current_session();

        if let Some(session) = &stopped {
            log_info!(
                "session {} stopped: {}",
                session.id,
                session.abort_reason.as_deref().unwrap_or_default()
            );
        }
        stopped
    }

    /// Finalizes a run whose countdown reached zero and, when `auto_chain`
    /// is set, schedules the next session according to the auto-start flags.
    async fn finish_run(&mut self, session_type: SessionType, auto_chain: bool) -> Option<Session> {
        let settings = self.settings.snapshot();
        let pause = self.engine.pause_duration();
        let finalized = self.store.complete_session(pause).await;

        self.notify(completed_message(session_type), &settings.notifications);
        self.engine.reset();
        self.store.reset_current_session();

        if auto_chain {
            if let Some(next) = self.auto_chain_target(session_type, &settings.pomodoro) {
                self.schedule_continuation(next);
            }
        }
        finalized
    }

    /// Delivers a completion that fired but has not been handled yet, so a
    /// command arriving in between acts on a finalized session. No auto-start
    /// is scheduled; the command decides what runs next.
    async fn settle_pending_completion(&mut self) -> Option<(SessionType, Option<Session>)> {
        let (run, session_type) = self.engine.pending_completion()?;
        if !self.engine.take_completion(run) {
            return None;
        }
        let finalized = self.finish_run(session_type, false).await;
        Some((session_type, finalized))
    }

    fn auto_chain_target(
        &self,
        finished: SessionType,
        pomodoro: &PomodoroSettings,
    ) -> Option<SessionType> {
        let enabled = match finished {
            SessionType::Work => pomodoro.auto_start_breaks,
            SessionType::Break | SessionType::LongBreak => pomodoro.auto_start_work,
        };
        enabled.then(|| {
            next_session_type(
                finished,
                self.store.work_session_count(),
                pomodoro.sessions_until_long_break,
            )
        })
    }

    fn schedule_continuation(&mut self, next: SessionType) {
        self.cancel_continuation();
        self.continuation_seq = self.continuation_seq.wrapping_add(1);

        let seq = self.continuation_seq;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.internal_tx.clone();
        let delay = self.auto_chain_delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = time::sleep(delay) => {
                    let _ = tx.send(Internal::AutoStart { next, seq });
                }
            }
        });

        log_debug!("auto-start of {} scheduled in {delay:?}", next.as_str());
        self.continuation = Some(PendingContinuation { seq, next, token });
    }

    fn cancel_continuation(&mut self) {
        if let Some(pending) = self.continuation.take() {
            pending.token.cancel();
            log_debug!("auto-start of {} cancelled", pending.next.as_str());
        }
    }

    async fn run_continuation(&mut self, next: SessionType, seq: u64) {
        match self.continuation.take() {
            Some(pending) if pending.seq == seq => {}
            other => {
                // Cancelled or superseded after the timer already fired.
                self.continuation = other;
                return;
            }
        }

        if self.store.current_session().is_some() || self.engine.state() != TimerState::Idle {
            log_info!(
                "a session is already in progress; dropping auto-start of {}",
                next.as_str()
            );
            return;
        }

        if let Err(err) = self.start_session(next).await {
            log_error!("auto-start of {} failed: {err:#}", next.as_str());
        }
    }

    async fn change_user(&mut self, user_id: Option<UserId>) {
        if self.store.user_id() == user_id.as_ref() {
            return;
        }

        self.settle_pending_completion().await;
        self.cancel_continuation();
        if self.engine.state() != TimerState::Idle {
            let pause = self.engine.pause_duration();
            self.store
                .abort_session(pause, Some(SIGNED_OUT_REASON.to_string()))
                .await;
            self.engine.reset();
        }
        self.store.reset_current_session();

        self.store.switch_user(user_id).await;
    }

    fn warn_before_end(&self, remaining: u64) {
        let preferences = self.settings.snapshot().notifications;
        if preferences.notify_before_end
            && preferences.notify_before_end_time > 0
            && remaining == preferences.notify_before_end_time
        {
            self.notify(
                format!("{} remaining", format_clock(remaining)),
                &preferences,
            );
        }
    }

    fn notify(&self, message: impl Into<String>, preferences: &NotificationSettings) {
        let notification = Notification::new(message, preferences);
        if let Err(err) = self.notifier.notify(&notification) {
            log_warn!(
                "notification '{}' was not delivered: {err:#}",
                notification.message
            );
        }
    }

    fn timer_snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            timer_state: self.engine.state(),
            time_remaining: self.engine.time_remaining(),
            total_time: self.engine.total_time(),
            current_session: self.store.current_session().cloned(),
            session_count: self.store.work_session_count(),
        }
    }

    fn focus_snapshot(&self) -> FocusSnapshot {
        let timer = self.timer_snapshot();
        FocusSnapshot {
            timer_state: timer.timer_state,
            time_remaining: timer.time_remaining,
            total_time: timer.total_time,
            current_session: timer.current_session,
            session_count: timer.session_count,
            sessions: self.store.sessions().to_vec(),
        }
    }

    fn publish(&self) {
        let snapshot = self.timer_snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::Identity,
        settings::FocusSettings,
        testing::{MemoryRepository, RecordingNotifier},
    };

    const WORK_DONE: &str = "Work session completed! Time for a break.";

    struct Bench {
        focus: FocusLoop,
        repo: Arc<MemoryRepository>,
        notifier: Arc<RecordingNotifier>,
        _identity: Identity,
        _commands: mpsc::UnboundedSender<Command>,
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    /// A focus loop driven by hand instead of through `run`, with one-minute
    /// sessions and auto-start enabled.
    async fn bench() -> Bench {
        let identity = Identity::new(Some(alice()));
        let repo = Arc::new(MemoryRepository::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(TimerSnapshot::default());
        let settings = FocusSettings {
            pomodoro: PomodoroSettings {
                work_duration: 1,
                break_duration: 1,
                long_break_duration: 1,
                sessions_until_long_break: 4,
                auto_start_breaks: true,
                auto_start_work: true,
            },
            ..FocusSettings::default()
        };

        let mut focus = FocusLoop::new(
            Collaborators {
                identity: identity.subscribe(),
                settings: Arc::new(settings),
                repository: repo.clone(),
                notifier: notifier.clone(),
            },
            OrchestratorOptions {
                clock: SessionClock::anchored(),
                ..OrchestratorOptions::default()
            },
            commands_rx,
            snapshots,
        );
        focus.store.switch_user(Some(alice())).await;

        Bench {
            focus,
            repo,
            notifier,
            _identity: identity,
            _commands: commands_tx,
        }
    }

    /// Runs a work session to zero and handles queued events only up to the
    /// point where the completion is signalled but not yet delivered.
    async fn reach_undelivered_completion(focus: &mut FocusLoop) {
        focus.manual_start(SessionType::Work).await.unwrap();
        time::sleep(Duration::from_millis(60_500)).await;

        while focus.engine.pending_completion().is_none() {
            let event = focus
                .internal_rx
                .try_recv()
                .expect("ticks should be queued");
            focus.handle_internal(event).await;
        }
        assert_eq!(focus.engine.state(), TimerState::Idle);
        assert!(focus.store.current_session().is_some());
    }

    /// Handles everything still queued, including auto-starts that fire
    /// within the chain delay.
    async fn drain(focus: &mut FocusLoop) {
        time::sleep(DEFAULT_AUTO_CHAIN_DELAY * 2).await;
        while let Ok(event) = focus.internal_rx.try_recv() {
            focus.handle_internal(event).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_completion_is_handled_settles_it_once() {
        let Bench {
            mut focus,
            repo,
            notifier,
            ..
        } = bench().await;
        reach_undelivered_completion(&mut focus).await;

        let (reply, stopped) = oneshot::channel();
        focus
            .handle_command(Command::Stop {
                reason: Some("done for today".to_string()),
                reply,
            })
            .await;

        assert_eq!(stopped.await.unwrap(), None);
        assert!(focus.continuation.is_none());
        assert_eq!(focus.engine.state(), TimerState::Idle);
        let sessions = focus.store.sessions().to_vec();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].completed);
        assert!(!sessions[0].aborted);
        assert_eq!(notifier.count(WORK_DONE), 1);

        // The queued Completed event is now stale.
        drain(&mut focus).await;
        assert_eq!(focus.engine.state(), TimerState::Idle);
        assert!(focus.store.current_session().is_none());
        assert_eq!(focus.store.sessions().len(), 1);
        assert_eq!(notifier.count(WORK_DONE), 1);
        assert_eq!(repo.saved(&alice()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_before_completion_is_handled_moves_on_once() {
        let Bench {
            mut focus,
            notifier,
            ..
        } = bench().await;
        reach_undelivered_completion(&mut focus).await;

        let (reply, skipped) = oneshot::channel();
        focus.handle_command(Command::Skip { reply }).await;

        let finished = skipped.await.unwrap().unwrap().expect("work session");
        assert_eq!(finished.session_type, SessionType::Work);
        assert!(finished.completed);
        assert_eq!(focus.engine.state(), TimerState::Break);
        assert_eq!(
            focus.store.current_session().map(|s| s.session_type),
            Some(SessionType::Break)
        );
        assert!(focus.continuation.is_none());

        drain(&mut focus).await;
        assert_eq!(focus.engine.state(), TimerState::Break);
        assert_eq!(focus.store.sessions().len(), 1);
        assert_eq!(notifier.count(WORK_DONE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_completion_schedules_the_next_session() {
        let Bench { mut focus, .. } = bench().await;
        reach_undelivered_completion(&mut focus).await;

        let event = focus.internal_rx.try_recv().expect("completion queued");
        focus.handle_internal(event).await;
        assert_eq!(
            focus.continuation.as_ref().map(|pending| pending.next),
            Some(SessionType::Break)
        );

        drain(&mut focus).await;
        assert!(focus.continuation.is_none());
        assert_eq!(focus.engine.state(), TimerState::Break);
        assert_eq!(focus.store.sessions().len(), 1);
    }

    #[test]
    fn long_break_lands_on_every_nth_work_session() {
        let breaks: Vec<_> = (1..=8)
            .map(|count| next_session_type(SessionType::Work, count, 4))
            .collect();
        assert_eq!(
            breaks,
            vec![
                SessionType::Break,
                SessionType::Break,
                SessionType::Break,
                SessionType::LongBreak,
                SessionType::Break,
                SessionType::Break,
                SessionType::Break,
                SessionType::LongBreak,
            ]
        );
    }

    #[test]
    fn cadence_of_one_always_takes_the_long_break() {
        for count in 1..=3 {
            assert_eq!(
                next_session_type(SessionType::Work, count, 1),
                SessionType::LongBreak
            );
        }
        assert_eq!(
            next_session_type(SessionType::Work, 3, 0),
            SessionType::LongBreak
        );
    }

    #[test]
    fn breaks_are_followed_by_work() {
        assert_eq!(
            next_session_type(SessionType::Break, 3, 4),
            SessionType::Work
        );
        assert_eq!(
            next_session_type(SessionType::LongBreak, 4, 4),
            SessionType::Work
        );
    }
}
