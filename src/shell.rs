//! Line-oriented front end for the focus loop.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};

use crate::{
    format::{format_clock, format_duration},
    identity::{Identity, UserId},
    models::{Session, SessionType},
    settings::{NotificationSettings, PomodoroSettings, SettingsStore},
    timer::{FocusOrchestrator, FocusSnapshot, TimerSnapshot, TimerState},
};

const HELP: &str = "commands: login <user> | logout | start [work|break|long] | pause | resume \
                    | skip | stop [reason] | status | log | settings | set <key> <value> | help | quit\n\
                    settings keys: work|break|long <minutes>, cadence <n>, auto-breaks|auto-work on|off, \
                    sound on|off, volume <0-100>, warn <seconds>|off";

/// A single edit to the persisted settings.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingChange {
    Minutes(SessionType, u32),
    Cadence(u32),
    AutoStartBreaks(bool),
    AutoStartWork(bool),
    Sound(bool),
    Volume(u8),
    /// Seconds before the end; `None` turns the warning off.
    WarnBeforeEnd(Option<u64>),
}

impl SettingChange {
    fn parse(args: &str) -> Result<Self> {
        let Some((key, value)) = args.split_once(char::is_whitespace) else {
            bail!("usage: set <key> <value>");
        };
        let value = value.trim();
        let change = match key.to_ascii_lowercase().as_str() {
            "work" => SettingChange::Minutes(SessionType::Work, parse_number(value)?),
            "break" => SettingChange::Minutes(SessionType::Break, parse_number(value)?),
            "long" => SettingChange::Minutes(SessionType::LongBreak, parse_number(value)?),
            "cadence" => SettingChange::Cadence(parse_number(value)?),
            "auto-breaks" => SettingChange::AutoStartBreaks(parse_switch(value)?),
            "auto-work" => SettingChange::AutoStartWork(parse_switch(value)?),
            "sound" => SettingChange::Sound(parse_switch(value)?),
            "volume" => SettingChange::Volume(parse_number(value)?),
            "warn" => match value.to_ascii_lowercase().as_str() {
                "off" | "0" => SettingChange::WarnBeforeEnd(None),
                seconds => SettingChange::WarnBeforeEnd(Some(parse_number(seconds)?)),
            },
            other => bail!("unknown setting '{other}'"),
        };
        Ok(change)
    }

    fn apply(self, store: &SettingsStore) -> Result<()> {
        match self {
            SettingChange::Minutes(session_type, minutes) => {
                let mut pomodoro = store.pomodoro();
                match session_type {
                    SessionType::Work => pomodoro.work_duration = minutes,
                    SessionType::Break => pomodoro.break_duration = minutes,
                    SessionType::LongBreak => pomodoro.long_break_duration = minutes,
                }
                store.update_pomodoro(pomodoro)
            }
            SettingChange::Cadence(count) => store.update_pomodoro(PomodoroSettings {
                sessions_until_long_break: count,
                ..store.pomodoro()
            }),
            SettingChange::AutoStartBreaks(enabled) => store.update_pomodoro(PomodoroSettings {
                auto_start_breaks: enabled,
                ..store.pomodoro()
            }),
            SettingChange::AutoStartWork(enabled) => store.update_pomodoro(PomodoroSettings {
                auto_start_work: enabled,
                ..store.pomodoro()
            }),
            SettingChange::Sound(enabled) => store.update_notifications(NotificationSettings {
                sound_enabled: enabled,
                ..store.notifications()
            }),
            SettingChange::Volume(volume) => store.update_notifications(NotificationSettings {
                volume,
                ..store.notifications()
            }),
            SettingChange::WarnBeforeEnd(seconds) => {
                let mut notifications = store.notifications();
                notifications.notify_before_end = seconds.is_some();
                if let Some(seconds) = seconds {
                    notifications.notify_before_end_time = seconds;
                }
                store.update_notifications(notifications)
            }
        }
    }
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("'{value}' is not a valid number"))
}

fn parse_switch(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => bail!("expected on or off, got '{other}'"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Login(UserId),
    Logout,
    Start(Option<SessionType>),
    Pause,
    Resume,
    Skip,
    Stop(Option<String>),
    Status,
    Log,
    Settings,
    Set(SettingChange),
    Help,
    Quit,
}

impl ShellCommand {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "login" => {
                if rest.is_empty() {
                    bail!("usage: login <user>");
                }
                ShellCommand::Login(UserId::new(rest))
            }
            "logout" => ShellCommand::Logout,
            "start" => ShellCommand::Start(parse_session_type(rest)?),
            "pause" => ShellCommand::Pause,
            "resume" => ShellCommand::Resume,
            "skip" => ShellCommand::Skip,
            "stop" => ShellCommand::Stop((!rest.is_empty()).then(|| rest.to_string())),
            "status" => ShellCommand::Status,
            "log" => ShellCommand::Log,
            "settings" => ShellCommand::Settings,
            "set" => ShellCommand::Set(SettingChange::parse(rest)?),
            "help" | "?" => ShellCommand::Help,
            "quit" | "exit" => ShellCommand::Quit,
            other => bail!("unknown command '{other}'; type 'help'"),
        };
        Ok(Some(command))
    }
}

fn parse_session_type(value: &str) -> Result<Option<SessionType>> {
    match value.to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "work" => Ok(Some(SessionType::Work)),
        "break" => Ok(Some(SessionType::Break)),
        "long" | "longbreak" | "long-break" => Ok(Some(SessionType::LongBreak)),
        other => bail!("unknown session type '{other}'"),
    }
}

pub async fn run_shell(
    focus: FocusOrchestrator,
    identity: Identity,
    settings: Arc<SettingsStore>,
) -> Result<()> {
    let reporter = tokio::spawn(report_transitions(focus.subscribe()));
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match ShellCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }
        if let Err(err) = execute(&focus, &identity, &settings, command).await {
            println!("error: {err:#}");
        }
    }

    reporter.abort();
    Ok(())
}

async fn execute(
    focus: &FocusOrchestrator,
    identity: &Identity,
    settings: &SettingsStore,
    command: ShellCommand,
) -> Result<()> {
    match command {
        ShellCommand::Login(user) => {
            println!("signed in as {user}");
            identity.sign_in(user);
        }
        ShellCommand::Logout => {
            identity.sign_out();
            println!("signed out");
        }
        ShellCommand::Start(session_type) => {
            let snapshot = focus.start_timer(session_type).await?;
            println!("{}", describe_timer(&snapshot));
        }
        ShellCommand::Pause => println!("{}", describe_timer(&focus.pause_timer().await?)),
        ShellCommand::Resume => println!("{}", describe_timer(&focus.resume_timer().await?)),
        ShellCommand::Skip => {
            if let Some(session) = focus.skip_timer().await? {
                println!("skipped: {}", describe_session(&session));
            }
        }
        ShellCommand::Stop(reason) => match focus.stop_timer(reason).await? {
            Some(session) => println!("stopped: {}", describe_session(&session)),
            None => println!("nothing to stop"),
        },
        ShellCommand::Status => {
            let snapshot = focus.snapshot().await?;
            let user = identity
                .current()
                .map(|user| user.to_string())
                .unwrap_or_else(|| "nobody".to_string());
            println!("{} | user {user}", describe_focus(&snapshot));
        }
        ShellCommand::Log => {
            let sessions = focus.sessions().await?;
            if sessions.is_empty() {
                println!("no sessions yet");
            }
            for session in &sessions {
                println!("{}", describe_session(session));
            }
        }
        ShellCommand::Settings => {
            println!("{}", describe_settings(&settings.pomodoro(), &settings.notifications()))
        }
        ShellCommand::Set(change) => {
            change.apply(settings)?;
            println!("{}", describe_settings(&settings.pomodoro(), &settings.notifications()));
        }
        ShellCommand::Help => println!("{HELP}"),
        ShellCommand::Quit => {}
    }
    Ok(())
}

/// Prints a line whenever the timer changes state, not on every tick.
async fn report_transitions(mut updates: watch::Receiver<TimerSnapshot>) {
    let mut last = updates.borrow_and_update().timer_state;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.timer_state != last {
            last = snapshot.timer_state;
            println!("[{}]", describe_timer(&snapshot));
        }
    }
}

fn describe_timer(snapshot: &TimerSnapshot) -> String {
    match snapshot.timer_state {
        TimerState::Idle => format!("idle, {} work sessions", snapshot.session_count),
        state => format!(
            "{} {} of {}",
            state.as_str(),
            format_clock(snapshot.time_remaining),
            format_clock(snapshot.total_time)
        ),
    }
}

fn describe_focus(snapshot: &FocusSnapshot) -> String {
    let timer = TimerSnapshot {
        timer_state: snapshot.timer_state,
        time_remaining: snapshot.time_remaining,
        total_time: snapshot.total_time,
        current_session: None,
        session_count: snapshot.session_count,
    };
    format!(
        "{} | {} logged sessions",
        describe_timer(&timer),
        snapshot.sessions.len()
    )
}

fn describe_settings(pomodoro: &PomodoroSettings, notifications: &NotificationSettings) -> String {
    let switch = |on: bool| if on { "on" } else { "off" };
    let warn = if notifications.notify_before_end {
        format!("{}s before end", notifications.notify_before_end_time)
    } else {
        "off".to_string()
    };
    format!(
        "work {}m, break {}m, long break {}m every {} | auto-breaks {}, auto-work {} | sound {} at {}, warn {warn}",
        pomodoro.work_duration,
        pomodoro.break_duration,
        pomodoro.long_break_duration,
        pomodoro.sessions_until_long_break,
        switch(pomodoro.auto_start_breaks),
        switch(pomodoro.auto_start_work),
        switch(notifications.sound_enabled),
        notifications.volume,
    )
}

fn describe_session(session: &Session) -> String {
    let outcome = if !session.is_finalized() {
        "in progress".to_string()
    } else if session.completed {
        "completed".to_string()
    } else if session.aborted {
        format!(
            "aborted ({})",
            session.abort_reason.as_deref().unwrap_or_default()
        )
    } else {
        "finalized".to_string()
    };
    format!(
        "{} {:<9} {} active, {} paused, {outcome}",
        session.start_time.format("%Y-%m-%d %H:%M"),
        session.session_type.as_str(),
        format_duration(session.active_secs()),
        format_duration(session.pause_duration),
    )
}
