mod client;
pub mod tasks;

pub use client::TmuxClient;

use std::env;
use std::time::{Duration, Instant};

use anyhow::Result;

/// How long without confirmed pane changes before a session counts as idle.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

const ACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(750);
const PENDING_ACTIVITY_POLL_DELAY: Duration = Duration::from_millis(250);
const ACTIVITY_CONFIRM_WINDOW: Duration = Duration::from_millis(500);
const CAPTURE_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Session option holding the directory the session was launched from.
pub const OPT_CWD: &str = "@pb_cwd";
/// Session option holding the configured command tag.
pub const OPT_COMMAND: &str = "@pb_command";
/// Session option holding the owning tool (claude/codex/cursor).
pub const OPT_TOOL: &str = "@pb_tool";
/// Session option set when the tool was launched with elevated permissions.
pub const OPT_YOLO: &str = "@pb_yolo";

/// Environment variable carrying the supervisor nesting level.
pub const LEVEL_ENV: &str = "PB_LEVEL";
/// Environment variable carrying the cwd the session was created from.
pub const CWD_ENV: &str = "PB_CWD";

const SOCKET_BASE: &str = "pocketbot";

/// Current supervisor nesting level, from the environment exported by the
/// parent that created this session. Zero when running at the top level.
pub fn nesting_level() -> u32 {
    env::var(LEVEL_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// The tmux server socket name for the current nesting level. Each level gets
/// its own server so nested supervisors never see the parent's sessions.
pub fn socket_name() -> String {
    match env::var(LEVEL_ENV) {
        Ok(level) if !level.is_empty() => format!("{SOCKET_BASE}-{level}"),
        _ => SOCKET_BASE.to_string(),
    }
}

/// Gateway to the terminal multiplexer. Every method is a synchronous
/// subprocess invocation; only `attach_session` takes the controlling
/// terminal. Production wires [`TmuxClient`]; tests inject a fake.
pub trait Multiplexer: Send + Sync {
    /// Whether the multiplexer binary is discoverable at all.
    fn available(&self) -> bool;
    fn session_exists(&self, name: &str) -> bool;
    /// Start a detached session in the current directory. The command is
    /// wrapped so the nesting environment is exported first, and the launch
    /// cwd and command tag are persisted as session options.
    fn create_session(&self, name: &str, command: &str) -> Result<()>;
    /// Replace foreground I/O with the multiplexer client. Blocks until the
    /// user detaches or the session dies.
    fn attach_session(&self, name: &str) -> Result<()>;
    fn kill_session(&self, name: &str) -> Result<()>;
    fn kill_server(&self) -> Result<()>;
    fn rename_session(&self, old: &str, new: &str) -> Result<()>;
    /// All live session names. Empty when the server is not running.
    fn list_sessions(&self) -> Vec<String>;
    /// The tail of the session's pane (last 10 lines).
    fn capture_pane(&self, name: &str) -> Result<String>;
    /// Root PIDs of the session's panes.
    fn pane_pids(&self, name: &str) -> Result<Vec<i32>>;
    /// A session option value, or "" when unset or unreadable.
    fn get_option(&self, name: &str, key: &str) -> String;
    fn set_option(&self, name: &str, key: &str, value: &str) -> Result<()>;
}

/// A multiplexer-backed session plus the state needed to classify it as
/// active or idle from captured pane tails.
pub struct Session {
    name: String,
    command: String,
    last_capture: Option<String>,
    last_activity: Option<Instant>,
    next_poll_at: Option<Instant>,
    pending_since: Option<Instant>,
}

impl Session {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            last_capture: None,
            last_activity: None,
            next_poll_at: None,
            pending_since: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Adopt a new name after a multiplexer-side rename, keeping the
    /// accumulated activity state.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Whether enough pane data has been captured to classify activity.
    pub fn activity_known(&self) -> bool {
        self.last_capture.is_some()
    }

    /// Active means a confirmed pane change happened within the idle timeout.
    pub fn is_active(&self, now: Instant) -> bool {
        match self.last_activity {
            Some(at) => now.duration_since(at) < IDLE_TIMEOUT,
            None => false,
        }
    }

    /// Poll the pane for changes and update the activity classification.
    ///
    /// Captures are rate-limited by an adaptive schedule: busy sessions are
    /// polled sub-second, long-quiet ones every 10s. A change must persist
    /// across a short confirm window before it counts as activity, so the
    /// initial snapshot and one-frame flickers are not misread.
    pub fn update_activity(&mut self, mux: &dyn Multiplexer, now: Instant) -> bool {
        if !mux.session_exists(&self.name) {
            return false;
        }
        if let Some(next) = self.next_poll_at {
            if now < next {
                return self.is_active(now);
            }
        }

        let current = match mux.capture_pane(&self.name) {
            Ok(out) => out,
            Err(_) => {
                self.next_poll_at = Some(now + CAPTURE_RETRY_DELAY);
                return self.is_active(now);
            }
        };

        // Baseline capture: never treat the first snapshot as activity.
        let Some(last) = self.last_capture.as_deref() else {
            self.last_capture = Some(current);
            self.pending_since = None;
            self.next_poll_at = Some(now + ACTIVE_POLL_INTERVAL);
            return self.is_active(now);
        };

        if current != last {
            let Some(pending) = self.pending_since else {
                self.pending_since = Some(now);
                self.next_poll_at = Some(now + PENDING_ACTIVITY_POLL_DELAY);
                return self.is_active(now);
            };
            if now.duration_since(pending) >= ACTIVITY_CONFIRM_WINDOW {
                self.last_capture = Some(current);
                self.last_activity = Some(now);
                self.pending_since = None;
                self.next_poll_at = Some(now + ACTIVE_POLL_INTERVAL);
                return true;
            }
            self.next_poll_at = Some(now + PENDING_ACTIVITY_POLL_DELAY);
            return self.is_active(now);
        }

        self.pending_since = None;
        let idle_for = self
            .last_activity
            .map(|at| now.duration_since(at))
            .unwrap_or(Duration::MAX);
        self.next_poll_at = Some(now + next_activity_poll_interval(idle_for));
        self.is_active(now)
    }
}

fn next_activity_poll_interval(idle_for: Duration) -> Duration {
    if idle_for < IDLE_TIMEOUT {
        Duration::from_secs(1)
    } else if idle_for < Duration::from_secs(30) {
        Duration::from_secs(2)
    } else if idle_for < Duration::from_secs(120) {
        Duration::from_secs(5)
    } else {
        Duration::from_secs(10)
    }
}
