use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use once_cell::sync::Lazy;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;
use regex::Regex;

use crate::actions::{Action, Keystroke};
use crate::config::{Config, Tool};
use crate::host::Host;
use crate::launch::{fallback_command, yolo_command};
use crate::registry::Registry;
use crate::tmux::{self, tasks, Multiplexer, OPT_TOOL, OPT_YOLO};

const MAX_HOME_LINES: usize = 20;
const PICKER_KEYS: &str = "abcdefghijklmnopqrstuvwxyz";
const MAX_DIR_SUGGESTIONS: usize = 9;
const TASK_SUMMARY_LIMIT: usize = 2;
const TASK_REFRESH_INTERVAL: Duration = Duration::from_millis(900);
const DETAILED_ROWS_LIMIT: usize = 10;

static SESSION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9 ._\-]+$").unwrap());

fn valid_session_name(name: &str) -> bool {
    SESSION_NAME_RE.is_match(name)
}

fn picker_key(i: usize) -> Option<char> {
    PICKER_KEYS.chars().nth(i)
}

/// One selectable entry in the task-kill picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskKillTarget {
    pub session: String,
    pub pid: i32,
    pub command: String,
}

/// The UI's interaction state. Every non-home mode exits to home via `esc`
/// without side effects; abandoning a mode drops its state with it.
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Home,
    NewTool {
        yolo: bool,
    },
    KillTool,
    RenameTool,
    PickAttach {
        tool: Tool,
        targets: BTreeMap<char, String>,
    },
    PickKill {
        tool: Tool,
        targets: BTreeMap<char, String>,
    },
    PickRename {
        tool: Tool,
        targets: BTreeMap<char, String>,
    },
    RenameInput {
        target: String,
        draft: String,
    },
    PickKillTask {
        targets: BTreeMap<char, TaskKillTarget>,
    },
    DirJump {
        query: String,
        suggestions: Vec<String>,
        selection: usize,
    },
}

struct Theme {
    title: Style,
    meta: Style,
    key: Style,
    active: Style,
    idle: Style,
    repo: Style,
    alert: Style,
    selected: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            title: Style::default()
                .fg(Color::Rgb(125, 86, 244))
                .add_modifier(Modifier::BOLD),
            meta: Style::default().fg(Color::Rgb(136, 136, 136)),
            key: Style::default().fg(Color::Rgb(77, 163, 255)),
            active: Style::default()
                .fg(Color::Rgb(4, 181, 117))
                .add_modifier(Modifier::BOLD),
            idle: Style::default().fg(Color::Rgb(153, 153, 153)),
            repo: Style::default()
                .fg(Color::Rgb(125, 86, 244))
                .add_modifier(Modifier::BOLD),
            alert: Style::default().fg(Color::Rgb(77, 163, 255)),
            selected: Style::default()
                .fg(Color::Rgb(4, 181, 117))
                .add_modifier(Modifier::BOLD),
        }
    }
}

/// The supervisor UI: owns the registry, interprets keystrokes against the
/// current mode, and renders the compact home screen. `handle_action`
/// returning true means the UI loop should exit; a pending attach request
/// tells the outer loop what to do next.
pub struct App {
    config: Config,
    mux: Arc<dyn Multiplexer>,
    host: Arc<dyn Host>,
    registry: Registry,
    mode: Mode,
    notice: Option<String>,
    show_task_details: bool,
    task_counts: HashMap<String, usize>,
    task_commands: HashMap<String, Vec<String>>,
    task_refresh_at: Option<Instant>,
    attach_request: Option<String>,
    theme: Theme,
}

impl App {
    pub fn new(config: Config, mux: Arc<dyn Multiplexer>, host: Arc<dyn Host>) -> Self {
        let mut registry = Registry::new(Arc::clone(&mux));
        registry.reconcile(&config, Instant::now());
        Self {
            config,
            mux,
            host,
            registry,
            mode: Mode::Home,
            notice: None,
            show_task_details: false,
            task_counts: HashMap::new(),
            task_commands: HashMap::new(),
            task_refresh_at: None,
            attach_request: None,
            theme: Theme::default(),
        }
    }

    /// The attach request set by the last keystroke, consumed exactly once.
    pub fn take_attach_request(&mut self) -> Option<String> {
        self.attach_request.take()
    }

    /// Handle one event; returns true when the UI loop should exit.
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::Tick => {
                self.on_tick(Instant::now());
                Ok(false)
            }
            Action::Resize => Ok(false),
            Action::Key(ks) => self.handle_key(ks, Instant::now()),
        }
    }

    fn on_tick(&mut self, now: Instant) {
        self.registry.reconcile(&self.config, now);
        self.registry.update_activity(now);
        self.refresh_task_counts(now, false);
    }

    fn handle_key(&mut self, ks: Keystroke, now: Instant) -> Result<bool> {
        // The mode machine always operates on a just-refreshed view.
        self.registry.reconcile(&self.config, now);

        match ks {
            Keystroke::CtrlC => {
                // Fatal: take the whole server down with us.
                let _ = self.mux.kill_server();
                return Ok(true);
            }
            Keystroke::Esc => {
                if !matches!(self.mode, Mode::Home) {
                    self.reset_to_home();
                }
                return Ok(false);
            }
            Keystroke::Char('d') => match self.mode {
                Mode::Home => return Ok(true),
                Mode::NewTool { .. } | Mode::KillTool | Mode::RenameTool => {
                    self.reset_to_home();
                    return Ok(false);
                }
                // In pickers and text input, d is an ordinary character.
                _ => {}
            },
            _ => {}
        }

        let mode = std::mem::replace(&mut self.mode, Mode::Home);
        match mode {
            Mode::Home => self.handle_home_key(ks),
            Mode::NewTool { yolo } => self.handle_new_tool_key(ks, yolo),
            Mode::KillTool => self.handle_kill_tool_key(ks),
            Mode::RenameTool => self.handle_rename_tool_key(ks),
            Mode::PickAttach { tool, targets } => self.handle_pick_attach(ks, tool, targets),
            Mode::PickKill { tool, targets } => self.handle_pick_kill(ks, tool, targets),
            Mode::PickRename { tool, targets } => self.handle_pick_rename(ks, tool, targets),
            Mode::RenameInput { target, draft } => self.handle_rename_input(ks, target, draft),
            Mode::PickKillTask { targets } => self.handle_pick_kill_task(ks, targets),
            Mode::DirJump {
                query,
                suggestions,
                selection,
            } => self.handle_dir_jump(ks, query, suggestions, selection),
        }
    }

    fn reset_to_home(&mut self) {
        self.mode = Mode::Home;
        self.notice = None;
    }

    fn cwd_string(&self) -> Option<String> {
        let cwd = self.host.cwd()?;
        let cwd = cwd.to_string_lossy().into_owned();
        (!cwd.is_empty()).then_some(cwd)
    }

    fn handle_home_key(&mut self, ks: Keystroke) -> Result<bool> {
        let Keystroke::Char(c) = ks else {
            return Ok(false);
        };

        if let Some(tool) = self.config.tool_for_key(c) {
            return self.handle_tool_attach(tool);
        }

        match c {
            'z' => {
                if !self.host.jump_available() {
                    self.notice = Some("fasder not found; install fasder to use z".to_string());
                    return Ok(false);
                }
                self.notice = None;
                self.mode = Mode::DirJump {
                    query: String::new(),
                    suggestions: Vec::new(),
                    selection: 0,
                };
                self.refresh_dir_suggestions();
            }
            'n' => {
                self.mode = Mode::NewTool { yolo: false };
                self.notice = None;
            }
            'k' => {
                if !self.registry.has_any_running() {
                    self.notice = Some("no running sessions to kill".to_string());
                    return Ok(false);
                }
                self.mode = Mode::KillTool;
                self.notice = None;
            }
            'r' => {
                if !self.registry.has_any_running() {
                    self.notice = Some("no running sessions to rename".to_string());
                    return Ok(false);
                }
                self.mode = Mode::RenameTool;
                self.notice = None;
            }
            't' => {
                self.show_task_details = !self.show_task_details;
            }
            _ => {
                let custom = self
                    .config
                    .sessions
                    .iter()
                    .find(|s| s.key == c)
                    .map(|s| (s.name.clone(), s.command.clone()));
                if let Some((name, command)) = custom {
                    return self.start_and_attach(&name, Some(&command));
                }
            }
        }
        Ok(false)
    }

    fn handle_tool_attach(&mut self, tool: Tool) -> Result<bool> {
        if let Some(cwd) = self.cwd_string() {
            let in_dir = self.registry.running_in_dir(tool, &cwd);
            match in_dir.len() {
                0 => {}
                1 => return self.start_and_attach(&in_dir[0], None),
                _ => {
                    let (targets, _) = picker_targets(&in_dir);
                    self.mode = Mode::PickAttach { tool, targets };
                    self.notice = Some("multiple sessions in this directory".to_string());
                    return Ok(false);
                }
            }
        }

        let targets = self.registry.running_by_tool(tool);
        match targets.len() {
            0 => self.create_and_attach_tool(tool, false),
            1 => self.start_and_attach(&targets[0], None),
            _ => {
                self.enter_picker(tool, &targets, PickerKind::Attach);
                Ok(false)
            }
        }
    }

    fn create_and_attach_tool(&mut self, tool: Tool, yolo: bool) -> Result<bool> {
        if let Some(cwd) = self.cwd_string() {
            let in_dir = self.registry.running_in_dir(tool, &cwd);
            match in_dir.len() {
                0 => {}
                1 => return self.request_attach(&in_dir[0]),
                _ => {
                    let (targets, _) = picker_targets(&in_dir);
                    self.mode = Mode::PickAttach { tool, targets };
                    self.notice = Some("session already running in this directory".to_string());
                    return Ok(false);
                }
            }
        }

        let command = self.config.tool(tool).command.clone();
        if command.is_empty() {
            self.notice = Some(format!("{tool} is not configured"));
            self.mode = Mode::Home;
            return Ok(false);
        }
        let command = if yolo {
            yolo_command(tool, &command)
        } else {
            command
        };

        let name = self.registry.next_name(tool);
        let launch = fallback_command(Some(tool), &command);
        if let Err(err) = self.mux.create_session(&name, &launch) {
            self.notice = Some(format!("failed to create {tool}: {err}"));
            self.mode = Mode::Home;
            return Ok(false);
        }
        if let Err(err) = self.mux.set_option(&name, OPT_TOOL, tool.as_str()) {
            tracing::warn!(session = %name, %err, "could not persist tool tag");
        }
        if yolo {
            if let Err(err) = self.mux.set_option(&name, OPT_YOLO, "1") {
                tracing::warn!(session = %name, %err, "could not persist yolo flag");
            }
        }
        self.registry.install(&name, &command, Some(tool));
        self.registry.reconcile(&self.config, Instant::now());
        self.request_attach(&name)
    }

    /// Ensure the named session exists (creating it when needed) and exit
    /// the UI loop with an attach request for it.
    fn start_and_attach(&mut self, name: &str, command: Option<&str>) -> Result<bool> {
        if !self.registry.contains(name) {
            self.registry
                .install(name, command.unwrap_or(""), Tool::from_session_name(name));
        }
        if !self.mux.session_exists(name) {
            let mut cmd = command.map(str::to_string).unwrap_or_default();
            if cmd.is_empty() {
                cmd = self
                    .registry
                    .session(name)
                    .map(|s| s.command().to_string())
                    .unwrap_or_default();
            }
            if cmd.is_empty() {
                if let Some(tool) = Tool::from_session_name(name) {
                    cmd = self.config.tool(tool).command.clone();
                }
            }
            if cmd.is_empty() {
                self.notice = Some(format!("session {name} is not running"));
                self.mode = Mode::Home;
                return Ok(false);
            }
            let tool = self
                .registry
                .tool_of(name)
                .or_else(|| Tool::from_session_name(name));
            let launch = fallback_command(tool, &cmd);
            if let Err(err) = self.mux.create_session(name, &launch) {
                self.notice = Some(format!("failed to start {name}: {err}"));
                self.mode = Mode::Home;
                return Ok(false);
            }
        }
        self.registry.reconcile(&self.config, Instant::now());
        self.request_attach(name)
    }

    fn request_attach(&mut self, name: &str) -> Result<bool> {
        self.attach_request = Some(name.to_string());
        self.notice = None;
        self.mode = Mode::Home;
        Ok(true)
    }

    fn handle_new_tool_key(&mut self, ks: Keystroke, yolo: bool) -> Result<bool> {
        let Keystroke::Char(c) = ks else {
            self.mode = Mode::NewTool { yolo };
            return Ok(false);
        };
        if c == 'y' {
            self.mode = Mode::NewTool { yolo: !yolo };
            return Ok(false);
        }
        if let Some(tool) = self.config.tool_for_key(c) {
            if let Some(cwd) = self.cwd_string() {
                if !self.registry.running_in_dir(tool, &cwd).is_empty() {
                    self.notice = Some(format!("{tool} already running in this directory"));
                    self.mode = Mode::NewTool { yolo };
                    return Ok(false);
                }
            }
            return self.create_and_attach_tool(tool, yolo);
        }
        self.notice = Some(format!(
            "Unknown new target {c:?}. Use {}.",
            self.enabled_tool_keys()
        ));
        self.mode = Mode::NewTool { yolo };
        Ok(false)
    }

    fn enabled_tool_keys(&self) -> String {
        let keys: Vec<String> = Tool::ALL
            .into_iter()
            .filter(|&t| self.config.tool(t).enabled)
            .map(|t| self.config.tool(t).key.to_string())
            .collect();
        keys.join(", ")
    }

    fn handle_kill_tool_key(&mut self, ks: Keystroke) -> Result<bool> {
        if !Tool::ALL
            .into_iter()
            .any(|t| !self.registry.running_by_tool(t).is_empty())
        {
            self.mode = Mode::Home;
            self.notice = Some("no kill targets are running".to_string());
            return Ok(false);
        }
        let Keystroke::Char(c) = ks else {
            self.mode = Mode::KillTool;
            return Ok(false);
        };
        if c == 't' {
            return self.enter_task_kill_picker();
        }
        if let Some(tool) = self.config.tool_for_key(c) {
            let targets = self.registry.running_by_tool(tool);
            match targets.len() {
                0 => {
                    self.notice = Some(format!("{tool} is not running"));
                    self.mode = Mode::KillTool;
                }
                1 => {
                    self.kill_session_now(&targets[0]);
                    self.mode = Mode::Home;
                }
                _ => self.enter_picker(tool, &targets, PickerKind::Kill),
            }
            return Ok(false);
        }
        self.notice = Some(format!("Unknown kill target {c:?}."));
        self.mode = Mode::KillTool;
        Ok(false)
    }

    fn handle_rename_tool_key(&mut self, ks: Keystroke) -> Result<bool> {
        if !Tool::ALL
            .into_iter()
            .any(|t| !self.registry.running_by_tool(t).is_empty())
        {
            self.mode = Mode::Home;
            self.notice = Some("no rename targets are running".to_string());
            return Ok(false);
        }
        let Keystroke::Char(c) = ks else {
            self.mode = Mode::RenameTool;
            return Ok(false);
        };
        if let Some(tool) = self.config.tool_for_key(c) {
            let targets = self.registry.running_by_tool(tool);
            match targets.len() {
                0 => {
                    self.notice = Some(format!("{tool} is not running"));
                    self.mode = Mode::RenameTool;
                }
                1 => {
                    self.notice = None;
                    self.mode = Mode::RenameInput {
                        target: targets[0].clone(),
                        draft: String::new(),
                    };
                }
                _ => self.enter_picker(tool, &targets, PickerKind::Rename),
            }
            return Ok(false);
        }
        self.notice = Some(format!("Unknown rename target {c:?}."));
        self.mode = Mode::RenameTool;
        Ok(false)
    }

    fn handle_pick_attach(
        &mut self,
        ks: Keystroke,
        tool: Tool,
        targets: BTreeMap<char, String>,
    ) -> Result<bool> {
        if let Keystroke::Char(c) = ks {
            if let Some(name) = targets.get(&c) {
                return self.start_and_attach(&name.clone(), None);
            }
            self.notice = Some(format!("Unknown target {c:?}."));
        }
        self.mode = Mode::PickAttach { tool, targets };
        Ok(false)
    }

    fn handle_pick_kill(
        &mut self,
        ks: Keystroke,
        tool: Tool,
        targets: BTreeMap<char, String>,
    ) -> Result<bool> {
        if let Keystroke::Char(c) = ks {
            if let Some(name) = targets.get(&c) {
                self.kill_session_now(&name.clone());
                self.mode = Mode::Home;
                return Ok(false);
            }
            self.notice = Some(format!("Unknown target {c:?}."));
        }
        self.mode = Mode::PickKill { tool, targets };
        Ok(false)
    }

    fn handle_pick_rename(
        &mut self,
        ks: Keystroke,
        tool: Tool,
        targets: BTreeMap<char, String>,
    ) -> Result<bool> {
        if let Keystroke::Char(c) = ks {
            if let Some(name) = targets.get(&c) {
                self.notice = None;
                self.mode = Mode::RenameInput {
                    target: name.clone(),
                    draft: String::new(),
                };
                return Ok(false);
            }
            self.notice = Some(format!("Unknown target {c:?}."));
        }
        self.mode = Mode::PickRename { tool, targets };
        Ok(false)
    }

    fn handle_rename_input(
        &mut self,
        ks: Keystroke,
        target: String,
        mut draft: String,
    ) -> Result<bool> {
        match ks {
            Keystroke::Enter => self.apply_rename_target(target, draft),
            Keystroke::Backspace => {
                draft.pop();
                self.mode = Mode::RenameInput { target, draft };
                Ok(false)
            }
            Keystroke::Char(c) => {
                draft.push(c);
                self.mode = Mode::RenameInput { target, draft };
                Ok(false)
            }
            _ => {
                self.mode = Mode::RenameInput { target, draft };
                Ok(false)
            }
        }
    }

    fn apply_rename_target(&mut self, target: String, draft: String) -> Result<bool> {
        let stay = |app: &mut App, notice: String, target: String, draft: String| {
            app.notice = Some(notice);
            app.mode = Mode::RenameInput { target, draft };
        };

        if draft.is_empty() {
            stay(self, "name cannot be empty".to_string(), target, draft);
            return Ok(false);
        }
        if !valid_session_name(&draft) {
            stay(
                self,
                "name may use letters, digits, spaces, . _ -".to_string(),
                target,
                draft,
            );
            return Ok(false);
        }
        if draft == target {
            stay(self, "name is unchanged".to_string(), target, draft);
            return Ok(false);
        }
        match self.registry.apply_rename(&target, &draft) {
            Ok(()) => {
                self.registry.reconcile(&self.config, Instant::now());
                self.notice = Some(format!("renamed {target} to {draft}"));
                self.mode = Mode::Home;
            }
            Err(err) => stay(self, format!("failed to rename {target}: {err}"), target, draft),
        }
        Ok(false)
    }

    fn kill_session_now(&mut self, name: &str) {
        match self.mux.kill_session(name) {
            Ok(()) => {
                self.notice = Some(format!("stopped {name}"));
                self.registry.forget(name);
            }
            Err(err) => {
                self.notice = Some(format!("failed to stop {name}: {err}"));
            }
        }
        self.registry.reconcile(&self.config, Instant::now());
    }

    fn enter_task_kill_picker(&mut self) -> Result<bool> {
        let mut found = Vec::new();
        for name in self.registry.running_names() {
            let Ok(user_tasks) = tasks::session_user_tasks(self.mux.as_ref(), &name) else {
                continue;
            };
            for task in user_tasks {
                found.push(TaskKillTarget {
                    session: name.clone(),
                    pid: task.pid,
                    command: task.command,
                });
            }
        }

        if found.is_empty() {
            self.mode = Mode::Home;
            self.notice = Some("no tasks to kill".to_string());
            return Ok(false);
        }

        let truncated = found.len() > PICKER_KEYS.len();
        let mut targets = BTreeMap::new();
        for (i, target) in found.into_iter().enumerate() {
            let Some(key) = picker_key(i) else { break };
            targets.insert(key, target);
        }
        self.notice = truncated.then(|| "showing first 26 tasks".to_string());
        self.mode = Mode::PickKillTask { targets };
        Ok(false)
    }

    fn handle_pick_kill_task(
        &mut self,
        ks: Keystroke,
        targets: BTreeMap<char, TaskKillTarget>,
    ) -> Result<bool> {
        if let Keystroke::Char(c) = ks {
            let Some(target) = targets.get(&c) else {
                self.notice = Some(format!("Unknown task target {c:?}."));
                self.mode = Mode::PickKillTask { targets };
                return Ok(false);
            };
            match self.host.kill_task(target.pid) {
                Ok(()) => self.notice = Some(format!("killed pid {}", target.pid)),
                Err(err) => {
                    self.notice = Some(format!("failed to kill pid {}: {err}", target.pid))
                }
            }
            self.mode = Mode::Home;
            self.refresh_task_counts(Instant::now(), true);
            return Ok(false);
        }
        self.mode = Mode::PickKillTask { targets };
        Ok(false)
    }

    fn handle_dir_jump(
        &mut self,
        ks: Keystroke,
        mut query: String,
        mut suggestions: Vec<String>,
        mut selection: usize,
    ) -> Result<bool> {
        match ks {
            Keystroke::Enter => {
                if suggestions.is_empty() {
                    if let Ok(mut dirs) = self.host.jump_candidates(&query) {
                        dirs.truncate(MAX_DIR_SUGGESTIONS);
                        suggestions = dirs;
                    }
                }
                if suggestions.is_empty() {
                    self.notice = Some("no matching directories".to_string());
                    self.mode = Mode::DirJump {
                        query,
                        suggestions,
                        selection,
                    };
                    return Ok(false);
                }
                let idx = selection.min(suggestions.len() - 1);
                let target = suggestions[idx].clone();
                match self.host.chdir(Path::new(&target)) {
                    Ok(()) => {
                        self.mode = Mode::Home;
                        self.notice = None;
                    }
                    Err(err) => {
                        self.notice = Some(format!("cd failed: {err}"));
                        self.mode = Mode::DirJump {
                            query,
                            suggestions,
                            selection,
                        };
                    }
                }
            }
            Keystroke::Up => {
                if !suggestions.is_empty() {
                    selection = if selection == 0 {
                        suggestions.len() - 1
                    } else {
                        selection - 1
                    };
                }
                self.mode = Mode::DirJump {
                    query,
                    suggestions,
                    selection,
                };
            }
            Keystroke::Down => {
                if !suggestions.is_empty() {
                    selection = (selection + 1) % suggestions.len();
                }
                self.mode = Mode::DirJump {
                    query,
                    suggestions,
                    selection,
                };
            }
            Keystroke::Backspace => {
                query.pop();
                self.mode = Mode::DirJump {
                    query,
                    suggestions,
                    selection: 0,
                };
                self.refresh_dir_suggestions();
            }
            Keystroke::Char(c) => {
                // Typing refines the query; it never selects a suggestion.
                query.push(c);
                self.mode = Mode::DirJump {
                    query,
                    suggestions,
                    selection: 0,
                };
                self.refresh_dir_suggestions();
            }
            _ => {
                self.mode = Mode::DirJump {
                    query,
                    suggestions,
                    selection,
                };
            }
        }
        Ok(false)
    }

    fn refresh_dir_suggestions(&mut self) {
        let Mode::DirJump { query, .. } = &self.mode else {
            return;
        };
        let query = query.clone();
        let fresh = match self.host.jump_candidates(&query) {
            Ok(mut dirs) => {
                dirs.truncate(MAX_DIR_SUGGESTIONS);
                dirs
            }
            Err(_) => Vec::new(),
        };
        if let Mode::DirJump {
            suggestions,
            selection,
            ..
        } = &mut self.mode
        {
            *suggestions = fresh;
            if suggestions.is_empty() {
                *selection = 0;
            } else if *selection >= suggestions.len() {
                *selection = suggestions.len() - 1;
            }
        }
    }

    fn enter_picker(&mut self, tool: Tool, names: &[String], kind: PickerKind) {
        let (targets, truncated) = picker_targets(names);
        self.notice = truncated.then(|| "showing first 26 sessions".to_string());
        self.mode = match kind {
            PickerKind::Attach => Mode::PickAttach { tool, targets },
            PickerKind::Kill => Mode::PickKill { tool, targets },
            PickerKind::Rename => Mode::PickRename { tool, targets },
        };
    }

    fn refresh_task_counts(&mut self, now: Instant, force: bool) {
        if !force {
            if let Some(at) = self.task_refresh_at {
                if now.duration_since(at) < TASK_REFRESH_INTERVAL {
                    return;
                }
            }
        }

        let mut counts = HashMap::new();
        let mut commands = HashMap::new();
        for name in self.registry.running_names() {
            let Ok(user_tasks) = tasks::session_user_tasks(self.mux.as_ref(), &name) else {
                continue;
            };
            counts.insert(name.clone(), user_tasks.len());
            if !user_tasks.is_empty() {
                commands.insert(
                    name.clone(),
                    summarize_task_commands(&user_tasks, TASK_SUMMARY_LIMIT),
                );
            }
        }
        self.task_counts = counts;
        self.task_commands = commands;
        self.task_refresh_at = Some(now);
    }

    pub fn render(&self, frame: &mut Frame) {
        let lines = cap_lines(self.home_lines(Instant::now()), MAX_HOME_LINES);
        frame.render_widget(Paragraph::new(lines), frame.area());
    }

    fn home_lines(&self, now: Instant) -> Vec<Line<'static>> {
        let t = &self.theme;
        let mut lines: Vec<Line<'static>> = Vec::new();

        let title = match tmux::nesting_level() {
            0 => "🤖 Welcome to PocketBot".to_string(),
            level => format!("🤖 Welcome to PocketBot (level {level})"),
        };
        lines.push(Line::from(Span::styled(title, t.title)));
        lines.push(Line::from(Span::styled(
            format!("dir: {}", self.cwd_string().unwrap_or_default()),
            t.meta,
        )));

        if let Some(notice) = &self.notice {
            lines.push(Line::from(Span::styled(notice.clone(), t.alert)));
        }
        if matches!(self.mode, Mode::Home) {
            let mismatches = self.mismatch_count();
            if mismatches > 0 {
                lines.push(Line::from(Span::styled(
                    format!("{mismatches} session(s) running from different directories"),
                    t.alert,
                )));
            }
        }

        match &self.mode {
            Mode::Home => self.home_body(&mut lines, now),
            Mode::NewTool { yolo } => self.new_tool_body(&mut lines, *yolo),
            Mode::KillTool => self.tool_menu_body(&mut lines, "kill", true),
            Mode::RenameTool => self.tool_menu_body(&mut lines, "rename", false),
            Mode::PickAttach { tool, targets } => {
                self.picker_body(&mut lines, "attach", *tool, targets, now)
            }
            Mode::PickKill { tool, targets } => {
                self.picker_body(&mut lines, "kill", *tool, targets, now)
            }
            Mode::PickRename { tool, targets } => {
                self.picker_body(&mut lines, "rename", *tool, targets, now)
            }
            Mode::RenameInput { target, draft } => {
                lines.push(Line::from(Span::styled(format!("rename {target}"), t.title)));
                lines.push(Line::from(vec![
                    Span::styled("new name: ", t.key),
                    Span::raw(format!("{draft}▌")),
                ]));
                lines.push(Line::from(Span::styled("enter apply   esc cancel", t.meta)));
            }
            Mode::PickKillTask { targets } => {
                lines.push(Line::from(Span::styled("kill task".to_string(), t.meta)));
                lines.push(Line::from(Span::styled(
                    "pick one key to kill task".to_string(),
                    t.alert,
                )));
                for (key, target) in targets {
                    lines.push(Line::from(vec![
                        Span::styled(format!("({key}) "), t.key),
                        Span::raw(format!(
                            "{} pid:{} {}",
                            target.session, target.pid, target.command
                        )),
                    ]));
                }
                lines.push(Line::from("esc cancel".to_string()));
            }
            Mode::DirJump {
                query,
                suggestions,
                selection,
            } => {
                lines.push(Line::from(Span::styled("z fasder jump".to_string(), t.title)));
                lines.push(Line::from(vec![
                    Span::styled("search: ", t.key),
                    Span::raw(query.clone()),
                ]));
                lines.push(Line::from(Span::styled(
                    "up/down move   enter select   esc cancel".to_string(),
                    t.meta,
                )));
                for (i, suggestion) in suggestions.iter().enumerate() {
                    if i == *selection {
                        lines.push(Line::from(Span::styled(format!("> {suggestion}"), t.selected)));
                    } else {
                        lines.push(Line::from(Span::styled(format!("  {suggestion}"), t.idle)));
                    }
                }
            }
        }

        lines
    }

    fn home_body(&self, lines: &mut Vec<Line<'static>>, now: Instant) {
        let t = &self.theme;
        let per_tool: Vec<(Tool, Vec<String>)> = Tool::ALL
            .into_iter()
            .map(|tool| (tool, self.registry.running_by_tool(tool)))
            .collect();
        let total: usize = per_tool.iter().map(|(_, names)| names.len()).sum();

        lines.push(Line::from(String::new()));
        lines.push(Line::from(Span::styled(format!("instances: {total}"), t.meta)));
        if total < DETAILED_ROWS_LIMIT {
            for (tool, names) in &per_tool {
                lines.extend(self.detailed_rows(*tool, names, now));
            }
        } else {
            for (tool, names) in &per_tool {
                lines.push(self.summary_row(*tool, names, now));
            }
        }

        lines.push(Line::from(String::new()));
        lines.push(Line::from(vec![
            Span::styled("z", t.key),
            Span::raw(" jump-dir   "),
            Span::styled("n", t.key),
            Span::raw(" new   "),
            Span::styled("k", t.key),
            Span::raw(" kill   "),
            Span::styled("r", t.key),
            Span::raw(" rename"),
        ]));
        lines.push(Line::from(vec![
            Span::styled("t", t.key),
            Span::raw(if self.show_task_details {
                " hide tasks"
            } else {
                " show tasks"
            }),
        ]));
        lines.push(Line::from(vec![
            Span::styled("d", t.key),
            Span::raw(" quit   "),
            Span::styled("^c", t.key),
            Span::raw(" kill-all"),
        ]));
    }

    fn new_tool_body(&self, lines: &mut Vec<Line<'static>>, yolo: bool) {
        let t = &self.theme;
        let cwd = self.cwd_string().unwrap_or_default();
        for tool in Tool::ALL {
            let cfg = self.config.tool(tool);
            if !cfg.enabled {
                continue;
            }
            if !cwd.is_empty() && !self.registry.running_in_dir(tool, &cwd).is_empty() {
                lines.push(Line::from(Span::styled(
                    format!("{tool} already running"),
                    t.meta,
                )));
            } else {
                lines.push(Line::from(vec![
                    Span::styled(cfg.key.to_string(), t.key),
                    Span::raw(format!(" new {tool}")),
                ]));
            }
        }
        lines.push(Line::from(vec![
            Span::styled("y", t.key),
            Span::raw(" yolo: "),
            if yolo {
                Span::styled("ON".to_string(), t.active)
            } else {
                Span::styled("off".to_string(), t.meta)
            },
        ]));
        lines.push(Line::from("esc cancel".to_string()));
    }

    fn tool_menu_body(&self, lines: &mut Vec<Line<'static>>, action: &str, with_tasks: bool) {
        let t = &self.theme;
        for tool in Tool::ALL {
            let names = self.registry.running_by_tool(tool);
            if names.is_empty() {
                continue;
            }
            let key = self.config.tool(tool).key;
            if names.len() == 1 {
                lines.push(Line::from(vec![
                    Span::styled(key.to_string(), t.key),
                    Span::raw(format!(" {action} {tool}")),
                ]));
                continue;
            }
            for (i, name) in names.iter().enumerate() {
                let Some(letter) = picker_key(i) else { break };
                let repo = self.repo_of(name);
                lines.push(Line::from(vec![
                    Span::styled(format!("({key} {letter}) "), t.key),
                    Span::raw(format!("{name} ")),
                    Span::styled("repo:", t.meta),
                    Span::styled(repo, t.repo),
                ]));
            }
        }
        if with_tasks {
            lines.push(Line::from(vec![
                Span::styled("t", t.key),
                Span::raw(" kill task"),
            ]));
        }
        lines.push(Line::from("esc cancel".to_string()));
    }

    fn picker_body(
        &self,
        lines: &mut Vec<Line<'static>>,
        action: &str,
        tool: Tool,
        targets: &BTreeMap<char, String>,
        now: Instant,
    ) {
        let t = &self.theme;
        lines.push(Line::from(Span::styled(format!("{action} {tool}"), t.meta)));
        let prompt = format!("pick one key to {action}");
        if action == "kill" {
            lines.push(Line::from(Span::styled(prompt, t.alert)));
        } else {
            lines.push(Line::from(Span::styled(prompt, t.meta)));
        }
        for (key, name) in targets {
            let mut spans = vec![
                Span::styled(format!("({key}) "), t.key),
                Span::raw(format!("{name} ")),
            ];
            if let Some(session) = self.registry.session(name) {
                if session.activity_known() {
                    if session.is_active(now) {
                        spans.push(Span::styled("● ".to_string(), t.active));
                    } else {
                        spans.push(Span::styled("○ ".to_string(), t.idle));
                    }
                }
            }
            spans.push(Span::styled(self.repo_of(name), t.repo));
            lines.push(Line::from(spans));
        }
        lines.push(Line::from("esc cancel".to_string()));
    }

    fn detailed_rows(&self, tool: Tool, names: &[String], now: Instant) -> Vec<Line<'static>> {
        let t = &self.theme;
        let cfg = self.config.tool(tool);
        let mut rows = Vec::new();
        if names.is_empty() {
            if !cfg.enabled {
                return rows;
            }
            rows.push(Line::from(vec![
                Span::styled(format!("({}) ", cfg.key), t.key),
                Span::raw(format!("{tool} ")),
                Span::styled("repo:", t.meta),
                Span::styled("- ".to_string(), t.repo),
                Span::styled("○ not running".to_string(), t.idle),
            ]));
            return rows;
        }

        for (i, name) in names.iter().enumerate() {
            let join = if names.len() > 1 {
                let Some(letter) = picker_key(i) else { continue };
                format!("{} {}", cfg.key, letter)
            } else {
                cfg.key.to_string()
            };

            let mut spans = vec![
                Span::styled(format!("({join}) "), t.key),
                Span::raw(format!("{name} ")),
            ];
            if self.binding_yolo(name) {
                spans.push(Span::styled("(yolo) ".to_string(), t.alert));
            }
            spans.push(Span::styled("repo:", t.meta));
            spans.push(Span::styled(format!("{} ", self.repo_of(name)), t.repo));
            if !self.show_task_details {
                if let Some(&n) = self.task_counts.get(name) {
                    if n > 0 {
                        spans.push(Span::styled(format!("tasks:{n} "), t.key));
                    }
                }
            }
            if let Some(session) = self.registry.session(name) {
                if session.activity_known() {
                    if session.is_active(now) {
                        spans.push(Span::styled("● active".to_string(), t.active));
                    } else {
                        spans.push(Span::styled("○ idle".to_string(), t.idle));
                    }
                }
            }
            rows.push(Line::from(spans));

            if self.show_task_details {
                if let Some(commands) = self.task_commands.get(name) {
                    for command in commands {
                        rows.push(Line::from(Span::styled(
                            format!("  task: {command}"),
                            t.meta,
                        )));
                    }
                }
            }
        }
        rows
    }

    fn summary_row(&self, tool: Tool, names: &[String], now: Instant) -> Line<'static> {
        let t = &self.theme;
        let active = names
            .iter()
            .filter(|name| {
                self.registry
                    .session(name)
                    .map(|s| s.is_active(now))
                    .unwrap_or(false)
            })
            .count();
        let task_total: usize = names
            .iter()
            .filter_map(|name| self.task_counts.get(name))
            .sum();

        let mut spans = vec![
            Span::raw(format!("{tool} {} ", names.len())),
            Span::styled(format!("active:{active} "), t.active),
            Span::styled(format!("idle:{} ", names.len() - active), t.meta),
        ];
        if task_total > 0 {
            spans.push(Span::styled(format!("tasks:{task_total}"), t.meta));
        }
        Line::from(spans)
    }

    fn repo_of(&self, name: &str) -> String {
        let Some(binding) = self.registry.binding(name) else {
            return "-".to_string();
        };
        repo_from_cwd(&binding.cwd)
    }

    fn binding_yolo(&self, name: &str) -> bool {
        self.registry.binding(name).map(|b| b.yolo).unwrap_or(false)
    }

    fn mismatch_count(&self) -> usize {
        let Some(cwd) = self.cwd_string() else {
            return 0;
        };
        self.registry
            .running_names()
            .iter()
            .filter(|name| {
                let Some(binding) = self.registry.binding(name) else {
                    return false;
                };
                !binding.cwd.is_empty() && binding.cwd != cwd
            })
            .count()
    }

    #[cfg(test)]
    fn view(&self) -> String {
        let lines = cap_lines(self.home_lines(Instant::now()), MAX_HOME_LINES);
        lines
            .iter()
            .map(|line| {
                line.spans
                    .iter()
                    .map(|span| span.content.as_ref())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

enum PickerKind {
    Attach,
    Kill,
    Rename,
}

fn picker_targets(names: &[String]) -> (BTreeMap<char, String>, bool) {
    let truncated = names.len() > PICKER_KEYS.len();
    let mut targets = BTreeMap::new();
    for (i, name) in names.iter().enumerate() {
        let Some(key) = picker_key(i) else { break };
        targets.insert(key, name.clone());
    }
    (targets, truncated)
}

fn summarize_task_commands(tasks: &[tasks::Task], max: usize) -> Vec<String> {
    let mut out = Vec::new();
    for (i, task) in tasks.iter().enumerate() {
        if i >= max {
            out.push(format!("+{} more", tasks.len() - max));
            break;
        }
        out.push(task.command.clone());
    }
    out
}

fn repo_from_cwd(cwd: &str) -> String {
    if cwd.is_empty() {
        return "-".to_string();
    }
    Path::new(cwd)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "-".to_string())
}

fn cap_lines(mut lines: Vec<Line<'static>>, max: usize) -> Vec<Line<'static>> {
    if lines.len() <= max {
        return lines;
    }
    lines.truncate(max);
    if let Some(last) = lines.last_mut() {
        *last = Line::from("...".to_string());
    }
    lines
}
