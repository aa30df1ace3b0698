use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};

use crate::config::{Config, Tool};
use crate::tmux::{Multiplexer, Session, OPT_CWD, OPT_TOOL, OPT_YOLO};

/// Per-tick snapshot of a running session's observable state.
#[derive(Debug, Clone)]
pub struct CommandBinding {
    pub session_name: String,
    pub cwd: String,
    pub tool: Option<Tool>,
    pub yolo: bool,
    pub running: bool,
    pub last_seen: Instant,
}

/// The authoritative in-memory view of sessions: wrappers, tool tags, and
/// per-tick bindings, reconciled against the multiplexer on every tick.
pub struct Registry {
    mux: Arc<dyn Multiplexer>,
    sessions: HashMap<String, Session>,
    tools: HashMap<String, Tool>,
    bindings: HashMap<String, CommandBinding>,
}

impl Registry {
    pub fn new(mux: Arc<dyn Multiplexer>) -> Self {
        Self {
            mux,
            sessions: HashMap::new(),
            tools: HashMap::new(),
            bindings: HashMap::new(),
        }
    }

    /// Bring wrappers, tool tags, and bindings in line with the multiplexer.
    /// After this, the known sessions are exactly the configured base
    /// sessions plus the live ones.
    pub fn reconcile(&mut self, cfg: &Config, now: Instant) {
        let live = self.sync_sessions(cfg);
        self.refresh_bindings(&live, now);
    }

    fn sync_sessions(&mut self, cfg: &Config) -> Vec<String> {
        for base in cfg.base_sessions() {
            self.sessions
                .entry(base.name.clone())
                .or_insert_with(|| Session::new(base.name.clone(), base.command.clone()));
            if let Some(tool) = Tool::from_session_name(&base.name) {
                self.tools.entry(base.name.clone()).or_insert(tool);
            }
        }

        let live = self.mux.list_sessions();
        for name in &live {
            let tool = self.resolve_tool(name);
            let command = match &tool {
                Some(tool) => cfg.tool(*tool).command.clone(),
                None => String::new(),
            };
            self.sessions
                .entry(name.clone())
                .or_insert_with(|| Session::new(name.clone(), command));
            match tool {
                Some(tool) => {
                    self.tools.insert(name.clone(), tool);
                }
                None => {
                    self.tools.remove(name);
                }
            }
        }

        // Anything neither configured nor live is stale.
        let configured: Vec<String> = cfg.base_sessions().into_iter().map(|s| s.name).collect();
        self.sessions
            .retain(|name, _| configured.iter().any(|c| c == name) || live.iter().any(|l| l == name));
        let kept: Vec<String> = self.sessions.keys().cloned().collect();
        self.tools.retain(|name, _| kept.iter().any(|k| k == name));

        live
    }

    /// Tool resolution priority: the option stored on the session, then the
    /// in-memory mapping, then the name heuristic.
    fn resolve_tool(&self, name: &str) -> Option<Tool> {
        if let Some(tool) = Tool::parse(&self.mux.get_option(name, OPT_TOOL)) {
            return Some(tool);
        }
        if let Some(tool) = self.tools.get(name) {
            return Some(*tool);
        }
        Tool::from_session_name(name)
    }

    fn refresh_bindings(&mut self, live: &[String], now: Instant) {
        for name in live {
            let binding = CommandBinding {
                session_name: name.clone(),
                cwd: self.mux.get_option(name, OPT_CWD),
                tool: self.tools.get(name).copied(),
                yolo: matches!(self.mux.get_option(name, OPT_YOLO).as_str(), "1" | "true" | "on"),
                running: true,
                last_seen: now,
            };
            self.bindings.insert(name.clone(), binding);
        }
        self.bindings.retain(|name, _| live.iter().any(|l| l == name));
    }

    /// Advance every running session's activity classification.
    pub fn update_activity(&mut self, now: Instant) {
        let mux = Arc::clone(&self.mux);
        let running: Vec<String> = self.bindings.keys().cloned().collect();
        for name in running {
            if let Some(session) = self.sessions.get_mut(&name) {
                session.update_activity(mux.as_ref(), now);
            }
        }
    }

    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn binding(&self, name: &str) -> Option<&CommandBinding> {
        self.bindings.get(name)
    }

    pub fn tool_of(&self, name: &str) -> Option<Tool> {
        self.tools.get(name).copied()
    }

    pub fn has_any_running(&self) -> bool {
        !self.bindings.is_empty()
    }

    /// All running session names, ascending.
    pub fn running_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().cloned().collect();
        names.sort();
        names
    }

    /// Running sessions belonging to a tool, ascending by name.
    pub fn running_by_tool(&self, tool: Tool) -> Vec<String> {
        let mut names: Vec<String> = self
            .bindings
            .keys()
            .filter(|name| self.tools.get(*name) == Some(&tool))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Running sessions of a tool whose launch directory matches `cwd`.
    pub fn running_in_dir(&self, tool: Tool, cwd: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .bindings
            .values()
            .filter(|b| b.running && b.cwd == cwd && self.tools.get(&b.session_name) == Some(&tool))
            .map(|b| b.session_name.clone())
            .collect();
        names.sort();
        names
    }

    /// The next free session name for a tool: the bare tool name, or the
    /// tool name with a numeric suffix one past the highest in use.
    pub fn next_name(&self, tool: Tool) -> String {
        let names = self.running_by_tool(tool);
        if !names.iter().any(|n| n == tool.as_str()) {
            return tool.as_str().to_string();
        }
        let prefix = format!("{}-", tool.as_str());
        let mut max = 1;
        for name in &names {
            if let Some(n) = name.strip_prefix(&prefix).and_then(|s| s.parse::<u32>().ok()) {
                max = max.max(n);
            }
        }
        format!("{}-{}", tool.as_str(), max + 1)
    }

    /// Register a freshly created session so the UI sees it before the next
    /// reconciliation.
    pub fn install(&mut self, name: &str, command: &str, tool: Option<Tool>) {
        self.sessions
            .insert(name.to_string(), Session::new(name, command));
        if let Some(tool) = tool {
            self.tools.insert(name.to_string(), tool);
        }
    }

    /// Forget a killed session immediately; the next reconciliation re-adds
    /// the configured base wrapper if there is one.
    pub fn forget(&mut self, name: &str) {
        self.sessions.remove(name);
        self.tools.remove(name);
        self.bindings.remove(name);
    }

    /// Rename a live session, keeping its tool tag and wrapper, and persist
    /// the tool under the new name. In-memory state only moves after the
    /// multiplexer accepted the rename.
    pub fn apply_rename(&mut self, old: &str, new: &str) -> Result<()> {
        if self.mux.session_exists(new) || self.sessions.contains_key(new) {
            bail!("{new:?} is already in use");
        }
        self.mux.rename_session(old, new)?;

        if let Some(mut session) = self.sessions.remove(old) {
            session.rename(new);
            self.sessions.insert(new.to_string(), session);
        } else {
            self.sessions.insert(new.to_string(), Session::new(new, ""));
        }
        if let Some(tool) = self.tools.remove(old) {
            self.tools.insert(new.to_string(), tool);
            if let Err(err) = self.mux.set_option(new, OPT_TOOL, tool.as_str()) {
                tracing::warn!(session = new, %err, "could not persist tool tag after rename");
            }
        }
        self.bindings.remove(old);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeMux;

    fn registry(mux: Arc<FakeMux>) -> Registry {
        Registry::new(mux)
    }

    #[test]
    fn reconcile_keeps_configured_and_prunes_stale() {
        let mux = Arc::new(FakeMux::new());
        mux.add_session("focus run");
        mux.set_option_value("focus run", OPT_TOOL, "codex");

        let cfg = Config::default();
        let mut reg = registry(Arc::clone(&mux));
        // Seed a stale wrapper that is neither configured nor live.
        reg.install("ghost", "", Some(Tool::Claude));

        reg.reconcile(&cfg, Instant::now());

        assert!(!reg.contains("ghost"), "stale session must be pruned");
        assert!(reg.contains("focus run"), "live session must be added");
        assert_eq!(reg.tool_of("focus run"), Some(Tool::Codex));
        assert!(reg.contains("claude"), "configured base wrapper must stay");
        assert!(reg.contains("codex"));
        assert!(reg.contains("cursor"));
    }

    #[test]
    fn every_live_session_resolves_a_tool_by_priority() {
        let mux = Arc::new(FakeMux::new());
        // Stored option beats the name heuristic.
        mux.add_session("claude-2");
        mux.set_option_value("claude-2", OPT_TOOL, "codex");
        // Heuristic applies when no option is stored.
        mux.add_session("cursor-3");

        let mut reg = registry(Arc::clone(&mux));
        reg.reconcile(&Config::default(), Instant::now());

        assert_eq!(reg.tool_of("claude-2"), Some(Tool::Codex));
        assert_eq!(reg.tool_of("cursor-3"), Some(Tool::Cursor));
    }

    #[test]
    fn in_memory_mapping_survives_when_option_is_unset() {
        let mux = Arc::new(FakeMux::new());
        mux.add_session("focus");

        let mut reg = registry(Arc::clone(&mux));
        reg.install("focus", "", Some(Tool::Claude));
        reg.reconcile(&Config::default(), Instant::now());

        assert_eq!(reg.tool_of("focus"), Some(Tool::Claude));
        assert_eq!(reg.running_by_tool(Tool::Claude), vec!["focus"]);
    }

    #[test]
    fn bindings_track_running_sessions_and_clear_on_stop() {
        let mux = Arc::new(FakeMux::new());
        mux.add_session("codex");
        mux.set_option_value("codex", OPT_CWD, "/repo");
        mux.set_option_value("codex", OPT_YOLO, "1");

        let cfg = Config::default();
        let mut reg = registry(Arc::clone(&mux));
        reg.reconcile(&cfg, Instant::now());

        let binding = reg.binding("codex").expect("binding for running session");
        assert_eq!(binding.cwd, "/repo");
        assert!(binding.yolo);
        assert!(binding.running);

        mux.remove_session("codex");
        reg.reconcile(&cfg, Instant::now());
        assert!(reg.binding("codex").is_none(), "binding must clear on stop");
        assert!(reg.contains("codex"), "configured wrapper survives the stop");
    }

    #[test]
    fn running_in_dir_filters_by_binding_cwd() {
        let mux = Arc::new(FakeMux::new());
        mux.add_session("claude");
        mux.set_option_value("claude", OPT_CWD, "/repo");
        mux.add_session("claude-2");
        mux.set_option_value("claude-2", OPT_CWD, "/elsewhere");

        let mut reg = registry(Arc::clone(&mux));
        reg.reconcile(&Config::default(), Instant::now());

        assert_eq!(reg.running_in_dir(Tool::Claude, "/repo"), vec!["claude"]);
        assert!(reg.running_in_dir(Tool::Codex, "/repo").is_empty());
    }

    #[test]
    fn next_name_returns_bare_tool_then_counts_up() {
        let mux = Arc::new(FakeMux::new());
        let mut reg = registry(Arc::clone(&mux));
        reg.reconcile(&Config::default(), Instant::now());
        assert_eq!(reg.next_name(Tool::Claude), "claude");

        mux.add_session("claude");
        reg.reconcile(&Config::default(), Instant::now());
        assert_eq!(reg.next_name(Tool::Claude), "claude-2");

        mux.add_session("claude-2");
        mux.add_session("claude-7");
        reg.reconcile(&Config::default(), Instant::now());
        assert_eq!(reg.next_name(Tool::Claude), "claude-8");
    }

    #[test]
    fn rename_moves_wrapper_and_tool_and_drops_stale_binding() {
        let mux = Arc::new(FakeMux::new());
        mux.add_session("codex");

        let cfg = Config::default();
        let mut reg = registry(Arc::clone(&mux));
        reg.reconcile(&cfg, Instant::now());

        reg.apply_rename("codex", "focus run").unwrap();

        assert!(reg.contains("focus run"));
        assert!(!reg.contains("codex"));
        assert_eq!(reg.tool_of("focus run"), Some(Tool::Codex));
        assert_eq!(mux.get_option("focus run", OPT_TOOL), "codex");

        // The old name no longer exists on the adapter, so renaming it again
        // fails and must not reintroduce stale state.
        assert!(reg.apply_rename("codex", "other").is_err());
        assert!(!reg.contains("other"));

        reg.reconcile(&cfg, Instant::now());
        assert_eq!(reg.running_by_tool(Tool::Codex), vec!["focus run"]);
        assert!(reg.binding("codex").is_none());
    }

    #[test]
    fn rename_to_name_in_use_is_rejected_without_side_effects() {
        let mux = Arc::new(FakeMux::new());
        mux.add_session("codex");
        mux.add_session("taken");

        let mut reg = registry(Arc::clone(&mux));
        reg.reconcile(&Config::default(), Instant::now());

        assert!(reg.apply_rename("codex", "taken").is_err());
        assert!(mux.renamed().is_empty(), "no rename may reach the multiplexer");
        assert_eq!(reg.tool_of("codex"), Some(Tool::Codex));
    }

    #[test]
    fn rename_failure_keeps_state_unchanged() {
        let mux = Arc::new(FakeMux::new());
        mux.add_session("codex");
        mux.fail_rename();

        let mut reg = registry(Arc::clone(&mux));
        reg.reconcile(&Config::default(), Instant::now());

        assert!(reg.apply_rename("codex", "focus").is_err());
        assert!(reg.contains("codex"));
        assert!(!reg.contains("focus"));
        assert_eq!(reg.tool_of("codex"), Some(Tool::Codex));
    }
}
