//! In-memory fakes backing the unit tests: a multiplexer whose sessions,
//! options, and pane captures are scripted, and a host with a fixed cwd.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Result};

use crate::host::Host;
use crate::tmux::Multiplexer;

#[derive(Default)]
struct FakeMuxState {
    sessions: Vec<String>,
    options: HashMap<(String, String), String>,
    captures: HashMap<String, VecDeque<String>>,
    capture_calls: usize,
    created: Vec<(String, String)>,
    killed: Vec<String>,
    renamed: Vec<(String, String)>,
    fail_create: bool,
    fail_rename: bool,
    mutations: usize,
}

/// Scriptable in-memory stand-in for the tmux adapter.
#[derive(Default)]
pub struct FakeMux {
    state: Mutex<FakeMuxState>,
}

impl FakeMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if !state.sessions.iter().any(|s| s == name) {
            state.sessions.push(name.to_string());
        }
    }

    pub fn remove_session(&self, name: &str) {
        self.state.lock().unwrap().sessions.retain(|s| s != name);
    }

    pub fn set_option_value(&self, name: &str, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .options
            .insert((name.to_string(), key.to_string()), value.to_string());
    }

    pub fn push_capture(&self, name: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .captures
            .entry(name.to_string())
            .or_default()
            .push_back(content.to_string());
    }

    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }

    pub fn fail_rename(&self) {
        self.state.lock().unwrap().fail_rename = true;
    }

    pub fn capture_calls(&self) -> usize {
        self.state.lock().unwrap().capture_calls
    }

    pub fn created(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.state.lock().unwrap().killed.clone()
    }

    pub fn renamed(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().renamed.clone()
    }

    /// Count of lifecycle mutations (create/kill/rename/server-kill) issued.
    pub fn mutations(&self) -> usize {
        self.state.lock().unwrap().mutations
    }
}

impl Multiplexer for FakeMux {
    fn available(&self) -> bool {
        true
    }

    fn session_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().sessions.iter().any(|s| s == name)
    }

    fn create_session(&self, name: &str, command: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        if state.fail_create {
            bail!("create refused");
        }
        state.created.push((name.to_string(), command.to_string()));
        if !state.sessions.iter().any(|s| s == name) {
            state.sessions.push(name.to_string());
        }
        state.options.insert(
            (name.to_string(), crate::tmux::OPT_COMMAND.to_string()),
            name.to_string(),
        );
        Ok(())
    }

    fn attach_session(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn kill_session(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        state.killed.push(name.to_string());
        state.sessions.retain(|s| s != name);
        Ok(())
    }

    fn kill_server(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        state.sessions.clear();
        Ok(())
    }

    fn rename_session(&self, old: &str, new: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        if state.fail_rename {
            bail!("rename refused");
        }
        if !state.sessions.iter().any(|s| s == old) {
            bail!("session not found: {old}");
        }
        state.renamed.push((old.to_string(), new.to_string()));
        if let Some(slot) = state.sessions.iter_mut().find(|s| *s == old) {
            *slot = new.to_string();
        }
        let moved: Vec<(String, String)> = state
            .options
            .keys()
            .filter(|(session, _)| session == old)
            .cloned()
            .collect();
        for key in moved {
            if let Some(value) = state.options.remove(&key) {
                state.options.insert((new.to_string(), key.1), value);
            }
        }
        Ok(())
    }

    fn list_sessions(&self) -> Vec<String> {
        self.state.lock().unwrap().sessions.clone()
    }

    fn capture_pane(&self, name: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.capture_calls += 1;
        match state.captures.get_mut(name).and_then(VecDeque::pop_front) {
            Some(content) => Ok(content),
            None => bail!("no capture scripted for {name}"),
        }
    }

    fn pane_pids(&self, _name: &str) -> Result<Vec<i32>> {
        // No fake process tree: task walks come back empty.
        Ok(Vec::new())
    }

    fn get_option(&self, name: &str, key: &str) -> String {
        self.state
            .lock()
            .unwrap()
            .options
            .get(&(name.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn set_option(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.set_option_value(name, key, value);
        Ok(())
    }
}

#[derive(Default)]
struct FakeHostState {
    cwd: Option<PathBuf>,
    chdirs: Vec<PathBuf>,
    killed_pids: Vec<i32>,
    jump_results: Option<Vec<String>>,
    jump_queries: Vec<String>,
    jump_installed: bool,
    fail_kill: bool,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<FakeHostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(cwd: &str) -> Self {
        let host = Self::default();
        host.state.lock().unwrap().cwd = Some(PathBuf::from(cwd));
        host
    }

    pub fn set_jump_results(&self, dirs: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.jump_installed = true;
        state.jump_results = Some(dirs.iter().map(|s| s.to_string()).collect());
    }

    pub fn set_jump_installed(&self, installed: bool) {
        self.state.lock().unwrap().jump_installed = installed;
    }

    pub fn fail_kill(&self) {
        self.state.lock().unwrap().fail_kill = true;
    }

    pub fn chdirs(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().chdirs.clone()
    }

    pub fn killed_pids(&self) -> Vec<i32> {
        self.state.lock().unwrap().killed_pids.clone()
    }

    pub fn jump_queries(&self) -> Vec<String> {
        self.state.lock().unwrap().jump_queries.clone()
    }
}

impl Host for FakeHost {
    fn cwd(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().cwd.clone()
    }

    fn chdir(&self, dir: &Path) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.chdirs.push(dir.to_path_buf());
        state.cwd = Some(dir.to_path_buf());
        Ok(())
    }

    fn jump_available(&self) -> bool {
        self.state.lock().unwrap().jump_installed
    }

    fn jump_candidates(&self, query: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.jump_queries.push(query.to_string());
        match state.jump_results.clone() {
            Some(dirs) if !dirs.is_empty() => Ok(dirs),
            _ => bail!("no matching directories"),
        }
    }

    fn kill_task(&self, pid: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_kill {
            bail!("denied");
        }
        state.killed_pids.push(pid);
        Ok(())
    }
}
