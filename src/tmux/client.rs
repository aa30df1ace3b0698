use std::env;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};

use super::{
    nesting_level, socket_name, Multiplexer, CWD_ENV, LEVEL_ENV, OPT_COMMAND, OPT_CWD,
};

/// Client for the tmux server on the supervisor's per-nesting-level socket.
pub struct TmuxClient {
    socket: String,
}

impl TmuxClient {
    pub fn new() -> Self {
        Self {
            socket: socket_name(),
        }
    }

    pub fn socket(&self) -> &str {
        &self.socket
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("tmux");
        cmd.arg("-L").arg(&self.socket).args(args);
        cmd
    }

    /// Run a tmux command, mapping non-zero exit to an error carrying stderr.
    fn run(&self, args: &[&str]) -> Result<()> {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to execute tmux {}", args.join(" ")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(())
    }

    fn output(&self, args: &[&str]) -> Result<String> {
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to execute tmux {}", args.join(" ")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("tmux {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn show_detach_overlay(&self, name: &str) {
        let msg = detach_overlay_message(nesting_level());
        // Prefer a tiny top-right popup so no full line is reserved in the
        // session; cascade down to display-message when popups are missing.
        if self.show_detach_popup(name, &msg).is_ok() {
            return;
        }
        if self
            .run(&[
                "display-message",
                "-d",
                "2500",
                "-x",
                "R",
                "-y",
                "0",
                "-t",
                name,
                msg.as_str(),
            ])
            .is_ok()
        {
            return;
        }
        let _ = self.run(&["display-message", "-d", "2500", "-t", name, msg.as_str()]);
    }

    fn show_detach_popup(&self, name: &str, msg: &str) -> Result<()> {
        let width = detach_popup_width(msg).to_string();
        let command = format!("printf %s {}; sleep 2", shell_single_quote(msg));
        self.run(&[
            "display-popup",
            "-E",
            "-B",
            "-x",
            "R",
            "-y",
            "0",
            "-w",
            width.as_str(),
            "-h",
            "1",
            "-t",
            name,
            command.as_str(),
        ])
    }
}

impl Default for TmuxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for TmuxClient {
    fn available(&self) -> bool {
        which::which("tmux").is_ok()
    }

    fn session_exists(&self, name: &str) -> bool {
        self.command(&["has-session", "-t", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn create_session(&self, name: &str, command: &str) -> Result<()> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let cwd = cwd.to_string_lossy().into_owned();

        // Export the nesting level and origin cwd so supervisors launched
        // inside this session pick their own socket.
        let next_level = nesting_level() + 1;
        let env_cmd = format!(
            "export {LEVEL_ENV}={next_level}; export {CWD_ENV}={}; {command}",
            shell_single_quote(&cwd)
        );

        self.run(&[
            "new-session",
            "-d",
            "-s",
            name,
            "-c",
            cwd.as_str(),
            "sh",
            "-c",
            env_cmd.as_str(),
        ])?;

        // Best-effort metadata: without it the session still works, we just
        // lose directory checks and command tagging after a restart.
        if let Err(err) = self.set_option(name, OPT_CWD, &cwd) {
            tracing::debug!(session = name, %err, "could not store launch cwd");
        }
        if let Err(err) = self.set_option(name, OPT_COMMAND, name) {
            tracing::debug!(session = name, %err, "could not store command tag");
        }

        // Hide the status bar to save screen space on small terminals.
        self.run(&["set-option", "-t", name, "status", "off"])?;
        // Detach with a bare Ctrl+D, no prefix. Only affects this socket's
        // server, never the user's main tmux.
        self.run(&["bind-key", "-n", "C-d", "detach-client"])?;
        self.run(&["set-option", "-t", name, "display-time", "3000"])?;

        Ok(())
    }

    fn attach_session(&self, name: &str) -> Result<()> {
        self.show_detach_overlay(name);

        let status = self
            .command(&["attach-session", "-t", name])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .context("failed to execute tmux attach-session")?;
        if !status.success() {
            bail!("tmux attach-session exited with {status}");
        }
        Ok(())
    }

    fn kill_session(&self, name: &str) -> Result<()> {
        self.run(&["kill-session", "-t", name])
    }

    fn kill_server(&self) -> Result<()> {
        self.run(&["kill-server"])
    }

    fn rename_session(&self, old: &str, new: &str) -> Result<()> {
        self.run(&["rename-session", "-t", old, new])
    }

    fn list_sessions(&self) -> Vec<String> {
        let out = match self.output(&["list-sessions", "-F", "#{session_name}"]) {
            Ok(out) => out,
            // No server running yet is normal, not an error.
            Err(_) => return Vec::new(),
        };
        out.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn capture_pane(&self, name: &str) -> Result<String> {
        // Only the last 10 lines: enough to detect change, cheap to compare.
        self.output(&["capture-pane", "-t", name, "-p", "-S", "-10"])
    }

    fn pane_pids(&self, name: &str) -> Result<Vec<i32>> {
        let out = self.output(&["list-panes", "-t", name, "-F", "#{pane_pid}"])?;
        parse_pids(&out)
    }

    fn get_option(&self, name: &str, key: &str) -> String {
        self.output(&["show-options", "-t", name, "-v", key])
            .map(|out| out.trim().to_string())
            .unwrap_or_default()
    }

    fn set_option(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.run(&["set-option", "-t", name, key, value])
    }
}

fn parse_pids(raw: &str) -> Result<Vec<i32>> {
    let mut out = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let pid: i32 = line
            .parse()
            .with_context(|| format!("parse pane pid {line:?}"))?;
        if !out.contains(&pid) {
            out.push(pid);
        }
    }
    Ok(out)
}

fn detach_overlay_message(level: u32) -> String {
    let msg = "Ctrl+D to detach";
    if level > 0 {
        format!("{msg} (pb level {level})")
    } else {
        msg.to_string()
    }
}

fn detach_popup_width(msg: &str) -> usize {
    // Breathing room around the message while keeping the popup compact.
    (msg.chars().count() + 4).clamp(24, 96)
}

fn shell_single_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}
