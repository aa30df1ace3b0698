use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

/// Host-side operations the supervisor needs outside the multiplexer: the
/// working directory, the directory-jump helper, and task signalling. Tests
/// inject a fake so no test touches the real process table or filesystem.
pub trait Host: Send + Sync {
    fn cwd(&self) -> Option<PathBuf>;
    fn chdir(&self, dir: &Path) -> io::Result<()>;
    /// Whether the directory-jump helper binary is installed.
    fn jump_available(&self) -> bool;
    /// Matching directories for a query, most relevant first.
    fn jump_candidates(&self, query: &str) -> Result<Vec<String>>;
    /// Ask a task to terminate (single-shot SIGTERM, no escalation).
    fn kill_task(&self, pid: i32) -> Result<()>;
}

pub struct SystemHost;

impl Host for SystemHost {
    fn cwd(&self) -> Option<PathBuf> {
        env::current_dir().ok()
    }

    fn chdir(&self, dir: &Path) -> io::Result<()> {
        env::set_current_dir(dir)
    }

    fn jump_available(&self) -> bool {
        which::which("fasder").is_ok()
    }

    fn jump_candidates(&self, query: &str) -> Result<Vec<String>> {
        let mut args = vec!["-d", "-l"];
        if !query.trim().is_empty() {
            args.push(query);
        }
        let output = Command::new("fasder")
            .args(&args)
            .output()
            .context("failed to execute fasder")?;
        if !output.status.success() {
            // Older fasder variants lack -l; fall back to the single-result
            // form so the jump still works.
            return Ok(vec![single_jump_candidate(query)?]);
        }
        let dirs = most_relevant_first(&String::from_utf8_lossy(&output.stdout));
        if dirs.is_empty() {
            bail!("no matching directories");
        }
        Ok(dirs)
    }

    fn kill_task(&self, pid: i32) -> Result<()> {
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            bail!(
                "failed to signal pid {pid}: {}",
                io::Error::last_os_error()
            );
        }
        Ok(())
    }
}

fn single_jump_candidate(query: &str) -> Result<String> {
    let mut args = vec!["-d"];
    if !query.trim().is_empty() {
        args.push(query);
    }
    let output = Command::new("fasder")
        .args(&args)
        .output()
        .context("failed to execute fasder")?;
    if !output.status.success() {
        bail!("fasder exited with {}", output.status);
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) => Ok(line.to_string()),
        None => bail!("no matching directory"),
    }
}

/// The helper lists least-relevant first; invert for a top-first picker.
fn most_relevant_first(raw: &str) -> Vec<String> {
    let mut dirs: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    dirs.reverse();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_are_reversed_and_cleaned() {
        let got = most_relevant_first("/old\n\n  /mid  \n/new\n");
        assert_eq!(got, vec!["/new", "/mid", "/old"]);
        assert!(most_relevant_first("\n\n").is_empty());
    }
}
