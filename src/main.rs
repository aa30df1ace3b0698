use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyEventKind};
use tokio::sync::mpsc;

mod actions;
mod app;
mod config;
mod host;
mod launch;
mod registry;
#[cfg(test)]
mod testutil;
mod tmux;

use actions::Action;
use app::App;
use config::{Config, Tool};
use host::SystemHost;
use tmux::{tasks, Multiplexer, TmuxClient};

const MAX_TASKS_SHOWN_PER_SESSION: usize = 6;

#[derive(Parser, Debug)]
#[command(name = "pb", about = "Mobile-friendly launcher for coding-agent sessions")]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List active sessions at the current nesting level's socket
    Sessions,
    /// Kill the whole multiplexer server at the current socket
    KillAll,
    /// Print the user-task list for each running tool session
    Tasks,
    /// Summarize keystrokes and subcommands
    Help,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Cmd::Sessions) => run_passthrough(&["list-sessions"]),
        Some(Cmd::KillAll) => run_passthrough(&["kill-server"]),
        Some(Cmd::Tasks) => {
            print_tool_tasks(&mut std::io::stdout())?;
            Ok(())
        }
        Some(Cmd::Help) => {
            print_help();
            Ok(())
        }
        None => run_supervisor().await,
    }
}

/// What one UI run ended with: a plain quit, or a request to hand the
/// terminal to the multiplexer for the named session.
enum UiExit {
    Quit,
    Attach(String),
}

async fn run_supervisor() -> Result<()> {
    let client = TmuxClient::new();
    if !client.available() {
        bail!("tmux is required but was not found in PATH");
    }
    let socket = client.socket().to_string();

    warn_directory_mismatch(&client);

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading config: {err:#}");
            eprintln!("Using default configuration");
            Config::default()
        }
    };

    let mux: Arc<dyn Multiplexer> = Arc::new(client);
    let host = Arc::new(SystemHost);
    let mut app = App::new(config, Arc::clone(&mux), host);

    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();

    // Input reader. It must not touch stdin while the multiplexer client
    // owns the terminal, so it idles whenever the UI is suspended.
    let ui_active = Arc::new(AtomicBool::new(true));
    let input_active = Arc::clone(&ui_active);
    let input_tx = tx.clone();
    tokio::task::spawn_blocking(move || loop {
        if !input_active.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        }
        if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
            continue;
        }
        let Ok(evt) = event::read() else { continue };
        let action = match evt {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                match actions::classify(key) {
                    Some(ks) => Action::Key(ks),
                    None => continue,
                }
            }
            Event::Resize(..) => Action::Resize,
            _ => continue,
        };
        if input_tx.send(action).is_err() {
            break;
        }
    });

    let tick_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if tick_tx.send(Action::Tick).is_err() {
                break;
            }
        }
    });

    let mut terminal = ratatui::init();
    let result = loop {
        let exit = match run_ui(&mut app, &mut terminal, &mut rx).await {
            Ok(exit) => exit,
            Err(err) => break Err(err),
        };
        let UiExit::Attach(name) = exit else {
            break Ok(());
        };

        // Hand the terminal over: stop the input reader, drop the TUI, and
        // block on the multiplexer client until the user detaches.
        ui_active.store(false, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(150));
        ratatui::restore();

        if !mux.session_exists(&name) {
            eprintln!("Session {name:?} is not running");
        } else if let Err(err) = mux.attach_session(&name) {
            eprintln!("Attach error: {err}");
            if !mux.session_exists(&name) {
                eprintln!("Session exited. Check: tmux -L {socket} list-sessions");
            }
        }

        // Stale ticks piled up while attached; drop them before resuming.
        while rx.try_recv().is_ok() {}
        terminal = ratatui::init();
        ui_active.store(true, Ordering::SeqCst);
    };

    ratatui::restore();
    result
}

async fn run_ui(
    app: &mut App,
    terminal: &mut ratatui::DefaultTerminal,
    rx: &mut mpsc::UnboundedReceiver<Action>,
) -> Result<UiExit> {
    loop {
        terminal.draw(|frame| app.render(frame))?;
        let Some(action) = rx.recv().await else {
            return Ok(UiExit::Quit);
        };
        if app.handle_action(action)? {
            return Ok(match app.take_attach_request() {
                Some(name) => UiExit::Attach(name),
                None => UiExit::Quit,
            });
        }
    }
}

fn warn_directory_mismatch(mux: &dyn Multiplexer) {
    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    let cwd = cwd.to_string_lossy().into_owned();

    let mut mismatches = Vec::new();
    for name in mux.list_sessions() {
        let session_cwd = mux.get_option(&name, tmux::OPT_CWD);
        if !session_cwd.is_empty() && session_cwd != cwd {
            mismatches.push(format!("  - {name} (from {session_cwd})"));
        }
    }
    if mismatches.is_empty() {
        return;
    }

    eprintln!("\n⚠️  Warning: Sessions running from different directory:");
    for line in mismatches {
        eprintln!("{line}");
    }
    eprintln!("\nCurrent directory: {cwd}");
    eprintln!("Use 'pb kill-all' to stop existing sessions, or Ctrl+C to exit.\n");
}

fn run_passthrough(args: &[&str]) -> Result<()> {
    let status = Command::new("tmux")
        .arg("-L")
        .arg(tmux::socket_name())
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()?;
    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}

/// Restores the nesting level variable when dropped, so a fallback pass over
/// the root socket cannot leak its environment change.
struct LevelGuard {
    original: Option<String>,
}

impl LevelGuard {
    fn clear() -> Self {
        let original = std::env::var(tmux::LEVEL_ENV).ok();
        std::env::remove_var(tmux::LEVEL_ENV);
        Self { original }
    }
}

impl Drop for LevelGuard {
    fn drop(&mut self) {
        if let Some(level) = &self.original {
            std::env::set_var(tmux::LEVEL_ENV, level);
        }
    }
}

fn print_tool_tasks(w: &mut dyn Write) -> Result<()> {
    let client = TmuxClient::new();
    if print_tool_tasks_for_socket(&client, w)? {
        return Ok(());
    }

    // Nested runs point at the nested socket; fall back to the root socket
    // so top-level tool sessions are still visible.
    if tmux::nesting_level() > 0 {
        let _guard = LevelGuard::clear();
        let root_client = TmuxClient::new();
        if print_tool_tasks_for_socket(&root_client, w)? {
            return Ok(());
        }
    }

    writeln!(w, "No claude/codex/cursor sessions are running.")?;
    Ok(())
}

fn print_tool_tasks_for_socket(mux: &dyn Multiplexer, w: &mut dyn Write) -> Result<bool> {
    let mut names = mux.list_sessions();
    names.sort();

    let mut seen = false;
    for name in names {
        let tool = Tool::parse(&mux.get_option(&name, tmux::OPT_TOOL))
            .or_else(|| Tool::from_session_name(&name));
        if tool.is_none() {
            continue;
        }
        seen = true;
        let tasks = match tasks::session_user_tasks(mux, &name) {
            Ok(tasks) => tasks,
            Err(err) => {
                writeln!(w, "{name}: error reading tasks: {err}")?;
                continue;
            }
        };
        writeln!(w, "{name}: {} task process(es)", tasks.len())?;
        if tasks.is_empty() {
            writeln!(w, "  (none)")?;
            continue;
        }
        let limit = tasks.len().min(MAX_TASKS_SHOWN_PER_SESSION);
        for task in &tasks[..limit] {
            writeln!(
                w,
                "  pid={} ppid={} state={} cmd={}",
                task.pid, task.ppid, task.state, task.command
            )?;
        }
        if tasks.len() > limit {
            writeln!(w, "  +{} more", tasks.len() - limit)?;
        }
    }
    Ok(seen)
}

fn print_help() {
    println!(
        "pocketbot - mobile-friendly supervisor for coding-agent sessions

Usage:
  pb              Start the interactive supervisor
  pb sessions     List active sessions
  pb tasks        List user tasks for running claude/codex/cursor sessions
  pb kill-all     Kill all sessions
  pb help         Show this help

Interactive mode keybindings:
  c               Attach claude (picker if multiple, create if none)
  x               Attach codex (picker if multiple, create if none)
  u               Attach cursor (picker if multiple, create if none)
  z               Jump directory with a fasder query
  n               New instance (then c/x/u; y toggles yolo)
  k               Kill one instance (then c/x/u, or t for a task)
  r               Rename one instance (then c/x/u)
  t               Toggle per-session task lines on the home screen
  Esc             Go back/cancel in menus
  Ctrl+D          Detach from a session (back to pb)
  d               Quit pb (sessions keep running)
  Ctrl+C          Kill all sessions and quit

Config:
  ~/.config/pocketbot/config.yaml"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeMux;
    use crate::tmux::OPT_TOOL;

    #[test]
    fn tool_tasks_lists_only_tool_sessions_with_caps() {
        let mux = FakeMux::new();
        mux.add_session("codex");
        mux.add_session("scratch");

        let mut buf = Vec::new();
        let seen = print_tool_tasks_for_socket(&mux, &mut buf).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(seen);
        assert!(out.contains("codex: 0 task process(es)"), "{out}");
        assert!(out.contains("(none)"), "{out}");
        assert!(!out.contains("scratch"), "{out}");
    }

    #[test]
    fn tool_tasks_recognizes_renamed_sessions_via_stored_option() {
        let mux = FakeMux::new();
        mux.add_session("focus run");
        mux.set_option_value("focus run", OPT_TOOL, "claude");

        let mut buf = Vec::new();
        let seen = print_tool_tasks_for_socket(&mux, &mut buf).unwrap();
        assert!(seen);
        assert!(String::from_utf8(buf).unwrap().contains("focus run:"));
    }

    #[test]
    fn tool_tasks_reports_nothing_for_custom_only_sockets() {
        let mux = FakeMux::new();
        mux.add_session("scratch");

        let mut buf = Vec::new();
        let seen = print_tool_tasks_for_socket(&mux, &mut buf).unwrap();
        assert!(!seen);
        assert!(String::from_utf8(buf).unwrap().is_empty());
    }

    #[test]
    fn level_guard_restores_the_environment() {
        std::env::set_var(tmux::LEVEL_ENV, "3");
        {
            let _guard = LevelGuard::clear();
            assert!(std::env::var(tmux::LEVEL_ENV).is_err());
        }
        assert_eq!(std::env::var(tmux::LEVEL_ENV).unwrap(), "3");
        std::env::remove_var(tmux::LEVEL_ENV);
    }
}
