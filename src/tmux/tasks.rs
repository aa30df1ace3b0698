use std::collections::HashMap;
use std::process::Command;

use anyhow::{bail, Context, Result};

use super::Multiplexer;

/// A descendant process running inside a session pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub pid: i32,
    pub ppid: i32,
    pub state: String,
    pub command: String,
}

/// All descendant processes of a session's panes, pid-sorted.
pub fn session_tasks(mux: &dyn Multiplexer, session_name: &str) -> Result<Vec<Task>> {
    let pids = mux.pane_pids(session_name)?;
    if pids.is_empty() {
        return Ok(Vec::new());
    }
    let processes = list_processes()?;
    Ok(collect_descendant_tasks(&pids, &processes))
}

/// The filtered task list meant to represent user work rather than
/// agent/editor helper processes.
pub fn session_user_tasks(mux: &dyn Multiplexer, session_name: &str) -> Result<Vec<Task>> {
    let tasks = session_tasks(mux, session_name)?;
    Ok(filter_user_tasks(tasks))
}

fn list_processes() -> Result<HashMap<i32, Task>> {
    let output = Command::new("ps")
        .args(["-axo", "pid=,ppid=,stat=,command="])
        .output()
        .context("failed to execute ps")?;
    if !output.status.success() {
        bail!("ps exited with {}", output.status);
    }
    parse_process_snapshot(&String::from_utf8_lossy(&output.stdout))
}

fn parse_process_snapshot(raw: &str) -> Result<HashMap<i32, Task>> {
    let mut processes = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(pid), Some(ppid), Some(state)) = (parts.next(), parts.next(), parts.next())
        else {
            bail!("unexpected ps row format: {line:?}");
        };
        let command = parts.collect::<Vec<_>>().join(" ");
        if command.is_empty() {
            bail!("unexpected ps row format: {line:?}");
        }
        let pid: i32 = pid.parse().with_context(|| format!("parse pid from {line:?}"))?;
        let ppid: i32 = ppid
            .parse()
            .with_context(|| format!("parse ppid from {line:?}"))?;
        processes.insert(
            pid,
            Task {
                pid,
                ppid,
                state: state.to_string(),
                command,
            },
        );
    }
    Ok(processes)
}

/// Transitive closure of descendants of the root pids, excluding the roots
/// themselves. Output is pid-sorted and deduplicated.
fn collect_descendant_tasks(root_pids: &[i32], processes: &HashMap<i32, Task>) -> Vec<Task> {
    let mut children: HashMap<i32, Vec<&Task>> = HashMap::new();
    for p in processes.values() {
        children.entry(p.ppid).or_default().push(p);
    }

    let mut seen: Vec<i32> = Vec::new();
    let mut queue: Vec<i32> = root_pids.to_vec();
    let mut tasks = Vec::new();
    let mut head = 0;
    while head < queue.len() {
        let parent = queue[head];
        head += 1;
        let Some(kids) = children.get(&parent) else {
            continue;
        };
        for child in kids {
            if seen.contains(&child.pid) {
                continue;
            }
            seen.push(child.pid);
            queue.push(child.pid);
            if root_pids.contains(&child.pid) {
                continue;
            }
            tasks.push((*child).clone());
        }
    }

    tasks.sort_by_key(|t| t.pid);
    tasks
}

/// Project the raw descendant list down to one representative per independent
/// branch of work, dropping infrastructure noise.
fn filter_user_tasks(tasks: Vec<Task>) -> Vec<Task> {
    if tasks.is_empty() {
        return Vec::new();
    }

    let by_pid: HashMap<i32, &Task> = tasks.iter().map(|t| (t.pid, t)).collect();
    let mut children: HashMap<i32, Vec<&Task>> = HashMap::new();
    for t in &tasks {
        children.entry(t.ppid).or_default().push(t);
    }

    let mut roots: Vec<&Task> = tasks
        .iter()
        .filter(|t| !by_pid.contains_key(&t.ppid))
        .collect();
    roots.sort_by_key(|t| t.pid);

    let mut selected: Vec<i32> = Vec::new();
    let mut out = Vec::new();
    for root in roots {
        for rep in collect_representatives(root, &children) {
            if selected.contains(&rep.pid) {
                continue;
            }
            selected.push(rep.pid);
            out.push(rep.clone());
        }
    }

    out.sort_by_key(|t| t.pid);
    out
}

fn collect_representatives<'a>(
    root: &'a Task,
    children: &HashMap<i32, Vec<&'a Task>>,
) -> Vec<&'a Task> {
    // Roots with multiple children usually carry independent branches; split
    // per child so parallel tasks are all preserved.
    let kids = children.get(&root.pid).map(Vec::as_slice).unwrap_or(&[]);
    if kids.len() > 1 || is_shell_wrapper(&root.command) {
        let reps: Vec<&Task> = kids
            .iter()
            .filter_map(|&child| choose_representative(child, children))
            .collect();
        if !reps.is_empty() {
            return reps;
        }
    }

    choose_representative(root, children).into_iter().collect()
}

/// Pick the highest-scoring non-noise process in the subtree. Ties prefer
/// non-wrapper commands, then shallower depth.
fn choose_representative<'a>(
    root: &'a Task,
    children: &HashMap<i32, Vec<&'a Task>>,
) -> Option<&'a Task> {
    let mut queue: Vec<(&Task, usize)> = vec![(root, 0)];
    let mut best: Option<(&Task, i32, usize)> = None;
    let mut head = 0;

    while head < queue.len() {
        let (task, depth) = queue[head];
        head += 1;

        let score = task_score(&task.command);
        let better = match best {
            None => score >= 0,
            Some((best_task, best_score, best_depth)) => {
                score > best_score
                    || (score == best_score
                        && is_shell_wrapper(&best_task.command)
                        && !is_shell_wrapper(&task.command))
                    || (score == best_score && depth < best_depth)
            }
        };
        if better {
            best = Some((task, score, depth));
        }

        if let Some(kids) = children.get(&task.pid) {
            for &child in kids {
                queue.push((child, depth + 1));
            }
        }
    }

    best.map(|(task, _, _)| task)
}

fn task_score(command: &str) -> i32 {
    if is_noise_command(command) {
        return -1;
    }
    let cmd = command.trim().to_lowercase();
    let Some(first) = cmd.split_whitespace().next() else {
        return -1;
    };

    // Strongly prefer explicit user orchestrators.
    if base_name(first) == "make" {
        return 100;
    }
    if cmd.contains("/.bin/nx serve ") {
        return 98;
    }
    if cmd.contains(" nx serve ") {
        return 95;
    }
    if cmd.contains("npm exec nx serve") || cmd.contains("npx nx serve") {
        return 90;
    }
    if cmd.contains("npm exec") {
        return 60;
    }
    if is_shell_wrapper(command) {
        return 10;
    }
    50
}

fn is_noise_command(command: &str) -> bool {
    let cmd = command.trim().to_lowercase();
    let Some(first) = cmd.split_whitespace().next() else {
        return true;
    };

    // Agent runtimes and their helpers are not user-level tasks.
    match base_name(first) {
        "claude" | "codex" | "agent" => return true,
        "gopls" | "caffeinate" => return true,
        _ => {}
    }
    // The supervisor's own introspection runs would otherwise list themselves.
    if cmd.starts_with("ps -axo ") || cmd.contains(" ps -axo ") {
        return true;
    }
    if cmd.ends_with(" pb tasks") || cmd.contains(" pb tasks ") || cmd.contains("/pb tasks") {
        return true;
    }
    // Build/watch helper workers that read as noise in task views.
    if cmd.contains("fork-ts-checker-webpack-plugin") {
        return true;
    }
    if cmd.contains("nx/src/daemon/server/start.js") {
        return true;
    }
    if cmd.contains("@esbuild/") && cmd.contains("--service=") {
        return true;
    }
    if cmd.contains("docker-buildx") && cmd.contains(" bake ") {
        return true;
    }
    if cmd.contains("docker-compose compose up") {
        return true;
    }
    if cmd.contains("worker.js") || cmd.contains("/worker/") {
        return true;
    }
    if cmd.contains("--inspect=localhost:") {
        return true;
    }

    false
}

fn is_shell_wrapper(command: &str) -> bool {
    let cmd = command.trim().to_lowercase();
    match cmd.split_whitespace().next() {
        Some(first) => matches!(base_name(first), "sh" | "bash" | "zsh" | "fish"),
        None => false,
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
