//! Rewrites tool launch commands: the elevated-permission ("yolo") variants
//! and the resume-with-fallback wrapping used at session creation.

use crate::config::Tool;

/// Rewrite a tool command to its elevated-permission form.
///
/// Claude swaps the accept-edits permission mode for the skip-permissions
/// flag (appending it when absent). Codex takes a global `--yolo` right after
/// the binary. Cursor has no such flag.
pub fn yolo_command(tool: Tool, command: &str) -> String {
    match tool {
        Tool::Claude => {
            if command.contains("--permission-mode acceptEdits") {
                command.replace("--permission-mode acceptEdits", "--dangerously-skip-permissions")
            } else {
                format!("{command} --dangerously-skip-permissions")
            }
        }
        Tool::Codex => {
            if command == "codex" {
                "codex --yolo".to_string()
            } else if let Some(rest) = command.strip_prefix("codex ") {
                format!("codex --yolo {rest}")
            } else {
                command.to_string()
            }
        }
        Tool::Cursor => command.to_string(),
    }
}

/// Wrap known resume-previous-session commands so the session still starts
/// when there is nothing to resume. Unknown commands pass through untouched.
pub fn fallback_command(tool: Option<Tool>, command: &str) -> String {
    let plain = match (tool, command) {
        (Some(Tool::Claude), "claude --continue --permission-mode acceptEdits") => {
            "claude --permission-mode acceptEdits"
        }
        (Some(Tool::Claude), "claude --continue --dangerously-skip-permissions") => {
            "claude --dangerously-skip-permissions"
        }
        (Some(Tool::Codex), "codex resume --last") => "codex",
        (Some(Tool::Codex), "codex --yolo resume --last") => "codex --yolo",
        (Some(Tool::Cursor), "agent resume") => "agent",
        _ => return command.to_string(),
    };
    format!("{command} || {plain}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yolo_rewrites_per_tool() {
        let cases = [
            (
                Tool::Claude,
                "claude --continue --permission-mode acceptEdits",
                "claude --continue --dangerously-skip-permissions",
            ),
            (
                Tool::Claude,
                "claude --continue",
                "claude --continue --dangerously-skip-permissions",
            ),
            (Tool::Codex, "codex resume --last", "codex --yolo resume --last"),
            (Tool::Codex, "codex --model o4-mini", "codex --yolo --model o4-mini"),
            (Tool::Cursor, "agent resume", "agent resume"),
        ];
        for (tool, command, want) in cases {
            assert_eq!(yolo_command(tool, command), want, "{tool} {command:?}");
        }
    }

    #[test]
    fn fallback_wraps_known_resume_forms() {
        let cases = [
            (
                Some(Tool::Claude),
                "claude --continue --permission-mode acceptEdits",
                "claude --continue --permission-mode acceptEdits || claude --permission-mode acceptEdits",
            ),
            (
                Some(Tool::Claude),
                "claude --continue --dangerously-skip-permissions",
                "claude --continue --dangerously-skip-permissions || claude --dangerously-skip-permissions",
            ),
            (Some(Tool::Codex), "codex resume --last", "codex resume --last || codex"),
            (
                Some(Tool::Codex),
                "codex --yolo resume --last",
                "codex --yolo resume --last || codex --yolo",
            ),
            (Some(Tool::Cursor), "agent resume", "agent resume || agent"),
            (Some(Tool::Codex), "codex --model gpt-5", "codex --model gpt-5"),
            (None, "sleep 60", "sleep 60"),
        ];
        for (tool, command, want) in cases {
            assert_eq!(fallback_command(tool, command), want, "{command:?}");
        }
    }
}
