use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// The three first-class agent tools. Anything else is a custom session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Claude,
    Codex,
    Cursor,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Claude, Tool::Codex, Tool::Cursor];

    pub fn as_str(self) -> &'static str {
        match self {
            Tool::Claude => "claude",
            Tool::Codex => "codex",
            Tool::Cursor => "cursor",
        }
    }

    pub fn parse(s: &str) -> Option<Tool> {
        match s {
            "claude" => Some(Tool::Claude),
            "codex" => Some(Tool::Codex),
            "cursor" => Some(Tool::Cursor),
            _ => None,
        }
    }

    /// Name heuristic: `claude` and `claude-2` belong to claude, and so on.
    pub fn from_session_name(name: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|tool| {
            name == tool.as_str() || name.starts_with(&format!("{}-", tool.as_str()))
        })
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Launcher settings for one of the built-in tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub command: String,
    pub key: char,
    pub enabled: bool,
}

/// A user-defined launcher bound to its own home-screen key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub name: String,
    pub command: String,
    pub key: char,
}

#[derive(Debug, Clone)]
pub struct Config {
    claude: ToolConfig,
    codex: ToolConfig,
    cursor: ToolConfig,
    pub sessions: Vec<SessionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            claude: ToolConfig {
                command: "claude --continue --permission-mode acceptEdits".to_string(),
                key: 'c',
                enabled: true,
            },
            codex: ToolConfig {
                command: "codex resume --last".to_string(),
                key: 'x',
                enabled: true,
            },
            cursor: ToolConfig {
                command: "agent resume".to_string(),
                key: 'u',
                enabled: true,
            },
            sessions: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    claude: Option<RawTool>,
    codex: Option<RawTool>,
    cursor: Option<RawTool>,
    sessions: Option<Vec<RawSession>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTool {
    command: Option<String>,
    key: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSession {
    name: Option<String>,
    command: Option<String>,
    key: Option<String>,
}

impl Config {
    pub fn tool(&self, tool: Tool) -> &ToolConfig {
        match tool {
            Tool::Claude => &self.claude,
            Tool::Codex => &self.codex,
            Tool::Cursor => &self.cursor,
        }
    }

    #[cfg(test)]
    pub fn tool_mut(&mut self, tool: Tool) -> &mut ToolConfig {
        match tool {
            Tool::Claude => &mut self.claude,
            Tool::Codex => &mut self.codex,
            Tool::Cursor => &mut self.cursor,
        }
    }

    /// The enabled tool matching a pressed key, if any.
    pub fn tool_for_key(&self, key: char) -> Option<Tool> {
        Tool::ALL
            .into_iter()
            .find(|&tool| self.tool(tool).enabled && self.tool(tool).key == key)
    }

    /// All configured base sessions: one per enabled tool plus the custom
    /// entries, in that order.
    pub fn base_sessions(&self) -> Vec<SessionConfig> {
        let mut out = Vec::new();
        for tool in Tool::ALL {
            let cfg = self.tool(tool);
            if cfg.enabled {
                out.push(SessionConfig {
                    name: tool.as_str().to_string(),
                    command: cfg.command.clone(),
                    key: cfg.key,
                });
            }
        }
        out.extend(self.sessions.iter().cloned());
        out
    }

    /// Path of the user configuration file.
    pub fn path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("failed to locate the user config directory")?;
        Ok(dir.join("pocketbot").join("config.yaml"))
    }

    /// Load the configuration, falling back to defaults when the file does
    /// not exist. Parse and validation errors are returned to the caller,
    /// which warns and continues with defaults.
    pub fn load() -> Result<Config> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Config::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Config> {
        if data.trim().is_empty() {
            return Ok(Config::default());
        }
        let raw: RawConfig = serde_yaml::from_str(data).context("failed to parse config")?;
        let defaults = Config::default();

        let resolve = |raw: Option<RawTool>, defaults: &ToolConfig, tool: Tool| -> Result<ToolConfig> {
            let Some(raw) = raw else {
                return Ok(defaults.clone());
            };
            Ok(ToolConfig {
                command: raw.command.unwrap_or_else(|| defaults.command.clone()),
                key: match raw.key {
                    Some(key) => parse_key(&key)
                        .with_context(|| format!("invalid key for {tool}"))?,
                    None => defaults.key,
                },
                enabled: raw.enabled.unwrap_or(true),
            })
        };

        let mut sessions = Vec::new();
        for raw_session in raw.sessions.unwrap_or_default() {
            let Some(name) = raw_session.name.filter(|n| !n.is_empty()) else {
                bail!("session missing name");
            };
            let Some(command) = raw_session.command.filter(|c| !c.is_empty()) else {
                bail!("session {name:?} missing command");
            };
            let Some(key) = raw_session.key.filter(|k| !k.is_empty()) else {
                bail!("session {name:?} missing key");
            };
            sessions.push(SessionConfig {
                name,
                command,
                key: parse_key(&key).with_context(|| "invalid session key")?,
            });
        }

        let cfg = Config {
            claude: resolve(raw.claude, &defaults.claude, Tool::Claude)?,
            codex: resolve(raw.codex, &defaults.codex, Tool::Codex)?,
            cursor: resolve(raw.cursor, &defaults.cursor, Tool::Cursor)?,
            sessions,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let mut keys: HashMap<char, String> = HashMap::new();
        for tool in Tool::ALL {
            let cfg = self.tool(tool);
            if !cfg.enabled {
                continue;
            }
            if let Some(existing) = keys.insert(cfg.key, tool.to_string()) {
                bail!("duplicate key {:?} used by {existing:?} and {:?}", cfg.key, tool.as_str());
            }
        }
        for session in &self.sessions {
            if let Some(existing) = keys.insert(session.key, session.name.clone()) {
                bail!(
                    "duplicate key {:?} used by {existing:?} and {:?}",
                    session.key,
                    session.name
                );
            }
        }
        Ok(())
    }
}

fn parse_key(s: &str) -> Result<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => bail!("key must be a single character, got {s:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_from_session_name_matches_prefixes() {
        assert_eq!(Tool::from_session_name("claude"), Some(Tool::Claude));
        assert_eq!(Tool::from_session_name("claude-3"), Some(Tool::Claude));
        assert_eq!(Tool::from_session_name("codex-2"), Some(Tool::Codex));
        assert_eq!(Tool::from_session_name("cursor"), Some(Tool::Cursor));
        assert_eq!(Tool::from_session_name("claudette"), None);
        assert_eq!(Tool::from_session_name("focus run"), None);
    }

    #[test]
    fn missing_file_content_falls_back_to_defaults() {
        let cfg = Config::from_yaml("").unwrap();
        assert_eq!(cfg.tool(Tool::Claude).key, 'c');
        assert_eq!(cfg.tool(Tool::Codex).command, "codex resume --last");
        assert!(cfg.tool(Tool::Cursor).enabled);
        assert!(cfg.sessions.is_empty());
    }

    #[test]
    fn partial_tool_block_inherits_defaults() {
        let cfg = Config::from_yaml("claude:\n  command: claude\n").unwrap();
        assert_eq!(cfg.tool(Tool::Claude).command, "claude");
        assert_eq!(cfg.tool(Tool::Claude).key, 'c');
        assert!(cfg.tool(Tool::Claude).enabled, "missing enabled defaults to true");
    }

    #[test]
    fn disabled_tool_is_excluded_from_base_sessions() {
        let cfg = Config::from_yaml("cursor:\n  enabled: false\n").unwrap();
        let names: Vec<String> = cfg.base_sessions().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["claude", "codex"]);
    }

    #[test]
    fn custom_sessions_require_all_fields() {
        let err = Config::from_yaml("sessions:\n  - name: web\n    key: w\n").unwrap_err();
        assert!(err.to_string().contains("missing command"), "{err}");

        let err = Config::from_yaml("sessions:\n  - command: sleep 5\n    key: w\n").unwrap_err();
        assert!(err.to_string().contains("missing name"), "{err}");

        let err = Config::from_yaml("sessions:\n  - name: web\n    command: sleep 5\n").unwrap_err();
        assert!(err.to_string().contains("missing key"), "{err}");
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let err = Config::from_yaml("codex:\n  key: c\n").unwrap_err();
        assert!(err.to_string().contains("duplicate key"), "{err}");

        let err = Config::from_yaml("sessions:\n  - name: web\n    command: sleep 5\n    key: x\n")
            .unwrap_err();
        assert!(err.to_string().contains("duplicate key"), "{err}");
    }

    #[test]
    fn disabling_a_tool_frees_its_key() {
        let cfg = Config::from_yaml("codex:\n  enabled: false\nsessions:\n  - name: web\n    command: sleep 5\n    key: x\n")
            .unwrap();
        assert_eq!(cfg.sessions[0].key, 'x');
        assert_eq!(cfg.tool_for_key('x'), None);
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(Config::from_yaml("claude: [not-a-map\n").is_err());
    }

    #[test]
    fn remapped_key_is_resolved() {
        let cfg = Config::from_yaml("cursor:\n  key: r\n").unwrap();
        assert_eq!(cfg.tool_for_key('r'), Some(Tool::Cursor));
        assert_eq!(cfg.tool_for_key('u'), None);
    }
}
