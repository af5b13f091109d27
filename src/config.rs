//! Configuration system for the frame orchestrator
//!
//! A single TOML file describes the framework settings, the interpreters used
//! to run frames, the frame catalogue and the scaffolds that arrange frames
//! into the ten pipeline stages.

use crate::frames::{Frame, Scaffold};
use crate::pipeline::stage::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File names probed when no explicit configuration path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["octospine.toml", "config/octospine.toml"];

/// Environment variable that forces the push stage to be skipped
pub const SKIP_PUSH_ENV: &str = "AF_SKIP_GIT_PUSH";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FrameworkConfig {
    #[serde(default)]
    pub framework: FrameworkSection,
    #[serde(default)]
    pub runtimes: RuntimeSection,
    #[serde(default)]
    pub frames: BTreeMap<String, Frame>,
    #[serde(default)]
    pub scaffolds: BTreeMap<String, Scaffold>,
}

/// Framework section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameworkSection {
    /// Directory for `<task>_context.json` and per-frame context files
    #[serde(default = "default_context_dir")]
    pub context_dir: PathBuf,
    /// Directory for execution, meta-analysis and failure reports
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    /// Directory frames and git commands run in (default: current directory)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Attempts per frame before it counts as failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// The push stage only talks to git when this is false
    #[serde(default = "default_skip_push")]
    pub skip_push: bool,
}

impl Default for FrameworkSection {
    fn default() -> Self {
        Self {
            context_dir: default_context_dir(),
            reports_dir: default_reports_dir(),
            working_dir: None,
            max_attempts: default_max_attempts(),
            frame_timeout_secs: default_frame_timeout(),
            command_timeout_secs: default_command_timeout(),
            skip_push: default_skip_push(),
        }
    }
}

fn default_context_dir() -> PathBuf {
    PathBuf::from("context_preservation")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_max_attempts() -> u32 {
    2
}

fn default_frame_timeout() -> u64 {
    300 // 5 minutes
}

fn default_command_timeout() -> u64 {
    300
}

fn default_skip_push() -> bool {
    true
}

/// Interpreter commands used by the script bridge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSection {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_node")]
    pub node: String,
    #[serde(default = "default_powershell")]
    pub powershell: String,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            python: default_python(),
            node: default_node(),
            powershell: default_powershell(),
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_node() -> String {
    "node".to_string()
}

fn default_powershell() -> String {
    "powershell".to_string()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid frame or scaffold ID format: {0}")]
    InvalidFrameId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("No configuration file found (looked for {0})")]
    NotFound(String),
}

impl FrameworkConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load the first of [`DEFAULT_CONFIG_PATHS`] that exists below `base`
    pub fn discover(base: &Path) -> Result<(Self, PathBuf), ConfigError> {
        let path = DEFAULT_CONFIG_PATHS
            .iter()
            .map(|candidate| base.join(candidate))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ConfigError::NotFound(DEFAULT_CONFIG_PATHS.join(", ")))?;

        let config = Self::load_from_file(&path)?;
        Ok((config, path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: FrameworkConfig = toml::from_str(content)?;

        // Table keys are the canonical ids
        for (id, frame) in config.frames.iter_mut() {
            frame.id = id.clone();
        }
        for (id, scaffold) in config.scaffolds.iter_mut() {
            scaffold.id = id.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Check ids, scaffold references and numeric limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.framework.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "framework.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.framework.frame_timeout_secs == 0 || self.framework.command_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "framework timeouts must be greater than zero".to_string(),
            ));
        }

        for id in self.frames.keys() {
            validate_id(id)?;
        }

        for (scaffold_id, scaffold) in &self.scaffolds {
            validate_id(scaffold_id)?;
            for (stage, plan) in &scaffold.stages {
                self.validate_stage_plan(scaffold_id, *stage, &plan.frames, &plan.critical)?;
            }
        }

        Ok(())
    }

    fn validate_stage_plan(
        &self,
        scaffold_id: &str,
        stage: Stage,
        frames: &[String],
        critical: &[String],
    ) -> Result<(), ConfigError> {
        for frame_id in frames {
            if !self.frames.contains_key(frame_id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Scaffold '{scaffold_id}' stage {} references unknown frame '{frame_id}'",
                    stage.key()
                )));
            }
        }

        for frame_id in critical {
            if !frames.contains(frame_id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Scaffold '{scaffold_id}' stage {} marks '{frame_id}' critical but does not run it",
                    stage.key()
                )));
            }
        }

        Ok(())
    }

    /// Push is skipped when configured so or when `AF_SKIP_GIT_PUSH=1`
    pub fn skip_push_effective(&self) -> bool {
        self.framework.skip_push
            || std::env::var(SKIP_PUSH_ENV).is_ok_and(|value| value.trim() == "1")
    }

    /// Absolute working directory for frames and git
    pub fn resolved_working_dir(&self) -> Result<PathBuf, ConfigError> {
        let cwd = std::env::current_dir()?;
        Ok(match &self.framework.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => cwd.join(dir),
            None => cwd,
        })
    }

    /// Resolve a configured directory against the working directory
    pub fn resolve_dir(&self, dir: &Path) -> Result<PathBuf, ConfigError> {
        if dir.is_absolute() {
            Ok(dir.to_path_buf())
        } else {
            Ok(self.resolved_working_dir()?.join(dir))
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[framework]
max_attempts = 1

[frames.scope_check]
name = "Scope Check"
type = "analysis"
file_path = "frames/scope_check.py"
entry_point = "run"
success_criteria = { scoped = true }

[frames.implement]
name = "Implement"
type = "implementation"
file_path = "frames/implement.sh"

[scaffolds.quick]
name = "Quick"
description = "Scope then implement"

[scaffolds.quick.stages.scope]
frames = ["scope_check"]
critical = ["scope_check"]

[scaffolds.quick.stages.implement]
frames = ["implement"]
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

/// Validate frame and scaffold id format
pub fn validate_id(id: &str) -> Result<(), ConfigError> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidFrameId(format!(
            "ID '{id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
