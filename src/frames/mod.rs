//! Frame definitions and the runner interface
//!
//! A frame is an external script plus the metadata the orchestrator needs to
//! invoke it: an entry point, parameters, and the success criteria its JSON
//! result has to satisfy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod bridge;
pub mod criteria;
pub mod executor;
pub mod registry;

pub use bridge::{FrameRuntime, ScriptRunner};
pub use executor::{ExecutionContext, FrameExecutionRecord, FrameExecutor};
pub use registry::{FrameRegistry, FrameSummary, Scaffold, ScaffoldSummary, StagePlan};

/// JSON object a frame hands back to the orchestrator
pub type FrameOutput = Map<String, Value>;

/// Category of work a frame performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Module,
    Tool,
    #[default]
    Process,
    Analysis,
    Mitigation,
    Verification,
    MetaAnalysis,
    Implementation,
    Diagnostic,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Module => "module",
            FrameKind::Tool => "tool",
            FrameKind::Process => "process",
            FrameKind::Analysis => "analysis",
            FrameKind::Mitigation => "mitigation",
            FrameKind::Verification => "verification",
            FrameKind::MetaAnalysis => "meta_analysis",
            FrameKind::Implementation => "implementation",
            FrameKind::Diagnostic => "diagnostic",
        }
    }
}

/// A registered frame
///
/// `id` is filled from the `[frames.<id>]` table key when the configuration is loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FrameKind,
    #[serde(default)]
    pub description: String,
    /// Script or executable, relative paths resolve against the working directory
    pub file_path: PathBuf,
    /// Function the bridge calls for Python and Node frames
    #[serde(default)]
    pub entry_point: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Key/value pairs that must appear verbatim in the frame result
    #[serde(default)]
    pub success_criteria: Map<String, Value>,
    #[serde(default)]
    pub rollback_plan: String,
    #[serde(default = "default_frame_version")]
    pub version: String,
    #[serde(default = "default_context_preservation")]
    pub context_preservation: bool,
    /// Overrides `framework.frame_timeout_secs`
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// JSON Schema the scaffold input must satisfy before the frame runs
    #[serde(default)]
    pub input_schema: Option<Value>,
}

pub(crate) fn default_frame_version() -> String {
    "1.0".to_string()
}

pub(crate) fn default_context_preservation() -> bool {
    true
}

impl Frame {
    /// Minimal frame, used by tests and programmatic registries
    pub fn new(id: &str, name: &str, file_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind: FrameKind::default(),
            description: String::new(),
            file_path: file_path.into(),
            entry_point: String::new(),
            dependencies: Vec::new(),
            parameters: Map::new(),
            success_criteria: Map::new(),
            rollback_plan: String::new(),
            version: default_frame_version(),
            context_preservation: default_context_preservation(),
            timeout_secs: None,
            input_schema: None,
        }
    }

    /// Runtime selected from the file extension
    pub fn runtime(&self) -> FrameRuntime {
        FrameRuntime::detect(&self.file_path)
    }

    /// Absolute location of the frame file
    pub fn resolve_path(&self, working_dir: &Path) -> PathBuf {
        if self.file_path.is_absolute() {
            self.file_path.clone()
        } else {
            working_dir.join(&self.file_path)
        }
    }
}

/// Executes a single frame attempt
///
/// The production implementation is [`ScriptRunner`]; tests plug in
/// in-process runners from [`crate::testing`].
#[async_trait]
pub trait FrameRunner: Send + Sync {
    async fn run(&self, context: &ExecutionContext) -> Result<FrameOutput, FrameError>;
}

/// Errors raised while running a frame
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Failed to prepare frame context: {0}")]
    ContextFile(String),
    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },
    #[error("Frame timed out after {0} seconds")]
    Timeout(u64),
    #[error("Frame process exited with status {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },
    #[error("No JSON response found in frame output")]
    NoResponse,
    #[error("Frame reported failure: {0}")]
    Reported(String),
    #[error("Success criteria not met: {0}")]
    CriteriaNotMet(#[from] criteria::CriteriaMismatch),
    #[error("Input validation failed: {0}")]
    InvalidInput(String),
    #[error("Frame execution failed: {0}")]
    Execution(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_defaults_from_toml() {
        let frame: Frame = toml::from_str(
            r#"
name = "Audit"
file_path = "scripts/audit.py"
entry_point = "run_audit"
"#,
        )
        .unwrap();

        assert_eq!(frame.kind, FrameKind::Process);
        assert_eq!(frame.version, "1.0");
        assert!(frame.context_preservation);
        assert!(frame.parameters.is_empty());
        assert!(frame.timeout_secs.is_none());
        assert_eq!(frame.runtime(), FrameRuntime::Python);
    }

    #[test]
    fn test_frame_kind_uses_type_key() {
        let frame: Frame = toml::from_str(
            r#"
name = "Meta"
type = "meta_analysis"
file_path = "meta.js"

[parameters]
depth = 3

[success_criteria]
done = true
"#,
        )
        .unwrap();

        assert_eq!(frame.kind, FrameKind::MetaAnalysis);
        assert_eq!(frame.kind.as_str(), "meta_analysis");
        assert_eq!(frame.parameters["depth"], 3);
        assert_eq!(frame.success_criteria["done"], true);
    }

    #[test]
    fn test_resolve_path() {
        let relative = Frame::new("a", "A", "scripts/a.sh");
        assert_eq!(
            relative.resolve_path(Path::new("/work")),
            PathBuf::from("/work/scripts/a.sh")
        );

        let absolute = Frame::new("b", "B", "/opt/b.sh");
        assert_eq!(
            absolute.resolve_path(Path::new("/work")),
            PathBuf::from("/opt/b.sh")
        );
    }
}
