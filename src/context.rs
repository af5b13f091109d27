//! Context preservation across scaffold runs
//!
//! Each scaffold run leaves a `<task_id>_context.json` file behind that the next
//! run of the same scaffold loads and merges into. Frames that opt into context
//! preservation additionally get a `<frame_id>_<stage>_context.json` snapshot of
//! their last successful execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Format version written into task context files
pub const CONTEXT_VERSION: &str = "2.0";

/// Errors raised while reading or writing context files
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Context file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Context file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// On-disk envelope of a task context file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContextFile {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: Value,
    pub version: String,
}

/// Snapshot of a frame's last successful execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameContextRecord {
    pub frame_id: String,
    pub stage: u8,
    pub input_data: Value,
    pub parameters: Map<String, Value>,
    pub result: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Directory-backed context store
#[derive(Debug, Clone)]
pub struct ContextStore {
    dir: PathBuf,
}

impl ContextStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn task_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}_context.json"))
    }

    pub fn frame_path(&self, frame_id: &str, stage: u8) -> PathBuf {
        self.dir.join(format!("{frame_id}_{stage}_context.json"))
    }

    /// Write the context of a task, replacing any earlier file
    pub fn save(&self, task_id: &str, context: &Value) -> Result<PathBuf, ContextError> {
        let envelope = TaskContextFile {
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
            context: context.clone(),
            version: CONTEXT_VERSION.to_string(),
        };
        let path = self.task_path(task_id);
        self.write_json(&path, &envelope)?;
        info!(path = %path.display(), "Context preserved");
        Ok(path)
    }

    /// Load the context saved for a task, `None` when nothing was preserved yet
    pub fn load(&self, task_id: &str) -> Result<Option<Value>, ContextError> {
        let path = self.task_path(task_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| ContextError::Io {
            path: path.clone(),
            source,
        })?;
        let envelope: TaskContextFile =
            serde_json::from_str(&content).map_err(|source| ContextError::Json {
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), "Context loaded");
        Ok(Some(envelope.context))
    }

    /// Merge `new` over the stored context of `task_id` and save the result
    pub fn save_merged(&self, task_id: &str, new: &Value) -> Result<Value, ContextError> {
        let old = self.load(task_id)?;
        self.save_merged_over(task_id, old.as_ref(), new)
    }

    /// Merge `new` over an already loaded context and save the result
    ///
    /// The file on disk is not read, so an unreadable earlier context is
    /// simply replaced.
    pub fn save_merged_over(
        &self,
        task_id: &str,
        old: Option<&Value>,
        new: &Value,
    ) -> Result<Value, ContextError> {
        let merged = match old {
            Some(old) => merge_contexts(old, new),
            None => new.clone(),
        };
        self.save(task_id, &merged)?;
        Ok(merged)
    }

    pub fn save_frame(&self, record: &FrameContextRecord) -> Result<PathBuf, ContextError> {
        let path = self.frame_path(&record.frame_id, record.stage);
        self.write_json(&path, record)?;
        Ok(path)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), ContextError> {
        fs::create_dir_all(&self.dir).map_err(|source| ContextError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let content = serde_json::to_string_pretty(value).map_err(|source| ContextError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(|source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Merge two contexts
///
/// Starts from `old`; `recommendations` and `action_items` arrays are
/// concatenated, `findings` objects are merged key by key, any other key of
/// `new` replaces the old value. `last_updated` is refreshed and
/// `context_merge_count` incremented. Non-object inputs are treated as empty.
pub fn merge_contexts(old: &Value, new: &Value) -> Value {
    let mut merged = old.as_object().cloned().unwrap_or_default();
    let empty = Map::new();
    let incoming = new.as_object().unwrap_or(&empty);

    for (key, value) in incoming {
        let combined = match (key.as_str(), merged.get(key), value) {
            ("recommendations" | "action_items", Some(Value::Array(prev)), Value::Array(next)) => {
                Value::Array(prev.iter().chain(next.iter()).cloned().collect())
            }
            ("findings", Some(Value::Object(prev)), Value::Object(next)) => {
                let mut findings = prev.clone();
                for (k, v) in next {
                    findings.insert(k.clone(), v.clone());
                }
                Value::Object(findings)
            }
            ("context_merge_count" | "last_updated", _, _) => continue,
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }

    let merge_count = merged
        .get("context_merge_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    merged.insert(
        "last_updated".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    merged.insert(
        "context_merge_count".to_string(),
        Value::from(merge_count + 1),
    );

    Value::Object(merged)
}
