//! Frame and scaffold catalogue
//!
//! Scaffolds pick frames for each of the ten stages. The registry is built
//! from validated configuration and answers lookups for the pipeline.

use crate::config::{ConfigError, FrameworkConfig};
use crate::frames::{default_context_preservation, default_frame_version, Frame, FrameKind};
use crate::pipeline::stage::Stage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Frames scheduled for one stage of a scaffold
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StagePlan {
    #[serde(default)]
    pub frames: Vec<String>,
    /// Frames whose failure aborts the run; a subset of `frames`
    #[serde(default)]
    pub critical: Vec<String>,
}

/// A named arrangement of frames over the pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scaffold {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stages: BTreeMap<Stage, StagePlan>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub success_criteria: Map<String, Value>,
    #[serde(default = "default_frame_version")]
    pub version: String,
    #[serde(default = "default_context_preservation")]
    pub context_preservation: bool,
}

impl Scaffold {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            stages: BTreeMap::new(),
            dependencies: Vec::new(),
            success_criteria: Map::new(),
            version: default_frame_version(),
            context_preservation: default_context_preservation(),
        }
    }

    /// Builder used by tests and programmatic setups
    pub fn with_stage(mut self, stage: Stage, frames: &[&str], critical: &[&str]) -> Self {
        self.stages.insert(
            stage,
            StagePlan {
                frames: frames.iter().map(|s| s.to_string()).collect(),
                critical: critical.iter().map(|s| s.to_string()).collect(),
            },
        );
        self
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FrameSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    pub description: String,
    pub file_path: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScaffoldSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub stages: usize,
    pub dependencies: Vec<String>,
    pub context_preservation: bool,
}

/// Lookup of frames and scaffolds by id
#[derive(Debug, Clone, Default)]
pub struct FrameRegistry {
    frames: BTreeMap<String, Frame>,
    scaffolds: BTreeMap<String, Scaffold>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration, re-checking scaffold references
    pub fn from_config(config: &FrameworkConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut registry = Self::new();
        for (id, frame) in &config.frames {
            let mut frame = frame.clone();
            frame.id = id.clone();
            registry.register_frame(frame);
        }
        for (id, scaffold) in &config.scaffolds {
            let mut scaffold = scaffold.clone();
            scaffold.id = id.clone();
            registry.register_scaffold(scaffold)?;
        }
        Ok(registry)
    }

    pub fn register_frame(&mut self, frame: Frame) {
        self.frames.insert(frame.id.clone(), frame);
    }

    /// Register a scaffold whose frames are already registered
    pub fn register_scaffold(&mut self, scaffold: Scaffold) -> Result<(), ConfigError> {
        for (stage, plan) in &scaffold.stages {
            if let Some(missing) = plan.frames.iter().find(|id| !self.frames.contains_key(*id)) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Scaffold '{}' stage {} references unknown frame '{missing}'",
                    scaffold.id,
                    stage.key()
                )));
            }
            if let Some(stray) = plan.critical.iter().find(|id| !plan.frames.contains(*id)) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Scaffold '{}' stage {} marks '{stray}' critical but does not run it",
                    scaffold.id,
                    stage.key()
                )));
            }
        }
        self.scaffolds.insert(scaffold.id.clone(), scaffold);
        Ok(())
    }

    pub fn frame(&self, id: &str) -> Option<&Frame> {
        self.frames.get(id)
    }

    pub fn scaffold(&self, id: &str) -> Option<&Scaffold> {
        self.scaffolds.get(id)
    }

    /// Frames scheduled for `stage`, in order; empty for unknown scaffolds or unplanned stages
    pub fn frames_for(&self, scaffold_id: &str, stage: Stage) -> Vec<&Frame> {
        self.scaffolds
            .get(scaffold_id)
            .and_then(|s| s.stages.get(&stage))
            .map(|plan| plan.frames.iter().filter_map(|id| self.frames.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn is_critical(&self, scaffold_id: &str, stage: Stage, frame_id: &str) -> bool {
        self.scaffolds
            .get(scaffold_id)
            .and_then(|s| s.stages.get(&stage))
            .is_some_and(|plan| plan.critical.iter().any(|id| id == frame_id))
    }

    pub fn list_frames(&self) -> Vec<FrameSummary> {
        self.frames
            .values()
            .map(|frame| FrameSummary {
                id: frame.id.clone(),
                name: frame.name.clone(),
                kind: frame.kind,
                description: frame.description.clone(),
                file_path: frame.file_path.display().to_string(),
                version: frame.version.clone(),
            })
            .collect()
    }

    pub fn list_scaffolds(&self) -> Vec<ScaffoldSummary> {
        self.scaffolds
            .values()
            .map(|scaffold| ScaffoldSummary {
                id: scaffold.id.clone(),
                name: scaffold.name.clone(),
                description: scaffold.description.clone(),
                stages: scaffold.stages.len(),
                dependencies: scaffold.dependencies.clone(),
                context_preservation: scaffold.context_preservation,
            })
            .collect()
    }
}
