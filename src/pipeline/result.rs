//! Per-stage results and the execution log

use crate::frames::FrameOutput;
use crate::pipeline::audit::MetaAnalysis;
use crate::pipeline::publish::PublishOutcome;
use crate::pipeline::stage::Stage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NoFrames,
    Completed,
    RetryCompleted,
    MetaAuditComplete,
    Skipped,
    Published,
}

/// Outcome of one frame inside a stage
#[derive(Debug, Clone, Serialize)]
pub struct FrameResultEntry {
    pub frame_id: String,
    pub frame_name: String,
    pub success: bool,
    pub critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FrameOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the SuccessContinue stage did about earlier failures
#[derive(Debug, Clone, Serialize)]
pub struct RetryOutcome {
    /// Earlier stages that were unsuccessful
    pub failed_stages: Vec<u8>,
    pub retried_stages: Vec<u8>,
    /// Every retried stage succeeded
    pub recovered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetaAuditOutcome {
    pub meta_analysis: MetaAnalysis,
    pub report_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: u8,
    pub stage_name: &'static str,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub frames_executed: usize,
    pub successful_frames: usize,
    pub failed_frames: usize,
    pub results: Vec<FrameResultEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_audit: Option<MetaAuditOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishOutcome>,
}

impl StageResult {
    pub fn no_frames(stage: Stage) -> Self {
        let mut result = Self::from_frames(stage, Vec::new());
        result.status = StageStatus::NoFrames;
        result.message = Some(format!("No frames defined for stage {}", stage.number()));
        result
    }

    pub fn from_frames(stage: Stage, results: Vec<FrameResultEntry>) -> Self {
        let successful_frames = results.iter().filter(|r| r.success).count();
        Self {
            stage: stage.number(),
            stage_name: stage.name(),
            status: StageStatus::Completed,
            message: None,
            frames_executed: results.len(),
            successful_frames,
            failed_frames: results.len() - successful_frames,
            results,
            retry: None,
            meta_audit: None,
            publish: None,
        }
    }

    /// Frame outcome: vacuously true without frames, else ≥1 success and no failure
    fn frames_successful(&self) -> bool {
        self.frames_executed == 0 || (self.successful_frames > 0 && self.failed_frames == 0)
    }

    pub fn is_successful(&self) -> bool {
        self.frames_successful()
            && self.retry.as_ref().map_or(true, |r| r.recovered)
            && self.publish.as_ref().map_or(true, PublishOutcome::is_success)
    }
}

/// Entry in the run's execution log
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: u8,
    pub stage_name: &'static str,
    pub result: StageResult,
    /// Result replaced by a SuccessContinue re-run
    pub retried: bool,
    pub timestamp: DateTime<Utc>,
}

impl StageRecord {
    pub fn new(result: StageResult) -> Self {
        Self {
            stage: result.stage,
            stage_name: result.stage_name,
            result,
            retried: false,
            timestamp: Utc::now(),
        }
    }

    pub fn is_successful(&self) -> bool {
        self.result.is_successful()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, success: bool) -> FrameResultEntry {
        FrameResultEntry {
            frame_id: id.to_string(),
            frame_name: id.to_string(),
            success,
            critical: false,
            result: None,
            error: (!success).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn test_no_frames_is_successful() {
        let result = StageResult::no_frames(Stage::Plan);
        assert_eq!(result.status, StageStatus::NoFrames);
        assert!(result.is_successful());
        assert_eq!(result.message.as_deref(), Some("No frames defined for stage 3"));
    }

    #[test]
    fn test_success_requires_no_failed_frames() {
        assert!(StageResult::from_frames(Stage::Scope, vec![entry("a", true)]).is_successful());
        assert!(!StageResult::from_frames(
            Stage::Scope,
            vec![entry("a", true), entry("b", false)]
        )
        .is_successful());
        assert!(!StageResult::from_frames(Stage::Scope, vec![entry("b", false)]).is_successful());
    }

    #[test]
    fn test_unrecovered_retry_is_unsuccessful() {
        let mut result = StageResult::no_frames(Stage::SuccessContinue);
        result.retry = Some(RetryOutcome {
            failed_stages: vec![2],
            retried_stages: vec![2, 3, 4],
            recovered: false,
        });
        assert!(!result.is_successful());
    }

    #[test]
    fn test_serialized_shape() {
        let value =
            serde_json::to_value(StageResult::from_frames(Stage::Plan, vec![entry("a", true)]))
                .unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["stage_name"], "PLAN");
        assert_eq!(value["successful_frames"], 1);
        assert!(value.get("retry").is_none());
    }
}
