//! Meta-analysis of a scaffold run, computed during the MetaAudit stage

use crate::pipeline::result::StageRecord;
use crate::pipeline::stage::Stage;
use serde::Serialize;
use serde_json::Value;

/// Frame success below this ratio triggers a criteria review recommendation
const FRAME_SUCCESS_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FrameworkPerformance {
    pub total_stages: usize,
    pub stages_evaluated: usize,
    pub successful_stages: usize,
    pub failed_stages: usize,
    /// Percentage over the stages evaluated so far
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContextPreservationStatus {
    pub context_loaded: bool,
    pub context_items: usize,
    pub context_merge_count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FrameAnalysis {
    pub total_frames_executed: usize,
    pub successful_frames: usize,
    pub failed_frames: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContextLossAnalysis {
    pub potential_loss_points: Vec<String>,
    pub preservation_effectiveness: f64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetaAnalysis {
    pub framework_performance: FrameworkPerformance,
    pub context_preservation: ContextPreservationStatus,
    pub frame_analysis: FrameAnalysis,
    pub optimization_recommendations: Vec<String>,
    pub context_loss_analysis: ContextLossAnalysis,
}

/// Frame totals over an execution log
pub fn frame_totals(log: &[StageRecord]) -> FrameAnalysis {
    FrameAnalysis {
        total_frames_executed: log.iter().map(|r| r.result.frames_executed).sum(),
        successful_frames: log.iter().map(|r| r.result.successful_frames).sum(),
        failed_frames: log.iter().map(|r| r.result.failed_frames).sum(),
    }
}

/// Preserved context counts as present only when it is a non-empty object
fn has_context(preserved: Option<&Value>) -> bool {
    preserved
        .and_then(Value::as_object)
        .is_some_and(|map| !map.is_empty())
}

pub fn analyze(log: &[StageRecord], preserved: Option<&Value>) -> MetaAnalysis {
    let successful_stages = log.iter().filter(|r| r.is_successful()).count();
    let failed_stages = log.len() - successful_stages;
    let success_rate = if log.is_empty() {
        0.0
    } else {
        successful_stages as f64 / log.len() as f64 * 100.0
    };

    let preserved_map = preserved.and_then(Value::as_object);
    let frame_analysis = frame_totals(log);

    MetaAnalysis {
        framework_performance: FrameworkPerformance {
            total_stages: Stage::ALL.len(),
            stages_evaluated: log.len(),
            successful_stages,
            failed_stages,
            success_rate,
        },
        context_preservation: ContextPreservationStatus {
            context_loaded: preserved.is_some(),
            context_items: preserved_map.map_or(0, |m| m.len()),
            context_merge_count: preserved_map
                .and_then(|m| m.get("context_merge_count"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
        },
        optimization_recommendations: optimization_recommendations(
            failed_stages,
            has_context(preserved),
            &frame_analysis,
        ),
        frame_analysis,
        context_loss_analysis: context_loss(has_context(preserved)),
    }
}

fn optimization_recommendations(
    failed_stages: usize,
    context_present: bool,
    frames: &FrameAnalysis,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    if failed_stages > 0 {
        recommendations.push("Consider increasing max_attempts for failed stages".to_string());
        recommendations.push("Review frame dependencies and execution order".to_string());
    }

    if !context_present {
        recommendations.push("Enable context preservation for better continuity".to_string());
    }

    if frames.total_frames_executed > 0
        && (frames.successful_frames as f64 / frames.total_frames_executed as f64)
            < FRAME_SUCCESS_THRESHOLD
    {
        recommendations.push("Review frame success criteria and validation logic".to_string());
    }

    recommendations
}

fn context_loss(context_present: bool) -> ContextLossAnalysis {
    if context_present {
        ContextLossAnalysis {
            potential_loss_points: Vec::new(),
            preservation_effectiveness: 100.0,
            recommendations: vec!["Context preservation working effectively".to_string()],
        }
    } else {
        ContextLossAnalysis {
            potential_loss_points: vec!["No previous context found".to_string()],
            preservation_effectiveness: 0.0,
            recommendations: vec!["Enable context preservation for this scaffold".to_string()],
        }
    }
}
