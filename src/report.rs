//! Report files written at the end of a scaffold run
//!
//! Three kinds of JSON report land in the reports directory, each suffixed with
//! a local `%Y%m%d_%H%M%S` timestamp (plus `_<n>` when that name is taken):
//! - `scaffold_execution_<scaffold>_<ts>.json` after a completed run
//! - `meta_analysis_<scaffold>_<ts>.json` from the MetaAudit stage
//! - `framework_failure_<ts>.json` when a run aborts

use crate::error::FrameworkResult;
use crate::external::{CommandResult, ErrorType, FailureSummary, Severity, STDERR_SUMMARY_LIMIT};
use crate::frames::FrameExecutionRecord;
use crate::observability::MetricsSnapshot;
use crate::pipeline::audit::frame_totals;
use crate::pipeline::result::StageRecord;
use crate::pipeline::stage::Stage;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Report format version
pub const REPORT_VERSION: &str = "2.0";

/// Stage success percentage below which the framework itself is flagged
const STAGE_SUCCESS_THRESHOLD: f64 = 80.0;

/// Writes timestamped JSON reports into one directory
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `value` to `<dir>/<prefix>_<timestamp>.json`
    ///
    /// Existing reports are never overwritten; a second report within the same
    /// second becomes `<prefix>_<timestamp>_1.json` and so on.
    pub fn write<T: Serialize>(&self, prefix: &str, value: &T) -> FrameworkResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(value)?;
        let stem = format!("{prefix}_{}", file_timestamp());

        let mut collisions = 0u32;
        loop {
            let name = match collisions {
                0 => format!("{stem}.json"),
                n => format!("{stem}_{n}.json"),
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => collisions += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn write_meta_analysis<T: Serialize>(
        &self,
        scaffold_id: &str,
        analysis: &T,
    ) -> FrameworkResult<PathBuf> {
        self.write(&format!("meta_analysis_{scaffold_id}"), analysis)
    }

    pub fn write_execution_report(&self, report: &ExecutionReport) -> FrameworkResult<PathBuf> {
        self.write(
            &format!("scaffold_execution_{}", report.metadata.scaffold_id),
            report,
        )
    }

    pub fn write_failure_report(&self, report: &FailureReportFile) -> FrameworkResult<PathBuf> {
        self.write("framework_failure", report)
    }
}

/// Local timestamp used in report file names
pub fn file_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub scaffold_id: String,
    pub scaffold_name: String,
    pub run_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub version: String,
    pub framework_version: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionSummary {
    pub total_stages: usize,
    pub successful_stages: usize,
    pub failed_stages: usize,
    pub total_frames_executed: usize,
    pub total_successful_frames: usize,
}

impl ExecutionSummary {
    pub fn from_log(log: &[StageRecord]) -> Self {
        let successful_stages = log.iter().filter(|r| r.is_successful()).count();
        let frames = frame_totals(log);
        Self {
            total_stages: Stage::ALL.len(),
            successful_stages,
            failed_stages: log.len() - successful_stages,
            total_frames_executed: frames.total_frames_executed,
            total_successful_frames: frames.successful_frames,
        }
    }

    /// Successful stages as a percentage of all ten stages
    pub fn stage_success_rate(&self) -> f64 {
        if self.total_stages == 0 {
            0.0
        } else {
            self.successful_stages as f64 / self.total_stages as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextPreservationSummary {
    pub context_loaded: bool,
    pub context_items: usize,
    pub context_preserved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_path: Option<PathBuf>,
}

/// Command history entry as it appears in a report
#[derive(Debug, Clone, Serialize)]
pub struct CommandHistoryEntry {
    pub command: String,
    pub success: bool,
    pub error_type: Option<ErrorType>,
    pub severity: Severity,
    pub execution_time_secs: f64,
    pub return_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub recommendations: Vec<String>,
}

impl From<&CommandResult> for CommandHistoryEntry {
    fn from(cmd: &CommandResult) -> Self {
        Self {
            command: cmd.command.clone(),
            success: cmd.success,
            error_type: cmd.error_type,
            severity: cmd.severity,
            execution_time_secs: cmd.execution_time_secs,
            return_code: cmd.return_code,
            stderr: (!cmd.stderr.is_empty())
                .then(|| crate::external::truncate_chars(&cmd.stderr, STDERR_SUMMARY_LIMIT)),
            recommendations: cmd.recommendations.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExternalCommandAnalysis {
    pub failure_summary: FailureSummary,
    pub command_history: Vec<CommandHistoryEntry>,
}

impl ExternalCommandAnalysis {
    pub fn from_history(history: &[CommandResult], failure_summary: FailureSummary) -> Self {
        Self {
            failure_summary,
            command_history: history.iter().map(CommandHistoryEntry::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Improvement {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub priority: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QualityImprovement {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PriorityAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub recommendations: Vec<String>,
    pub priority: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Recommendations {
    pub framework_improvements: Vec<Improvement>,
    pub external_fixes: Vec<String>,
    pub quality_improvements: Vec<QualityImprovement>,
    pub priority_actions: Vec<PriorityAction>,
}

/// Derive recommendations from the run summary and the external command record
pub fn build_recommendations(
    summary: &ExecutionSummary,
    external: &ExternalCommandAnalysis,
) -> Recommendations {
    let mut recommendations = Recommendations::default();

    let success_rate = summary.stage_success_rate();
    if success_rate < STAGE_SUCCESS_THRESHOLD {
        recommendations.framework_improvements.push(Improvement {
            kind: "success_rate".to_string(),
            description: format!(
                "Low success rate ({success_rate:.1}%) - consider framework optimization"
            ),
            priority: "high".to_string(),
        });
    }

    if let Some(failures) = external.failure_summary.report() {
        recommendations
            .external_fixes
            .extend(failures.recommendations.iter().cloned());

        recommendations
            .priority_actions
            .extend(failures.critical_issues.iter().map(|issue| PriorityAction {
                kind: "critical_fix".to_string(),
                description: format!(
                    "Fix critical {} in {}",
                    issue.error_type.map_or("unknown", ErrorType::as_str),
                    issue.command
                ),
                recommendations: issue.recommendations.clone(),
                priority: "critical".to_string(),
            }));
    }

    let quality_failures = external
        .command_history
        .iter()
        .filter(|cmd| !cmd.success && is_quality_command(&cmd.command))
        .count();
    if quality_failures > 0 {
        recommendations.quality_improvements.push(QualityImprovement {
            kind: "code_quality".to_string(),
            description: format!("Address {quality_failures} code quality issues"),
            actions: [
                "Run eslint --fix",
                "Run prettier --write",
                "Review linting configuration",
            ]
            .map(String::from)
            .to_vec(),
        });
    }

    recommendations
}

fn is_quality_command(command: &str) -> bool {
    command.contains("eslint") || command.contains("prettier")
}

/// Final report of a completed scaffold run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub metadata: ReportMetadata,
    pub execution_summary: ExecutionSummary,
    pub context_preservation: ContextPreservationSummary,
    pub external_command_analysis: ExternalCommandAnalysis,
    pub stage_results: Vec<StageRecord>,
    pub frame_execution_history: Vec<FrameExecutionRecord>,
    pub input_data: Value,
    pub previous_results: Map<String, Value>,
    pub metrics: MetricsSnapshot,
    pub recommendations: Recommendations,
}

/// Written when a run aborts
#[derive(Debug, Clone, Serialize)]
pub struct FailureReportFile {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    pub error_kind: String,
    pub context: Value,
    pub execution_log: Vec<StageRecord>,
}

/// Log the console summary of a finished run
pub fn log_summary(report: &ExecutionReport) {
    let summary = &report.execution_summary;
    info!(
        scaffold_id = %report.metadata.scaffold_id,
        successful_stages = summary.successful_stages,
        total_stages = summary.total_stages,
        successful_frames = summary.total_successful_frames,
        total_frames = summary.total_frames_executed,
        "Execution summary"
    );

    if let Some(failures) = report.external_command_analysis.failure_summary.report() {
        warn!(
            total_failures = failures.total_failures,
            critical_failures = failures.critical_failures,
            "External command failures"
        );
        for (i, recommendation) in failures.recommendations.iter().take(5).enumerate() {
            info!("  {}. {}", i + 1, recommendation);
        }
    }

    for action in &report.recommendations.priority_actions {
        warn!(priority = %action.priority, "{}", action.description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{analyze_output, summarize_failures};
    use std::time::Duration;

    fn summary(successful_stages: usize) -> ExecutionSummary {
        ExecutionSummary {
            total_stages: 10,
            successful_stages,
            failed_stages: 10 - successful_stages,
            total_frames_executed: 0,
            total_successful_frames: 0,
        }
    }

    fn analysis(history: Vec<CommandResult>) -> ExternalCommandAnalysis {
        let failure_summary = summarize_failures(&history);
        ExternalCommandAnalysis::from_history(&history, failure_summary)
    }

    #[test]
    fn test_writer_names_files_with_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("reports"));

        let path = writer
            .write_meta_analysis("full_system", &serde_json::json!({"ok": true}))
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();

        assert!(name.starts_with("meta_analysis_full_system_"));
        assert!(name.ends_with(".json"));
        // prefix + YYYYmmdd_HHMMSS + .json
        assert_eq!(name.len(), "meta_analysis_full_system_".len() + 15 + 5);
    }

    #[test]
    fn test_same_second_reports_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().to_path_buf());

        let paths: Vec<PathBuf> = (0..3)
            .map(|n| {
                writer
                    .write("framework_failure", &serde_json::json!({ "n": n }))
                    .unwrap()
            })
            .collect();

        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
        assert_ne!(paths[0], paths[2]);
        for (n, path) in paths.iter().enumerate() {
            let stored: Value =
                serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
            assert_eq!(stored["n"], n);
        }
    }

    #[test]
    fn test_low_stage_success_flags_framework() {
        let recommendations = build_recommendations(&summary(7), &analysis(Vec::new()));
        assert_eq!(recommendations.framework_improvements.len(), 1);
        assert_eq!(
            recommendations.framework_improvements[0].description,
            "Low success rate (70.0%) - consider framework optimization"
        );
        assert!(recommendations.external_fixes.is_empty());
    }

    #[test]
    fn test_full_success_has_no_recommendations() {
        let recommendations = build_recommendations(&summary(10), &analysis(Vec::new()));
        assert_eq!(recommendations, Recommendations::default());
    }

    #[test]
    fn test_external_failures_produce_actions() {
        let history = vec![
            analyze_output(
                "npx eslint --fix .",
                127,
                String::new(),
                "sh: eslint: command not found".to_string(),
                Duration::ZERO,
            ),
            analyze_output("git status", 0, String::new(), String::new(), Duration::ZERO),
        ];
        let recommendations = build_recommendations(&summary(10), &analysis(history));

        assert!(!recommendations.external_fixes.is_empty());
        assert_eq!(recommendations.priority_actions.len(), 1);
        assert_eq!(
            recommendations.priority_actions[0].description,
            "Fix critical dependency_missing in npx eslint --fix ."
        );
        assert_eq!(recommendations.quality_improvements.len(), 1);
    }

    #[test]
    fn test_history_entry_truncates_stderr() {
        let cmd = analyze_output(
            "make",
            2,
            String::new(),
            "e".repeat(800),
            Duration::ZERO,
        );
        let entry = CommandHistoryEntry::from(&cmd);
        assert_eq!(entry.stderr.unwrap().len(), STDERR_SUMMARY_LIMIT);
    }
}
