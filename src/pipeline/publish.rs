//! Publishing stage: commit and push the working tree with git

use crate::external::{
    analyze_commit_failure, diagnose, CommandResult, CommitFailureAnalysis, DiagnosticReport,
    ExternalCommandExecutor, FailureSummary,
};
use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Success,
    PartialSuccess,
    Error,
    NoRepository,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub status: PublishStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    pub external_failures: Vec<CommandResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_analysis: Option<CommitFailureAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<FailureSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_report: Option<DiagnosticReport>,
    pub recommendations: Vec<String>,
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        self.status == PublishStatus::Success
    }
}

/// Commit message used for automated commits
pub fn commit_message() -> String {
    format!(
        "Octospine scaffold update - {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

/// Run `git status`, `git add .`, `git commit` and `git push`
///
/// Stops early only when `git status` fails. Every other failure is collected
/// and diagnosed.
pub async fn publish_changes(executor: &mut ExternalCommandExecutor) -> PublishOutcome {
    info!("Checking git repository status");
    let status = executor.execute(&["git", "status"]).await;
    if !status.success {
        warn!(stderr = %status.stderr.trim(), "Not a git repository");
        let recommendations = status.recommendations.clone();
        return PublishOutcome {
            status: PublishStatus::NoRepository,
            message: "Not in a git repository".to_string(),
            commit_message: None,
            external_failures: vec![status],
            commit_analysis: None,
            failure_summary: None,
            diagnostic_report: None,
            recommendations,
        };
    }

    let mut any_succeeded = false;
    let mut failures = Vec::new();

    let add = executor.execute(&["git", "add", "."]).await;
    record(&add, &mut any_succeeded, &mut failures);

    let message = commit_message();
    info!(commit_message = %message, "Committing changes");
    let commit = executor.execute(&["git", "commit", "-m", message.as_str()]).await;
    let commit_analysis = (!commit.success).then(|| {
        let analysis = analyze_commit_failure(&commit);
        warn!(failure_type = ?analysis.failure_type, "Commit failed");
        analysis
    });
    record(&commit, &mut any_succeeded, &mut failures);

    info!("Pushing to remote repository");
    let push = executor.execute(&["git", "push"]).await;
    record(&push, &mut any_succeeded, &mut failures);

    let failure_summary = executor.failure_summary();

    if failures.is_empty() {
        info!("Changes pushed to remote");
        return PublishOutcome {
            status: PublishStatus::Success,
            message: "Successfully pushed to remote".to_string(),
            commit_message: Some(message),
            external_failures: Vec::new(),
            commit_analysis: None,
            failure_summary: Some(failure_summary),
            diagnostic_report: None,
            recommendations: Vec::new(),
        };
    }

    warn!(failures = failures.len(), "External command failures detected");
    let diagnostic_report = diagnose(&failures);
    let mut recommendations = failure_summary
        .report()
        .map(|r| r.recommendations.clone())
        .unwrap_or_default();
    if let Some(analysis) = &commit_analysis {
        recommendations.extend(analysis.recommendations.iter().cloned());
    }

    PublishOutcome {
        status: if any_succeeded {
            PublishStatus::PartialSuccess
        } else {
            PublishStatus::Error
        },
        message: format!(
            "Git operations completed with {} external failures",
            failures.len()
        ),
        commit_message: any_succeeded.then_some(message),
        external_failures: failures,
        commit_analysis,
        failure_summary: Some(failure_summary),
        diagnostic_report: Some(diagnostic_report),
        recommendations: crate::external::dedup_preserving_order(recommendations),
    }
}

fn record(result: &CommandResult, any_succeeded: &mut bool, failures: &mut Vec<CommandResult>) {
    *any_succeeded |= result.success;
    if !result.success {
        failures.push(result.clone());
    }
}
