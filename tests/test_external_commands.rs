//! External command execution and failure diagnostics

#![cfg(unix)]


use octospine::external::{
    diagnose, ErrorType, ExternalCommandExecutor, FailureSummary, Severity,
};
use octospine::pipeline::{PublishStatus, StageStatus};
use octospine::testing::ScriptedRunner;
use octospine::FramePipeline;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn executor() -> ExternalCommandExecutor {
    ExternalCommandExecutor::new(Duration::from_secs(30))
}

#[tokio::test]
async fn test_successful_command_is_recorded() {
    let mut executor = executor();

    let result = executor.execute(&["sh", "-c", "echo hello"]).await;

    assert!(result.success);
    assert_eq!(result.return_code, 0);
    assert_eq!(result.stdout.trim(), "hello");
    assert_eq!(result.command, "sh -c echo hello");
    assert_eq!(executor.history().len(), 1);
    assert!(matches!(
        executor.failure_summary(),
        FailureSummary::NoFailures { .. }
    ));
}

#[tokio::test]
async fn test_failed_command_is_classified() {
    let mut executor = executor();

    let result = executor
        .execute(&["sh", "-c", "echo 'sh: eslint: command not found' >&2; exit 127"])
        .await;

    assert!(!result.success);
    assert_eq!(result.return_code, 127);
    assert_eq!(result.error_type, Some(ErrorType::DependencyMissing));
    assert_eq!(result.severity, Severity::High);
    assert!(!result.recommendations.is_empty());
}

#[tokio::test]
async fn test_command_timeout() {
    let mut executor = executor();

    let result = executor
        .execute_with_timeout(&["sleep", "10"], Duration::from_millis(200))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_type, Some(ErrorType::Timeout));
    assert!(result.stderr.contains("timed out"));
}

#[tokio::test]
async fn test_unknown_program_does_not_panic() {
    let mut executor = executor();

    let result = executor
        .execute(&["definitely-not-a-real-binary-octospine"])
        .await;

    assert!(!result.success);
    assert_eq!(result.error_type, Some(ErrorType::ExecutionError));
}

#[tokio::test]
async fn test_working_dir_is_honoured() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
    let mut executor = executor().with_working_dir(dir.path().to_path_buf());

    let result = executor.execute(&["ls"]).await;

    assert!(result.stdout.contains("marker.txt"));
}

#[tokio::test]
async fn test_failure_summary_and_diagnostics() {
    let mut executor = executor();
    executor
        .execute(&["sh", "-c", "echo 'Error: Cannot find module \"chalk\"' >&2; exit 1"])
        .await;
    executor
        .execute(&["sh", "-c", "echo 'JavaScript heap out of memory' >&2; exit 134"])
        .await;
    executor.execute(&["sh", "-c", "true"]).await;

    let FailureSummary::FailuresDetected(report) = executor.failure_summary() else {
        panic!("expected failures");
    };
    assert_eq!(report.total_failures, 2);
    assert_eq!(report.critical_failures, 2);
    assert_eq!(report.failures_by_type.get("dependency_missing"), Some(&1));
    assert_eq!(report.failures_by_type.get("memory_issue"), Some(&1));

    let failures: Vec<_> = executor
        .history()
        .iter()
        .filter(|r| !r.success)
        .cloned()
        .collect();
    let diagnostics = diagnose(&failures);
    assert_eq!(diagnostics.total_failures, 2);
    assert_eq!(diagnostics.dependency_impact.affected_dependencies, vec!["chalk"]);
    // Plain shell invocations are neither code quality tools nor git
    assert_eq!(diagnostics.orphan_analysis.blocker_count, 2);
    assert!(!diagnostics.action_items.is_empty());
}

#[tokio::test]
async fn test_push_stage_outside_repository() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_helpers::test_config(dir.path());
    let runner = Arc::new(ScriptedRunner::new().respond("scope_check", json!({"scoped": true})));
    let mut pipeline = FramePipeline::with_runner(&config, runner).unwrap();
    pipeline.set_skip_push(false);

    let outcome = pipeline
        .execute_scaffold("full_system", json!({}))
        .await
        .unwrap();

    let push = &outcome.report.stage_results[9];
    assert_eq!(push.result.status, StageStatus::Published);
    let publish = push.result.publish.as_ref().unwrap();
    assert_eq!(publish.status, PublishStatus::NoRepository);
    assert!(!push.is_successful());

    let history = &outcome.report.external_command_analysis.command_history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].command, "git status");
    assert!(!history[0].success);
}
