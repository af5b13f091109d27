//! External command execution with failure classification
//!
//! Commands run without a shell. Failed commands are classified from their
//! stderr into a small set of error types, each carrying a severity and a
//! fixed list of recommendations. Every result is kept in the executor history
//! so the final report can summarise what went wrong.

use crate::observability::MetricsCollector;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn, Instrument};

pub mod diagnostics;

pub use diagnostics::{analyze_commit_failure, diagnose, CommitFailureAnalysis, DiagnosticReport};

/// Maximum stderr characters kept in summaries and reports
pub const STDERR_SUMMARY_LIMIT: usize = 500;

/// Failure category derived from a command's stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    DependencyMissing,
    PermissionDenied,
    Timeout,
    MemoryIssue,
    ConfigurationError,
    ExecutionError,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::DependencyMissing => "dependency_missing",
            ErrorType::PermissionDenied => "permission_denied",
            ErrorType::Timeout => "timeout",
            ErrorType::MemoryIssue => "memory_issue",
            ErrorType::ConfigurationError => "configuration_error",
            ErrorType::ExecutionError => "execution_error",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ErrorType::DependencyMissing | ErrorType::PermissionDenied => Severity::High,
            ErrorType::MemoryIssue => Severity::Critical,
            ErrorType::Timeout | ErrorType::ConfigurationError | ErrorType::ExecutionError => {
                Severity::Medium
            }
        }
    }

    pub fn recommendations(self) -> &'static [&'static str] {
        match self {
            ErrorType::DependencyMissing => &[
                "Install missing dependencies",
                "Check package.json for required packages",
                "Run 'npm install' to install dependencies",
                "Verify Node.js/npm installation",
            ],
            ErrorType::PermissionDenied => &[
                "Check file permissions",
                "Run with appropriate user privileges",
                "Verify file ownership",
                "Check if files are read-only",
            ],
            ErrorType::Timeout => &[
                "Increase timeout value",
                "Check for infinite loops",
                "Consider breaking into smaller commands",
                "Monitor system resources",
            ],
            ErrorType::MemoryIssue => &[
                "Increase system memory",
                "Optimize memory usage",
                "Check for memory leaks",
                "Consider using streaming for large files",
            ],
            ErrorType::ConfigurationError => &[
                "Check configuration files",
                "Verify environment variables",
                "Review configuration syntax",
                "Check for missing config files",
            ],
            ErrorType::ExecutionError => &[
                "Check command syntax",
                "Verify dependencies are installed",
                "Check file permissions",
            ],
        }
    }
}

/// Severity of a command failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// High and critical failures are escalated in summaries
    pub fn is_critical(self) -> bool {
        self >= Severity::High
    }
}

const GENERIC_RECOMMENDATIONS: &[&str] = &[
    "Review command syntax",
    "Check system requirements",
    "Verify all dependencies are installed",
    "Check logs for more details",
];

const TIMEOUT_RECOMMENDATIONS: &[&str] = &[
    "Increase timeout value",
    "Check for infinite loops or deadlocks",
    "Consider breaking command into smaller parts",
];

/// Classification patterns, checked in order; the first match wins
static FAILURE_PATTERNS: Lazy<Vec<(ErrorType, Regex)>> = Lazy::new(|| {
    [
        (
            ErrorType::DependencyMissing,
            r"(?i)command not found|module not found|package not found|cannot find module",
        ),
        (
            ErrorType::PermissionDenied,
            r"(?i)permission denied|access denied|EACCES",
        ),
        (ErrorType::Timeout, r"(?i)timeout|killed|SIGTERM|SIGKILL"),
        (
            ErrorType::MemoryIssue,
            r"(?i)out of memory|ENOMEM|memory allocation failed",
        ),
        (
            ErrorType::ConfigurationError,
            r"(?i)configuration error|invalid configuration|config file not found",
        ),
    ]
    .into_iter()
    .map(|(error_type, pattern)| {
        (
            error_type,
            Regex::new(pattern).expect("failure pattern must compile"),
        )
    })
    .collect()
});

static MISSING_MODULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)cannot find module ['"]([^'"]+)['"]"#).expect("module pattern must compile")
});

/// Outcome of one external command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResult {
    pub command: String,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_secs: f64,
    pub success: bool,
    pub error_type: Option<ErrorType>,
    pub recommendations: Vec<String>,
    pub dependencies_affected: Vec<String>,
    pub severity: Severity,
}

impl CommandResult {
    pub fn error_type_label(&self) -> &'static str {
        self.error_type.map_or("unknown", ErrorType::as_str)
    }

    fn failed(
        command: String,
        stderr: String,
        elapsed: Duration,
        error_type: ErrorType,
        recommendations: &[&str],
        severity: Severity,
    ) -> Self {
        Self {
            command,
            return_code: -1,
            stdout: String::new(),
            stderr,
            execution_time_secs: elapsed.as_secs_f64(),
            success: false,
            error_type: Some(error_type),
            recommendations: to_strings(recommendations),
            dependencies_affected: Vec::new(),
            severity,
        }
    }
}

/// Classify a failure from its stderr
pub fn classify_failure(stderr: &str) -> Option<ErrorType> {
    FAILURE_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(stderr))
        .map(|(error_type, _)| *error_type)
}

/// Build a classified result from a finished process (pure function)
pub fn analyze_output(
    command: &str,
    return_code: i32,
    stdout: String,
    stderr: String,
    elapsed: Duration,
) -> CommandResult {
    let success = return_code == 0;
    let mut error_type = None;
    let mut recommendations = Vec::new();
    let mut dependencies_affected = Vec::new();
    let mut severity = Severity::Low;

    if !success {
        error_type = classify_failure(&stderr);
        match error_type {
            Some(kind) => {
                severity = kind.severity();
                recommendations = to_strings(kind.recommendations());
                if kind == ErrorType::DependencyMissing {
                    dependencies_affected = MISSING_MODULE
                        .captures_iter(&stderr)
                        .map(|caps| caps[1].to_string())
                        .collect();
                }
            }
            None => recommendations = to_strings(GENERIC_RECOMMENDATIONS),
        }
    }

    CommandResult {
        command: command.to_string(),
        return_code,
        stdout,
        stderr,
        execution_time_secs: elapsed.as_secs_f64(),
        success,
        error_type,
        recommendations,
        dependencies_affected,
        severity,
    }
}

/// Runs external commands and keeps their history
#[derive(Debug)]
pub struct ExternalCommandExecutor {
    working_dir: Option<PathBuf>,
    default_timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
    history: Vec<CommandResult>,
}

impl ExternalCommandExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            working_dir: None,
            default_timeout,
            metrics: None,
            history: Vec::new(),
        }
    }

    pub fn with_working_dir(mut self, working_dir: PathBuf) -> Self {
        self.working_dir = Some(working_dir);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn history(&self) -> &[CommandResult] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Run a command with the default timeout
    pub async fn execute<S: AsRef<str>>(&mut self, argv: &[S]) -> CommandResult {
        self.execute_with_timeout(argv, self.default_timeout).await
    }

    pub async fn execute_with_timeout<S: AsRef<str>>(
        &mut self,
        argv: &[S],
        timeout: Duration,
    ) -> CommandResult {
        let parts: Vec<&str> = argv.iter().map(AsRef::as_ref).collect();
        let command_line = parts.join(" ");
        let span = crate::command_span!(command = %command_line);

        let result = self
            .run_process(&parts, command_line.clone(), timeout)
            .instrument(span)
            .await;

        if result.success {
            info!(command = %result.command, "Command succeeded");
        } else {
            warn!(
                command = %result.command,
                return_code = result.return_code,
                error_type = result.error_type_label(),
                stderr = %truncate_chars(&result.stderr, 200),
                "Command failed"
            );
        }

        if let Some(metrics) = &self.metrics {
            metrics.command_executed(result.success);
        }
        self.history.push(result.clone());
        result
    }

    async fn run_process(
        &self,
        parts: &[&str],
        command_line: String,
        timeout: Duration,
    ) -> CommandResult {
        let started = Instant::now();
        let Some((program, args)) = parts.split_first() else {
            return CommandResult::failed(
                command_line,
                "Empty command".to_string(),
                started.elapsed(),
                ErrorType::ExecutionError,
                ErrorType::ExecutionError.recommendations(),
                Severity::Medium,
            );
        };

        info!(command = %command_line, "Executing command");
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandResult::failed(
                    command_line,
                    e.to_string(),
                    started.elapsed(),
                    ErrorType::ExecutionError,
                    ErrorType::ExecutionError.recommendations(),
                    Severity::Medium,
                )
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => analyze_output(
                &command_line,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
                started.elapsed(),
            ),
            Ok(Err(e)) => CommandResult::failed(
                command_line,
                e.to_string(),
                started.elapsed(),
                ErrorType::ExecutionError,
                ErrorType::ExecutionError.recommendations(),
                Severity::Medium,
            ),
            Err(_) => CommandResult::failed(
                command_line,
                format!("Command timed out after {} seconds", timeout.as_secs()),
                started.elapsed(),
                ErrorType::Timeout,
                TIMEOUT_RECOMMENDATIONS,
                Severity::High,
            ),
        }
    }

    /// Summarise every failed command seen so far
    pub fn failure_summary(&self) -> FailureSummary {
        summarize_failures(&self.history)
    }
}

/// Aggregate view over failed commands
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FailureSummary {
    NoFailures { message: String },
    FailuresDetected(FailureReport),
}

impl FailureSummary {
    pub fn report(&self) -> Option<&FailureReport> {
        match self {
            FailureSummary::NoFailures { .. } => None,
            FailureSummary::FailuresDetected(report) => Some(report),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailureReport {
    pub total_failures: usize,
    pub critical_failures: usize,
    pub failures_by_type: BTreeMap<String, usize>,
    pub recommendations: Vec<String>,
    pub critical_issues: Vec<CriticalIssue>,
    pub all_failures: Vec<FailureEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CriticalIssue {
    pub command: String,
    pub error_type: Option<ErrorType>,
    pub severity: Severity,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailureEntry {
    pub command: String,
    pub return_code: i32,
    pub error_type: Option<ErrorType>,
    pub severity: Severity,
    pub stderr: String,
}

/// Build a failure summary over a command history (pure function)
pub fn summarize_failures(history: &[CommandResult]) -> FailureSummary {
    let failures: Vec<&CommandResult> = history.iter().filter(|cmd| !cmd.success).collect();
    if failures.is_empty() {
        return FailureSummary::NoFailures {
            message: "All commands executed successfully".to_string(),
        };
    }

    let mut failures_by_type = BTreeMap::new();
    for failure in &failures {
        *failures_by_type
            .entry(failure.error_type_label().to_string())
            .or_insert(0) += 1;
    }

    let critical_issues: Vec<CriticalIssue> = failures
        .iter()
        .filter(|f| f.severity.is_critical())
        .map(|f| CriticalIssue {
            command: f.command.clone(),
            error_type: f.error_type,
            severity: f.severity,
            recommendations: f.recommendations.clone(),
        })
        .collect();

    FailureSummary::FailuresDetected(FailureReport {
        total_failures: failures.len(),
        critical_failures: critical_issues.len(),
        failures_by_type,
        recommendations: dedup_preserving_order(
            failures.iter().flat_map(|f| f.recommendations.iter().cloned()),
        ),
        critical_issues,
        all_failures: failures
            .iter()
            .map(|f| FailureEntry {
                command: f.command.clone(),
                return_code: f.return_code,
                error_type: f.error_type,
                severity: f.severity,
                stderr: truncate_chars(&f.stderr, STDERR_SUMMARY_LIMIT),
            })
            .collect(),
    })
}

/// Remove duplicates while keeping first-seen order
pub fn dedup_preserving_order<I: IntoIterator<Item = String>>(items: I) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
