//! Diagnostics over failed external commands

use super::{dedup_preserving_order, CommandResult, Severity};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

static NPM_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"npm run ([a-zA-Z0-9-]+)").expect("npm pattern must compile"));

/// Why a `git commit` failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitFailureKind {
    PreCommitHook,
    NoChanges,
    GitConfig,
    Unknown,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommitFailureAnalysis {
    pub failure_type: CommitFailureKind,
    pub failed_commands: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Inspect a failed commit
///
/// Both output streams are searched: git prints "nothing to commit" on stdout.
pub fn analyze_commit_failure(result: &CommandResult) -> CommitFailureAnalysis {
    let output = format!("{}\n{}", result.stderr, result.stdout).to_lowercase();
    let mut failed_commands = Vec::new();
    let mut recommendations: Vec<String> = Vec::new();

    let failure_type = if ["husky", "lint-staged", "pre-commit"]
        .iter()
        .any(|marker| output.contains(marker))
    {
        recommendations.extend(
            [
                "Pre-commit hooks failed - this is likely due to linting/formatting issues",
                "Check the specific lint-staged commands that failed",
                "Review package.json lint-staged configuration",
                "Consider running lint-staged commands manually to identify issues",
            ]
            .map(String::from),
        );

        if output.contains("eslint") {
            failed_commands.push("eslint --fix".to_string());
        }
        if output.contains("prettier") {
            failed_commands.push("prettier --write".to_string());
        }
        failed_commands.extend(
            NPM_RUN
                .captures_iter(&output)
                .map(|caps| format!("npm run {}", &caps[1])),
        );
        failed_commands = dedup_preserving_order(failed_commands);

        if !failed_commands.is_empty() {
            recommendations.push(format!("Failed commands: {}", failed_commands.join(", ")));
        }
        CommitFailureKind::PreCommitHook
    } else if output.contains("nothing to commit") {
        recommendations
            .push("No changes to commit - this is normal if no files were modified".to_string());
        CommitFailureKind::NoChanges
    } else if output.contains("author identity") {
        recommendations.extend(
            [
                "Git author identity not configured",
                "Run: git config --global user.name 'Your Name'",
                "Run: git config --global user.email 'your.email@example.com'",
            ]
            .map(String::from),
        );
        CommitFailureKind::GitConfig
    } else {
        CommitFailureKind::Unknown
    };

    CommitFailureAnalysis {
        failure_type,
        failed_commands,
        recommendations,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryEntry {
    pub command: String,
    pub severity: Severity,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImpactEntry {
    pub command: String,
    pub reason: String,
    pub impact: String,
}

/// Split between failures that block version control and those that do not
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct OrphanAnalysis {
    pub orphans: Vec<ImpactEntry>,
    pub blockers: Vec<ImpactEntry>,
    pub orphan_count: usize,
    pub blocker_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DependencyFailure {
    pub command: String,
    pub dependencies: Vec<String>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DependencyImpact {
    pub affected_dependencies: Vec<String>,
    pub dependency_failures: Vec<DependencyFailure>,
    pub total_affected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionItem {
    pub priority: Priority,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub recommendations: Vec<String>,
    pub estimated_effort: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiagnosticReport {
    pub timestamp: DateTime<Utc>,
    pub total_failures: usize,
    pub failure_categories: BTreeMap<String, Vec<CategoryEntry>>,
    pub orphan_analysis: OrphanAnalysis,
    pub dependency_impact: DependencyImpact,
    pub recommendations: Vec<String>,
    pub action_items: Vec<ActionItem>,
}

/// Full diagnostic pass over a set of failures
pub fn diagnose(failures: &[CommandResult]) -> DiagnosticReport {
    let mut failure_categories: BTreeMap<String, Vec<CategoryEntry>> = BTreeMap::new();
    for failure in failures {
        failure_categories
            .entry(failure.error_type_label().to_string())
            .or_default()
            .push(CategoryEntry {
                command: failure.command.clone(),
                severity: failure.severity,
                recommendations: failure.recommendations.clone(),
            });
    }

    let orphan_analysis = analyze_orphans(failures);
    let dependency_impact = analyze_dependency_impact(failures);
    let action_items = generate_action_items(failures, &orphan_analysis, &dependency_impact);

    DiagnosticReport {
        timestamp: Utc::now(),
        total_failures: failures.len(),
        failure_categories,
        orphan_analysis,
        dependency_impact,
        recommendations: dedup_preserving_order(
            failures.iter().flat_map(|f| f.recommendations.iter().cloned()),
        ),
        action_items,
    }
}

/// Code quality tool failures are orphans; git and unknown commands block
pub fn analyze_orphans(failures: &[CommandResult]) -> OrphanAnalysis {
    let mut analysis = OrphanAnalysis::default();

    for failure in failures {
        let command = &failure.command;
        if command.starts_with("npm run") || command.contains("eslint") || command.contains("prettier")
        {
            analysis.orphans.push(ImpactEntry {
                command: command.clone(),
                reason: "Non-blocking tool failure".to_string(),
                impact: "Code quality tools failed but core operations may continue".to_string(),
            });
        } else if command.starts_with("git") {
            analysis.blockers.push(ImpactEntry {
                command: command.clone(),
                reason: "Core git operation failure".to_string(),
                impact: "Blocks version control operations".to_string(),
            });
        } else {
            analysis.blockers.push(ImpactEntry {
                command: command.clone(),
                reason: "Unknown command type".to_string(),
                impact: "May block operations".to_string(),
            });
        }
    }

    analysis.orphan_count = analysis.orphans.len();
    analysis.blocker_count = analysis.blockers.len();
    analysis
}

pub fn analyze_dependency_impact(failures: &[CommandResult]) -> DependencyImpact {
    let mut affected = BTreeSet::new();
    let mut dependency_failures = Vec::new();

    for failure in failures.iter().filter(|f| !f.dependencies_affected.is_empty()) {
        affected.extend(failure.dependencies_affected.iter().cloned());
        dependency_failures.push(DependencyFailure {
            command: failure.command.clone(),
            dependencies: failure.dependencies_affected.clone(),
            severity: failure.severity,
        });
    }

    DependencyImpact {
        total_affected: affected.len(),
        affected_dependencies: affected.into_iter().collect(),
        dependency_failures,
    }
}

fn generate_action_items(
    failures: &[CommandResult],
    orphans: &OrphanAnalysis,
    dependencies: &DependencyImpact,
) -> Vec<ActionItem> {
    let mut items: Vec<ActionItem> = failures
        .iter()
        .filter(|f| f.severity.is_critical())
        .map(|f| ActionItem {
            priority: Priority::High,
            kind: "fix".to_string(),
            description: format!("Fix {} in {}", f.error_type_label(), f.command),
            recommendations: f.recommendations.clone(),
            estimated_effort: "medium".to_string(),
        })
        .collect();

    if dependencies.total_affected > 0 {
        items.push(ActionItem {
            priority: Priority::Medium,
            kind: "dependency".to_string(),
            description: format!(
                "Resolve {} dependency issues",
                dependencies.total_affected
            ),
            recommendations: ["Run npm install", "Check package.json", "Verify Node.js version"]
                .map(String::from)
                .to_vec(),
            estimated_effort: "low".to_string(),
        });
    }

    if orphans.orphan_count > 0 {
        items.push(ActionItem {
            priority: Priority::Low,
            kind: "quality".to_string(),
            description: format!("Address {} code quality issues", orphans.orphan_count),
            recommendations: [
                "Run eslint --fix",
                "Run prettier --write",
                "Check linting configuration",
            ]
            .map(String::from)
            .to_vec(),
            estimated_effort: "low".to_string(),
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::analyze_output;
    use std::time::Duration;

    fn failed(command: &str, stdout: &str, stderr: &str) -> CommandResult {
        analyze_output(
            command,
            1,
            stdout.to_string(),
            stderr.to_string(),
            Duration::ZERO,
        )
    }

    #[test]
    fn test_pre_commit_hook_failure() {
        let result = failed(
            "git commit -m update",
            "",
            "husky > pre-commit hook failed\nlint-staged: eslint found problems\nnpm run lint-fix exited 1",
        );
        let analysis = analyze_commit_failure(&result);
        assert_eq!(analysis.failure_type, CommitFailureKind::PreCommitHook);
        assert_eq!(
            analysis.failed_commands,
            vec!["eslint --fix", "npm run lint-fix"]
        );
        assert!(analysis
            .recommendations
            .last()
            .unwrap()
            .starts_with("Failed commands:"));
    }

    #[test]
    fn test_nothing_to_commit_on_stdout() {
        let result = failed(
            "git commit -m update",
            "On branch main\nnothing to commit, working tree clean",
            "",
        );
        let analysis = analyze_commit_failure(&result);
        assert_eq!(analysis.failure_type, CommitFailureKind::NoChanges);
        assert_eq!(analysis.recommendations.len(), 1);
    }

    #[test]
    fn test_author_identity_failure() {
        let result = failed("git commit", "", "*** Please tell me who you are.\nfatal: unable to auto-detect email address\nAuthor identity unknown");
        let analysis = analyze_commit_failure(&result);
        assert_eq!(analysis.failure_type, CommitFailureKind::GitConfig);
        assert_eq!(analysis.recommendations.len(), 3);
    }

    #[test]
    fn test_unknown_commit_failure() {
        let analysis = analyze_commit_failure(&failed("git commit", "", "boom"));
        assert_eq!(analysis.failure_type, CommitFailureKind::Unknown);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn test_orphans_and_blockers() {
        let failures = vec![
            failed("npm run lint", "", "x"),
            failed("npx prettier --check .", "", "x"),
            failed("git push", "", "rejected"),
            failed("docker build .", "", "x"),
        ];
        let analysis = analyze_orphans(&failures);
        assert_eq!(analysis.orphan_count, 2);
        assert_eq!(analysis.blocker_count, 2);
        assert_eq!(analysis.blockers[0].reason, "Core git operation failure");
        assert_eq!(analysis.blockers[1].reason, "Unknown command type");
    }

    #[test]
    fn test_diagnose_builds_prioritised_action_items() {
        let failures = vec![
            failed("node build.js", "", "Error: Cannot find module 'chalk'"),
            failed("npm run lint", "", "lint errors"),
            failed("git push", "", "rejected"),
        ];
        let report = diagnose(&failures);

        assert_eq!(report.total_failures, 3);
        assert_eq!(report.failure_categories["dependency_missing"].len(), 1);
        assert_eq!(report.failure_categories["unknown"].len(), 2);
        assert_eq!(report.dependency_impact.affected_dependencies, vec!["chalk"]);

        let priorities: Vec<Priority> = report.action_items.iter().map(|a| a.priority).collect();
        assert_eq!(
            priorities,
            vec![Priority::High, Priority::Medium, Priority::Low]
        );
        assert_eq!(
            report.action_items[0].description,
            "Fix dependency_missing in node build.js"
        );
    }

    #[test]
    fn test_diagnose_empty() {
        let report = diagnose(&[]);
        assert_eq!(report.total_failures, 0);
        assert!(report.action_items.is_empty());
        assert!(report.recommendations.is_empty());
    }
}
