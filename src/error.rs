//! Error types for the frame orchestrator
//!
//! `FrameworkError` is what scaffold runs and the CLI surface. Everything that
//! ends up in a report file goes through [`sanitize_error_message`] first.

use crate::pipeline::stage::Stage;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Upper bound for messages written to reports
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Main error type for orchestrator operations
#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("Frame '{frame_id}' failed: {message}")]
    FrameFailed { frame_id: String, message: String },

    #[error("Stage {stage} failed: {message}")]
    StageFailed { stage: Stage, message: String },

    #[error("Scaffold not found: {id}")]
    UnknownScaffold { id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Run aborted: {reason}")]
    Aborted { reason: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("Frame error: {0}")]
    FrameError(#[from] crate::frames::FrameError),

    #[error("Context error: {0}")]
    ContextError(#[from] crate::context::ContextError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameworkError {
    /// Create frame failure error
    pub fn frame_failed<S: Into<String>>(frame_id: &str, message: S) -> Self {
        Self::FrameFailed {
            frame_id: frame_id.to_string(),
            message: message.into(),
        }
    }

    /// Create stage failure error
    pub fn stage_failed<S: Into<String>>(stage: Stage, message: S) -> Self {
        Self::StageFailed {
            stage,
            message: message.into(),
        }
    }

    pub fn unknown_scaffold(id: &str) -> Self {
        Self::UnknownScaffold { id: id.to_string() }
    }

    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn aborted<S: Into<String>>(reason: S) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Short machine-readable category used in failure reports
    pub fn kind(&self) -> &'static str {
        match self {
            FrameworkError::FrameFailed { .. } => "frame_failed",
            FrameworkError::StageFailed { .. } => "stage_failed",
            FrameworkError::UnknownScaffold { .. } => "unknown_scaffold",
            FrameworkError::InvalidInput { .. } => "invalid_input",
            FrameworkError::Aborted { .. } => "aborted",
            FrameworkError::InternalError { .. } => "internal_error",
            FrameworkError::ConfigError(_) => "config_error",
            FrameworkError::FrameError(_) => "frame_error",
            FrameworkError::ContextError(_) => "context_error",
            FrameworkError::Io(_) => "io_error",
            FrameworkError::Json(_) => "json_error",
        }
    }

    /// Message safe to persist in a report
    pub fn report_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern must compile")
});

static SENSITIVE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern must compile")
});

/// Redact secrets and sensitive paths, cap the length at [`MAX_ERROR_MESSAGE_LEN`] bytes
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_ASSIGNMENT.replace_all(message, "${1}=***");
    let mut sanitized = SENSITIVE_PATH
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for orchestrator operations
pub type FrameworkResult<T> = Result<T, FrameworkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_failed_constructor() {
        let error = FrameworkError::frame_failed("audit", "exit status 1");
        assert!(matches!(error, FrameworkError::FrameFailed { .. }));
        assert_eq!(error.to_string(), "Frame 'audit' failed: exit status 1");
        assert_eq!(error.kind(), "frame_failed");
    }

    #[test]
    fn test_stage_failed_constructor() {
        let error = FrameworkError::stage_failed(Stage::Plan, "critical frame failed");
        assert_eq!(error.to_string(), "Stage PLAN failed: critical frame failed");
    }

    #[test]
    fn test_invalid_input_constructor() {
        let error = FrameworkError::invalid_input("missing field");
        assert_eq!(error.to_string(), "Invalid input: missing field");
    }

    #[test]
    fn test_internal_error_constructor() {
        let error = FrameworkError::internal_error("unexpected state");
        assert_eq!(error.to_string(), "Internal error: unexpected state");
        assert_eq!(error.kind(), "internal_error");
    }

    #[test]
    fn test_unknown_scaffold() {
        let error = FrameworkError::unknown_scaffold("ghost");
        assert_eq!(error.to_string(), "Scaffold not found: ghost");
    }

    #[test]
    fn test_from_frame_error() {
        let error: FrameworkError = crate::frames::FrameError::NoResponse.into();
        assert_eq!(error.kind(), "frame_error");
    }

    #[test]
    fn test_report_message_is_sanitized() {
        let error = FrameworkError::internal_error("Failed to authenticate: password=secret123");
        let message = error.report_message();
        assert!(!message.contains("secret123"));
        assert!(message.contains("password=***"));
    }

    #[test]
    fn test_sanitize_multiple_secrets() {
        let message = "Auth failed: password=pass1 api_key=key123 secret=hidden token=tok456";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("pass1"));
        assert!(!sanitized.contains("key123"));
        assert!(!sanitized.contains("hidden"));
        assert!(!sanitized.contains("tok456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("key=***"));
    }

    #[test]
    fn test_sanitize_with_colons() {
        let sanitized = sanitize_error_message("password: secret123 token: abc456");
        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
    }

    #[test]
    fn test_file_path_redaction() {
        let message = "Failed to read /home/user/.ssh/id_rsa and /etc/secrets/api.key";
        let sanitized = sanitize_error_message(message);

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("/home/user/.ssh/id_rsa"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_exactly_500_chars() {
        let sanitized = sanitize_error_message(&"x".repeat(500));
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= MAX_ERROR_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    proptest! {
        #[test]
        fn prop_sanitized_length_is_bounded(message in ".{0,2000}") {
            let sanitized = sanitize_error_message(&message);
            prop_assert!(sanitized.len() <= MAX_ERROR_MESSAGE_LEN);
        }

        #[test]
        fn prop_password_values_never_survive(value in "[a-zA-Z0-9]{6,20}") {
            let message = format!("login failed password={value}");
            let sanitized = sanitize_error_message(&message);
            let leaked = format!("={value}");
            prop_assert!(!sanitized.contains(&leaked));
        }
    }
}
