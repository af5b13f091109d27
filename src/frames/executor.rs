//! Frame executor with retries and context preservation

use crate::context::{ContextStore, FrameContextRecord};
use crate::frames::{criteria, Frame, FrameError, FrameOutput, FrameRunner};
use crate::observability::MetricsCollector;
use crate::pipeline::stage::Stage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Instrument};

/// Everything a frame attempt can see
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub stage: Stage,
    pub frame: Frame,
    pub input_data: Value,
    /// Results of earlier stages keyed by `stage_<n>`
    pub previous_results: Map<String, Value>,
    pub parameters: Map<String, Value>,
    /// Context saved by the previous run of the same scaffold
    pub preserved_context: Option<Value>,
    pub attempt_count: u32,
    pub max_attempts: u32,
}

impl ExecutionContext {
    pub fn new(
        stage: Stage,
        frame: Frame,
        input_data: Value,
        previous_results: Map<String, Value>,
        preserved_context: Option<Value>,
        max_attempts: u32,
    ) -> Self {
        let parameters = frame.parameters.clone();
        Self {
            stage,
            frame,
            input_data,
            previous_results,
            parameters,
            preserved_context,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
        }
    }
}

/// One entry of the executor history, one per attempt
#[derive(Debug, Clone, Serialize)]
pub struct FrameExecutionRecord {
    pub frame_id: String,
    pub stage: u8,
    pub attempt: u32,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FrameOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs frames through a [`FrameRunner`], validating and retrying them
pub struct FrameExecutor {
    runner: Arc<dyn FrameRunner>,
    context_store: Arc<ContextStore>,
    metrics: Arc<MetricsCollector>,
    history: Vec<FrameExecutionRecord>,
}

impl FrameExecutor {
    pub fn new(
        runner: Arc<dyn FrameRunner>,
        context_store: Arc<ContextStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            runner,
            context_store,
            metrics,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[FrameExecutionRecord] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Execute a frame, retrying until it succeeds or `max_attempts` is reached
    ///
    /// The error of the final attempt is returned.
    pub async fn execute_frame(
        &mut self,
        mut context: ExecutionContext,
    ) -> Result<FrameOutput, FrameError> {
        let span = crate::frame_span!(
            frame_id = %context.frame.id,
            stage = %context.stage
        );

        async move {
            let preserved_items = context
                .preserved_context
                .as_ref()
                .and_then(Value::as_object)
                .map_or(0, |m| m.len());

            loop {
                info!(
                    frame = %context.frame.name,
                    attempt = context.attempt_count + 1,
                    max_attempts = context.max_attempts,
                    preserved_items,
                    "Executing frame"
                );

                let started = Instant::now();
                let outcome = self.attempt(&context).await;
                let elapsed = started.elapsed();

                match outcome {
                    Ok(result) => {
                        self.metrics.frame_executed(&context.frame.id, elapsed, true);
                        if context.frame.context_preservation {
                            self.preserve_frame_context(&context, &result);
                        }
                        self.record(&context, elapsed, Ok(&result));
                        info!(frame = %context.frame.name, "Frame executed successfully");
                        return Ok(result);
                    }
                    Err(err) => {
                        self.metrics.frame_executed(&context.frame.id, elapsed, false);
                        if matches!(err, FrameError::Timeout(_)) {
                            self.metrics.frame_timeout(&context.frame.id);
                        }
                        self.record(&context, elapsed, Err(&err));

                        if context.attempt_count + 1 < context.max_attempts {
                            warn!(frame = %context.frame.name, error = %err, "Frame failed, retrying");
                            self.metrics.frame_retried();
                            context.attempt_count += 1;
                            continue;
                        }

                        error!(
                            frame = %context.frame.name,
                            error = %err,
                            "Max attempts reached for frame"
                        );
                        return Err(err);
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, context: &ExecutionContext) -> Result<FrameOutput, FrameError> {
        if let Some(schema) = &context.frame.input_schema {
            validate_input(schema, &context.input_data)?;
        }

        let result = self.runner.run(context).await?;
        criteria::validate(&result, &context.frame.success_criteria)?;
        Ok(result)
    }

    fn preserve_frame_context(&self, context: &ExecutionContext, result: &FrameOutput) {
        let record = FrameContextRecord {
            frame_id: context.frame.id.clone(),
            stage: context.stage.number(),
            input_data: context.input_data.clone(),
            parameters: context.parameters.clone(),
            result: result.clone(),
            timestamp: Utc::now(),
        };

        // A frame that ran fine is not failed because its context could not be written
        if let Err(e) = self.context_store.save_frame(&record) {
            warn!(frame_id = %context.frame.id, error = %e, "Failed to preserve frame context");
        }
    }

    fn record(
        &mut self,
        context: &ExecutionContext,
        elapsed: std::time::Duration,
        outcome: Result<&FrameOutput, &FrameError>,
    ) {
        let (success, result, error) = match outcome {
            Ok(result) => (true, Some(result.clone()), None),
            Err(err) => (false, None, Some(err.to_string())),
        };

        self.history.push(FrameExecutionRecord {
            frame_id: context.frame.id.clone(),
            stage: context.stage.number(),
            attempt: context.attempt_count + 1,
            success,
            timestamp: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
            result,
            error,
        });
    }
}

/// Validate scaffold input against a frame's JSON Schema
fn validate_input(schema: &Value, input: &Value) -> Result<(), FrameError> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| FrameError::InvalidInput(format!("Schema compilation error: {e}")))?;

    validator.validate(input).map_err(|errors| {
        let error_messages: Vec<String> = errors
            .map(|e| format!("At '{}': {}", e.instance_path, e))
            .collect();
        FrameError::InvalidInput(error_messages.join("; "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::ScriptedRunner;
    use serde_json::json;

    fn executor_with(runner: ScriptedRunner, dir: &std::path::Path) -> FrameExecutor {
        FrameExecutor::new(
            Arc::new(runner),
            Arc::new(ContextStore::new(dir.to_path_buf())),
            Arc::new(MetricsCollector::new()),
        )
    }

    fn context_for(frame: Frame, max_attempts: u32) -> ExecutionContext {
        ExecutionContext::new(
            Stage::Scope,
            frame,
            json!({"scope": "full"}),
            Map::new(),
            None,
            max_attempts,
        )
    }

    #[tokio::test]
    async fn test_successful_frame_is_recorded_and_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().respond("audit", json!({"audit_complete": true}));
        let mut executor = executor_with(runner, dir.path());

        let mut frame = Frame::new("audit", "Audit", "audit.py");
        frame
            .success_criteria
            .insert("audit_complete".to_string(), json!(true));

        let result = executor.execute_frame(context_for(frame, 2)).await.unwrap();
        assert_eq!(result.get("audit_complete"), Some(&json!(true)));

        assert_eq!(executor.history().len(), 1);
        assert!(executor.history()[0].success);
        assert!(dir.path().join("audit_1_context.json").exists());
    }

    #[tokio::test]
    async fn test_frame_runs_with_preserved_context() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().respond("audit", json!({"ok": true}));
        let mut executor = executor_with(runner, dir.path());

        let mut context = context_for(Frame::new("audit", "Audit", "audit.py"), 1);
        context.preserved_context = Some(json!({"findings": {"xss": 1}, "run_id": "r1"}));

        let result = executor.execute_frame(context).await.unwrap();
        assert_eq!(result.get("ok"), Some(&json!(true)));
        assert!(executor.history()[0].success);
    }

    #[tokio::test]
    async fn test_failed_attempt_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .fail_once("flaky", "transient")
            .respond("flaky", json!({"ok": true}));
        let mut executor = executor_with(runner, dir.path());

        let result = executor
            .execute_frame(context_for(Frame::new("flaky", "Flaky", "f.py"), 2))
            .await
            .unwrap();
        assert_eq!(result.get("ok"), Some(&json!(true)));

        let history = executor.history();
        assert_eq!(history.len(), 2);
        assert!(!history[0].success);
        assert_eq!(history[0].attempt, 1);
        assert!(history[1].success);
        assert_eq!(history[1].attempt, 2);
    }

    #[tokio::test]
    async fn test_criteria_failure_exhausts_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().respond("strict", json!({"done": false}));
        let mut executor = executor_with(runner, dir.path());

        let mut frame = Frame::new("strict", "Strict", "s.py");
        frame.success_criteria.insert("done".to_string(), json!(true));

        let err = executor.execute_frame(context_for(frame, 3)).await.unwrap_err();
        assert!(matches!(err, FrameError::CriteriaNotMet(_)));
        assert_eq!(executor.history().len(), 3);
        assert!(executor.history().iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn test_context_not_preserved_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().respond("quiet", json!({}));
        let mut executor = executor_with(runner, dir.path());

        let mut frame = Frame::new("quiet", "Quiet", "q.py");
        frame.context_preservation = false;

        executor.execute_frame(context_for(frame, 1)).await.unwrap();
        assert!(!dir.path().join("quiet_1_context.json").exists());
    }

    #[tokio::test]
    async fn test_input_schema_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().respond("typed", json!({}));
        let mut executor = executor_with(runner, dir.path());

        let mut frame = Frame::new("typed", "Typed", "t.py");
        frame.input_schema = Some(json!({
            "type": "object",
            "properties": {"scope": {"type": "integer"}},
            "required": ["scope"]
        }));

        let err = executor.execute_frame(context_for(frame, 1)).await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidInput(_)));
    }

    #[test]
    fn test_max_attempts_floor_is_one() {
        let ctx = context_for(Frame::new("x", "X", "x.py"), 0);
        assert_eq!(ctx.max_attempts, 1);
    }
}
