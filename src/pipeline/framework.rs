//! Scaffold pipeline
//!
//! Walks a scaffold through the ten stages, feeding every frame the results of
//! the stages before it. Critical frame failures abort the run and leave a
//! failure report behind; everything else ends in an execution report and a
//! merged context file for the next run of the same scaffold.

use crate::config::FrameworkConfig;
use crate::context::ContextStore;
use crate::error::{sanitize_error_message, FrameworkError, FrameworkResult};
use crate::external::ExternalCommandExecutor;
use crate::frames::{
    ExecutionContext, Frame, FrameExecutionRecord, FrameExecutor, FrameRegistry, FrameRunner,
    FrameSummary, Scaffold, ScaffoldSummary, ScriptRunner,
};
use crate::observability::MetricsCollector;
use crate::pipeline::audit;
use crate::pipeline::publish::publish_changes;
use crate::pipeline::result::{
    FrameResultEntry, MetaAuditOutcome, RetryOutcome, StageRecord, StageResult, StageStatus,
};
use crate::pipeline::stage::Stage;
use crate::report::{
    build_recommendations, log_summary, ContextPreservationSummary, ExecutionReport,
    ExecutionSummary, ExternalCommandAnalysis, FailureReportFile, ReportMetadata, ReportWriter,
    REPORT_VERSION,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Stages re-run by SuccessContinue when an earlier stage was unsuccessful
const RETRY_STAGES: [Stage; 3] = [Stage::IdentifyAnalyze, Stage::Plan, Stage::Implement];

/// Result of a completed scaffold run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub report: ExecutionReport,
    pub report_path: PathBuf,
    /// `None` when the scaffold does not preserve context
    pub context_path: Option<PathBuf>,
}

/// Mutable state of one scaffold run
#[derive(Debug)]
struct RunState {
    run_id: Uuid,
    scaffold_id: String,
    input_data: Value,
    previous_results: Map<String, Value>,
    preserved_context: Option<Value>,
    start_time: DateTime<Utc>,
    execution_log: Vec<StageRecord>,
}

impl RunState {
    fn new(scaffold_id: &str, input_data: Value, preserved_context: Option<Value>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scaffold_id: scaffold_id.to_string(),
            input_data,
            previous_results: Map::new(),
            preserved_context,
            start_time: Utc::now(),
            execution_log: Vec::new(),
        }
    }

    fn record(&mut self, stage: Stage, result: StageResult) -> FrameworkResult<()> {
        self.previous_results
            .insert(stage.result_key(), serde_json::to_value(&result)?);
        self.execution_log.push(StageRecord::new(result));
        Ok(())
    }

    /// Swap in the result of a re-run stage
    fn replace(&mut self, stage: Stage, result: StageResult) -> FrameworkResult<()> {
        self.previous_results
            .insert(stage.result_key(), serde_json::to_value(&result)?);
        let mut record = StageRecord::new(result);
        record.retried = true;
        match self
            .execution_log
            .iter_mut()
            .find(|r| r.stage == stage.number())
        {
            Some(existing) => *existing = record,
            None => self.execution_log.push(record),
        }
        Ok(())
    }

    /// Context handed to the next run; the loaded context is left out so runs do not nest
    fn persistable_context(&self) -> Value {
        let mut context = json!({
            "scaffold_id": self.scaffold_id,
            "run_id": self.run_id.to_string(),
            "input_data": self.input_data,
            "previous_results": self.previous_results,
            "start_time": self.start_time.to_rfc3339(),
            "end_time": Utc::now().to_rfc3339(),
        });
        if let Value::Object(map) = &mut context {
            map.extend(collect_learnings(&self.execution_log));
        }
        context
    }

    fn failure_context(&self) -> Value {
        json!({
            "scaffold_id": self.scaffold_id,
            "run_id": self.run_id.to_string(),
            "input_data": self.input_data,
            "previous_results": self.previous_results,
            "preserved_context": self.preserved_context,
            "start_time": self.start_time.to_rfc3339(),
        })
    }
}

/// Gather `recommendations`, `action_items` and `findings` reported by successful frames
fn collect_learnings(log: &[StageRecord]) -> Map<String, Value> {
    let mut recommendations = Vec::new();
    let mut action_items = Vec::new();
    let mut findings = Map::new();

    let outputs = log
        .iter()
        .flat_map(|record| record.result.results.iter())
        .filter_map(|entry| entry.result.as_ref());

    for output in outputs {
        if let Some(Value::Array(items)) = output.get("recommendations") {
            recommendations.extend(items.iter().cloned());
        }
        if let Some(Value::Array(items)) = output.get("action_items") {
            action_items.extend(items.iter().cloned());
        }
        if let Some(Value::Object(found)) = output.get("findings") {
            findings.extend(found.clone());
        }
    }

    let mut learnings = Map::new();
    if !recommendations.is_empty() {
        learnings.insert("recommendations".to_string(), Value::Array(recommendations));
    }
    if !action_items.is_empty() {
        learnings.insert("action_items".to_string(), Value::Array(action_items));
    }
    if !findings.is_empty() {
        learnings.insert("findings".to_string(), Value::Object(findings));
    }
    learnings
}

/// Orchestrates scaffold runs
pub struct FramePipeline {
    registry: FrameRegistry,
    executor: FrameExecutor,
    external: ExternalCommandExecutor,
    context_store: Arc<ContextStore>,
    reports: ReportWriter,
    metrics: Arc<MetricsCollector>,
    max_attempts: u32,
    skip_push: bool,
}

impl FramePipeline {
    /// Build a pipeline that runs frames as subprocesses
    pub fn from_config(config: &FrameworkConfig) -> FrameworkResult<Self> {
        let runner = ScriptRunner::new(
            config.runtimes.clone(),
            config.resolved_working_dir()?,
            Duration::from_secs(config.framework.frame_timeout_secs),
        );
        Self::with_runner(config, Arc::new(runner))
    }

    /// Build a pipeline around any frame runner
    pub fn with_runner(
        config: &FrameworkConfig,
        runner: Arc<dyn FrameRunner>,
    ) -> FrameworkResult<Self> {
        let registry = FrameRegistry::from_config(config)?;
        let working_dir = config.resolved_working_dir()?;
        let context_store = Arc::new(ContextStore::new(
            config.resolve_dir(&config.framework.context_dir)?,
        ));
        let reports = ReportWriter::new(config.resolve_dir(&config.framework.reports_dir)?);
        let metrics = Arc::new(MetricsCollector::new());

        let executor = FrameExecutor::new(runner, Arc::clone(&context_store), Arc::clone(&metrics));
        let external =
            ExternalCommandExecutor::new(Duration::from_secs(config.framework.command_timeout_secs))
                .with_working_dir(working_dir)
                .with_metrics(Arc::clone(&metrics));

        Ok(Self {
            registry,
            executor,
            external,
            context_store,
            reports,
            metrics,
            max_attempts: config.framework.max_attempts,
            skip_push: config.skip_push_effective(),
        })
    }

    pub fn registry(&self) -> &FrameRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    pub fn context_store(&self) -> &ContextStore {
        &self.context_store
    }

    pub fn frame_history(&self) -> &[FrameExecutionRecord] {
        self.executor.history()
    }

    /// Force the push stage on or off regardless of configuration
    pub fn set_skip_push(&mut self, skip: bool) {
        self.skip_push = skip;
    }

    pub fn list_scaffolds(&self) -> Vec<ScaffoldSummary> {
        self.registry.list_scaffolds()
    }

    pub fn list_frames(&self) -> Vec<FrameSummary> {
        self.registry.list_frames()
    }

    /// Run a scaffold to completion
    pub async fn execute_scaffold(
        &mut self,
        scaffold_id: &str,
        input_data: Value,
    ) -> FrameworkResult<RunReport> {
        self.execute_scaffold_until(scaffold_id, input_data, std::future::pending())
            .await
    }

    /// Run a scaffold, aborting when `shutdown` resolves first
    ///
    /// An aborted run is treated like a failed one: a failure report is written
    /// and [`FrameworkError::Aborted`] returned.
    pub async fn execute_scaffold_until<F>(
        &mut self,
        scaffold_id: &str,
        input_data: Value,
        shutdown: F,
    ) -> FrameworkResult<RunReport>
    where
        F: Future<Output = ()>,
    {
        let scaffold = self
            .registry
            .scaffold(scaffold_id)
            .cloned()
            .ok_or_else(|| FrameworkError::unknown_scaffold(scaffold_id))?;

        let input_data = match input_data {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(FrameworkError::invalid_input(format!(
                    "Scaffold input must be a JSON object, got {other}"
                )))
            }
        };

        let preserved_context = if scaffold.context_preservation {
            self.load_preserved_context(scaffold_id)
        } else {
            None
        };

        let mut run = RunState::new(scaffold_id, input_data, preserved_context);
        let span = crate::scaffold_span!(scaffold_id = %scaffold.id, run_id = %run.run_id);

        self.executor.clear_history();
        self.external.clear_history();
        self.metrics.run_started();
        self.metrics.set_run_state("running");
        info!(
            parent: &span,
            scaffold = %scaffold.name,
            context_loaded = run.preserved_context.is_some(),
            "Executing scaffold"
        );

        let started = Instant::now();
        let outcome = {
            let stages = self.run_stages(&scaffold, &mut run).instrument(span.clone());
            tokio::select! {
                biased;
                _ = shutdown => Err(FrameworkError::aborted("interrupted by shutdown signal")),
                result = stages => result,
            }
        };

        match outcome {
            Ok(()) => {
                self.metrics.run_completed(started.elapsed());
                self.metrics.set_run_state("completed");
                match self.finalize(&scaffold, &run).instrument(span.clone()).await {
                    Ok(report) => Ok(report),
                    Err(err) => {
                        self.metrics.set_run_state("failed");
                        error!(parent: &span, error = %err, "Finalizing scaffold run failed");
                        self.write_failure_report(&run, &err);
                        Err(err)
                    }
                }
            }
            Err(err) => {
                self.metrics.run_failed(started.elapsed());
                self.metrics.set_run_state("failed");
                error!(parent: &span, error = %err, "Scaffold execution failed");
                self.write_failure_report(&run, &err);
                Err(err)
            }
        }
    }

    fn load_preserved_context(&self, scaffold_id: &str) -> Option<Value> {
        match self.context_store.load(scaffold_id) {
            Ok(context) => context,
            Err(e) => {
                warn!(scaffold_id, error = %e, "Ignoring unreadable preserved context");
                None
            }
        }
    }

    async fn run_stages(&mut self, scaffold: &Scaffold, run: &mut RunState) -> FrameworkResult<()> {
        for stage in Stage::ALL {
            let span = crate::stage_span!(stage = stage.number(), name = stage.name());
            let result = self
                .execute_stage(scaffold, stage, run)
                .instrument(span)
                .await?;

            if result.is_successful() {
                self.metrics.stage_completed();
            } else {
                self.metrics.stage_failed();
            }
            run.record(stage, result)?;
        }
        Ok(())
    }

    async fn execute_stage(
        &mut self,
        scaffold: &Scaffold,
        stage: Stage,
        run: &mut RunState,
    ) -> FrameworkResult<StageResult> {
        info!("Stage {}: {}", stage.number(), stage.name());
        let mut result = self.run_stage_frames(scaffold, stage, run, false).await?;

        match stage {
            Stage::SuccessContinue => {
                if let Some(retry) = self.retry_failed_stages(scaffold, run).await? {
                    result.status = StageStatus::RetryCompleted;
                    result.retry = Some(retry);
                }
            }
            Stage::MetaAudit => {
                let meta_analysis =
                    audit::analyze(&run.execution_log, run.preserved_context.as_ref());
                let report_path = self
                    .reports
                    .write_meta_analysis(&scaffold.id, &meta_analysis)?;
                info!(path = %report_path.display(), "Meta-analysis report saved");
                result.status = StageStatus::MetaAuditComplete;
                result.meta_audit = Some(MetaAuditOutcome {
                    meta_analysis,
                    report_path,
                });
            }
            Stage::PushRemote if self.skip_push => {
                info!("Skipping git push");
                self.metrics.stage_skipped();
                if result.frames_executed == 0 {
                    result.status = StageStatus::Skipped;
                }
                result.message = Some("Git push disabled".to_string());
            }
            Stage::PushRemote => {
                let outcome = publish_changes(&mut self.external).await;
                result.status = StageStatus::Published;
                result.message = Some(outcome.message.clone());
                result.publish = Some(outcome);
            }
            _ => {}
        }

        Ok(result)
    }

    /// Run the frames planned for a stage
    ///
    /// A failed critical frame records the partial stage in the execution log
    /// and fails the stage. During a retry the partial stage replaces the
    /// earlier entry for that stage.
    async fn run_stage_frames(
        &mut self,
        scaffold: &Scaffold,
        stage: Stage,
        run: &mut RunState,
        retrying: bool,
    ) -> FrameworkResult<StageResult> {
        let frames: Vec<Frame> = self
            .registry
            .frames_for(&scaffold.id, stage)
            .into_iter()
            .cloned()
            .collect();

        if frames.is_empty() {
            info!("No frames for stage {}", stage.number());
            return Ok(StageResult::no_frames(stage));
        }

        let mut entries = Vec::with_capacity(frames.len());
        let mut critical_failures = Vec::new();

        for frame in frames {
            let critical = self.registry.is_critical(&scaffold.id, stage, &frame.id);
            let context = ExecutionContext::new(
                stage,
                frame.clone(),
                run.input_data.clone(),
                run.previous_results.clone(),
                run.preserved_context.clone(),
                self.max_attempts,
            );

            match self.executor.execute_frame(context).await {
                Ok(output) => {
                    info!(frame = %frame.name, "Frame completed successfully");
                    entries.push(FrameResultEntry {
                        frame_id: frame.id.clone(),
                        frame_name: frame.name.clone(),
                        success: true,
                        critical,
                        result: Some(output),
                        error: None,
                    });
                }
                Err(e) => {
                    let message = sanitize_error_message(&e.to_string());
                    if critical {
                        error!(frame = %frame.name, error = %message, "Critical frame failed");
                        critical_failures.push(format!("Frame {} failed: {message}", frame.name));
                    } else {
                        warn!(frame = %frame.name, error = %message, "Non-critical frame failed, continuing");
                    }
                    entries.push(FrameResultEntry {
                        frame_id: frame.id.clone(),
                        frame_name: frame.name.clone(),
                        success: false,
                        critical,
                        result: None,
                        error: Some(message),
                    });
                }
            }
        }

        let mut result = StageResult::from_frames(stage, entries);
        if critical_failures.is_empty() {
            return Ok(result);
        }

        let message = critical_failures.join("; ");
        result.message = Some(message.clone());
        self.metrics.stage_failed();
        if retrying {
            run.replace(stage, result)?;
        } else {
            run.record(stage, result)?;
        }
        Err(FrameworkError::stage_failed(stage, message))
    }

    /// Re-run stages 2 to 4 once when any of stages 1 to 4 was unsuccessful
    async fn retry_failed_stages(
        &mut self,
        scaffold: &Scaffold,
        run: &mut RunState,
    ) -> FrameworkResult<Option<RetryOutcome>> {
        let failed_stages: Vec<u8> = run
            .execution_log
            .iter()
            .filter(|r| r.stage < Stage::SuccessContinue.number() && !r.is_successful())
            .map(|r| r.stage)
            .collect();

        if failed_stages.is_empty() {
            return Ok(None);
        }

        warn!(?failed_stages, "Earlier stages unsuccessful, retrying from stage 2");
        let mut retried_stages = Vec::with_capacity(RETRY_STAGES.len());
        let mut recovered = true;

        for stage in RETRY_STAGES {
            let span = crate::stage_span!(stage = stage.number(), name = stage.name(), retry = true);
            let result = self
                .run_stage_frames(scaffold, stage, run, true)
                .instrument(span)
                .await?;
            if result.is_successful() {
                self.metrics.stage_completed();
            } else {
                self.metrics.stage_failed();
                recovered = false;
            }
            run.replace(stage, result)?;
            retried_stages.push(stage.number());
        }

        if recovered {
            info!("Retry recovered all re-run stages");
        } else {
            warn!("Retry did not recover all stages");
        }

        Ok(Some(RetryOutcome {
            failed_stages,
            retried_stages,
            recovered,
        }))
    }

    async fn finalize(&mut self, scaffold: &Scaffold, run: &RunState) -> FrameworkResult<RunReport> {
        let context_path = if scaffold.context_preservation {
            self.context_store.save_merged_over(
                &run.scaffold_id,
                run.preserved_context.as_ref(),
                &run.persistable_context(),
            )?;
            Some(self.context_store.task_path(&run.scaffold_id))
        } else {
            None
        };

        let execution_summary = ExecutionSummary::from_log(&run.execution_log);
        let external_command_analysis = ExternalCommandAnalysis::from_history(
            self.external.history(),
            self.external.failure_summary(),
        );
        let recommendations = build_recommendations(&execution_summary, &external_command_analysis);

        let report = ExecutionReport {
            metadata: ReportMetadata {
                scaffold_id: scaffold.id.clone(),
                scaffold_name: scaffold.name.clone(),
                run_id: run.run_id,
                start_time: run.start_time,
                end_time: Utc::now(),
                version: REPORT_VERSION.to_string(),
                framework_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            execution_summary,
            context_preservation: ContextPreservationSummary {
                context_loaded: run.preserved_context.is_some(),
                context_items: run
                    .preserved_context
                    .as_ref()
                    .and_then(Value::as_object)
                    .map_or(0, |m| m.len()),
                context_preserved: context_path.is_some(),
                context_path: context_path.clone(),
            },
            external_command_analysis,
            stage_results: run.execution_log.clone(),
            frame_execution_history: self.executor.history().to_vec(),
            input_data: run.input_data.clone(),
            previous_results: run.previous_results.clone(),
            metrics: self.metrics.snapshot(),
            recommendations,
        };

        let report_path = self.reports.write_execution_report(&report)?;
        log_summary(&report);
        info!(path = %report_path.display(), "Scaffold execution complete");

        Ok(RunReport {
            report,
            report_path,
            context_path,
        })
    }

    fn write_failure_report(&self, run: &RunState, err: &FrameworkError) {
        let report = FailureReportFile {
            timestamp: Utc::now(),
            error: err.report_message(),
            error_kind: err.kind().to_string(),
            context: run.failure_context(),
            execution_log: run.execution_log.clone(),
        };

        match self.reports.write_failure_report(&report) {
            Ok(path) => info!(path = %path.display(), "Failure report saved"),
            Err(e) => warn!(error = %e, "Failed to write failure report"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::ScriptedRunner;

    fn config_in(dir: &std::path::Path) -> FrameworkConfig {
        let mut config = FrameworkConfig::test_config();
        config.framework.working_dir = Some(dir.to_path_buf());
        config
    }

    #[tokio::test]
    async fn test_unknown_scaffold() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            FramePipeline::with_runner(&config_in(dir.path()), Arc::new(ScriptedRunner::new()))
                .unwrap();

        let err = pipeline
            .execute_scaffold("ghost", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameworkError::UnknownScaffold { .. }));
    }

    #[tokio::test]
    async fn test_non_object_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            FramePipeline::with_runner(&config_in(dir.path()), Arc::new(ScriptedRunner::new()))
                .unwrap();

        let err = pipeline
            .execute_scaffold("quick", json!([1, 2]))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameworkError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline =
            FramePipeline::with_runner(&config_in(dir.path()), Arc::new(ScriptedRunner::new()))
                .unwrap();

        let err = pipeline
            .execute_scaffold_until("quick", Value::Null, std::future::ready(()))
            .await
            .unwrap_err();
        assert!(matches!(err, FrameworkError::Aborted { .. }));
        assert_eq!(pipeline.metrics().snapshot().runs.runs_failed, 1);
    }

    #[test]
    fn test_collect_learnings() {
        let entry = |output: Value| FrameResultEntry {
            frame_id: "f".to_string(),
            frame_name: "F".to_string(),
            success: true,
            critical: false,
            result: output.as_object().cloned(),
            error: None,
        };
        let result = StageResult::from_frames(
            Stage::Plan,
            vec![
                entry(json!({"recommendations": ["a"], "findings": {"x": 1}})),
                entry(json!({"recommendations": ["b"], "action_items": [{"id": 1}]})),
            ],
        );
        let learnings = collect_learnings(&[StageRecord::new(result)]);

        assert_eq!(learnings["recommendations"], json!(["a", "b"]));
        assert_eq!(learnings["action_items"], json!([{"id": 1}]));
        assert_eq!(learnings["findings"], json!({"x": 1}));
    }
}
