//! Thread-safe metrics collection
//!
//! Atomic counters for run, stage and command events, plus mutex-protected
//! per-frame timing statistics. One collector is owned by each pipeline and
//! its snapshot is embedded in the final execution report.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Per-frame timing samples kept for percentile calculation
const MAX_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
#[derive(Debug)]
pub struct MetricsCollector {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    run_times: Mutex<Vec<u64>>, // in milliseconds

    stages_completed: AtomicU64,
    stages_failed: AtomicU64,
    stages_skipped: AtomicU64,

    frame_retries: AtomicU64,
    frame_stats: Mutex<HashMap<String, FrameExecutionStats>>,

    commands_executed: AtomicU64,
    commands_failed: AtomicU64,

    run_state: Mutex<String>,
    state_transitions: AtomicU64,
    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            run_times: Mutex::new(Vec::new()),
            stages_completed: AtomicU64::new(0),
            stages_failed: AtomicU64::new(0),
            stages_skipped: AtomicU64::new(0),
            frame_retries: AtomicU64::new(0),
            frame_stats: Mutex::new(HashMap::new()),
            commands_executed: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            run_state: Mutex::new("idle".to_string()),
            state_transitions: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Scaffold run metrics
    pub fn run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_completed(&self, duration: Duration) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        self.record_run_time(duration);
    }

    pub fn run_failed(&self, duration: Duration) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        self.record_run_time(duration);
    }

    fn record_run_time(&self, duration: Duration) {
        if let Ok(mut times) = self.run_times.lock() {
            push_bounded(&mut times, duration.as_millis() as u64);
        }
    }

    // Stage metrics
    pub fn stage_completed(&self) {
        self.stages_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stage_failed(&self) {
        self.stages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stage_skipped(&self) {
        self.stages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    // Frame metrics
    pub fn frame_executed(&self, frame_id: &str, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.frame_stats.lock() {
            let entry = stats
                .entry(frame_id.to_string())
                .or_insert_with(|| FrameExecutionStats::new(frame_id));
            entry.executions += 1;
            entry.last_execution = current_timestamp();
            push_bounded(&mut entry.execution_times, duration.as_millis() as u64);
            if !success {
                entry.failures += 1;
            }
        }
    }

    pub fn frame_timeout(&self, frame_id: &str) {
        if let Ok(mut stats) = self.frame_stats.lock() {
            if let Some(entry) = stats.get_mut(frame_id) {
                entry.timeouts += 1;
            }
        }
    }

    pub fn frame_retried(&self) {
        self.frame_retries.fetch_add(1, Ordering::Relaxed);
    }

    // External command metrics
    pub fn command_executed(&self, success: bool) {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the current pipeline state, counting transitions
    pub fn set_run_state(&self, state: &str) {
        if let Ok(mut current) = self.run_state.lock() {
            if *current != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current = state.to_string();
            }
        }
    }

    pub fn run_state(&self) -> String {
        self.run_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.runs_started,
            &self.runs_completed,
            &self.runs_failed,
            &self.stages_completed,
            &self.stages_failed,
            &self.stages_skipped,
            &self.frame_retries,
            &self.commands_executed,
            &self.commands_failed,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.started_at.store(current_timestamp(), Ordering::Relaxed);

        if let Ok(mut times) = self.run_times.lock() {
            times.clear();
        }
        if let Ok(mut stats) = self.frame_stats.lock() {
            stats.clear();
        }
        if let Ok(mut state) = self.run_state.lock() {
            *state = "idle".to_string();
        }
    }

    fn frame_metrics(&self) -> FrameMetrics {
        let Ok(stats) = self.frame_stats.lock() else {
            return FrameMetrics::default();
        };

        let mut metrics = FrameMetrics {
            total_retries: self.frame_retries.load(Ordering::Relaxed),
            ..FrameMetrics::default()
        };
        let mut total_time = 0u64;
        let mut total_count = 0u64;

        for (id, entry) in stats.iter() {
            metrics.frame_stats.insert(id.clone(), entry.snapshot());
            metrics.total_executions += entry.executions;
            metrics.total_failures += entry.failures;
            metrics.total_timeouts += entry.timeouts;
            total_time += entry.execution_times.iter().sum::<u64>();
            total_count += entry.execution_times.len() as u64;
        }

        metrics.avg_execution_time_ms = if total_count == 0 {
            0.0
        } else {
            total_time as f64 / total_count as f64
        };
        metrics
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_run_time_ms, run_time_p50_ms, run_time_p95_ms) = match self.run_times.lock() {
            Ok(times) if !times.is_empty() => {
                let mut sorted = times.clone();
                sorted.sort_unstable();
                (
                    sorted.iter().sum::<u64>() as f64 / sorted.len() as f64,
                    percentile(&sorted, 50.0),
                    percentile(&sorted, 95.0),
                )
            }
            _ => (0.0, 0.0, 0.0),
        };

        MetricsSnapshot {
            runs: RunMetrics {
                runs_started: self.runs_started.load(Ordering::Relaxed),
                runs_completed: self.runs_completed.load(Ordering::Relaxed),
                runs_failed: self.runs_failed.load(Ordering::Relaxed),
                avg_run_time_ms,
                run_time_p50_ms,
                run_time_p95_ms,
                current_state: self.run_state(),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
            },
            stages: StageMetrics {
                completed: self.stages_completed.load(Ordering::Relaxed),
                failed: self.stages_failed.load(Ordering::Relaxed),
                skipped: self.stages_skipped.load(Ordering::Relaxed),
            },
            frames: self.frame_metrics(),
            commands: CommandMetrics {
                executed: self.commands_executed.load(Ordering::Relaxed),
                failed: self.commands_failed.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Internal frame statistics (with timing data)
#[derive(Debug)]
struct FrameExecutionStats {
    id: String,
    executions: u64,
    failures: u64,
    timeouts: u64,
    execution_times: Vec<u64>, // milliseconds
    last_execution: u64,
}

impl FrameExecutionStats {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            executions: 0,
            failures: 0,
            timeouts: 0,
            execution_times: Vec::new(),
            last_execution: 0,
        }
    }

    fn snapshot(&self) -> FrameStatsSnapshot {
        let mut sorted = self.execution_times.clone();
        sorted.sort_unstable();

        let avg_execution_time_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };
        let success_rate = if self.executions == 0 {
            0.0
        } else {
            (self.executions - self.failures) as f64 / self.executions as f64
        };

        FrameStatsSnapshot {
            id: self.id.clone(),
            executions: self.executions,
            failures: self.failures,
            timeouts: self.timeouts,
            avg_execution_time_ms,
            p95_execution_time_ms: percentile(&sorted, 95.0),
            last_execution: self.last_execution,
            success_rate,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub runs: RunMetrics,
    pub stages: StageMetrics,
    pub frames: FrameMetrics,
    pub commands: CommandMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub avg_run_time_ms: f64,
    pub run_time_p50_ms: f64,
    pub run_time_p95_ms: f64,
    pub current_state: String,
    pub state_transitions: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageMetrics {
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameMetrics {
    pub frame_stats: BTreeMap<String, FrameStatsSnapshot>,
    pub total_executions: u64,
    pub total_failures: u64,
    pub total_timeouts: u64,
    pub total_retries: u64,
    pub avg_execution_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameStatsSnapshot {
    pub id: String,
    pub executions: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub avg_execution_time_ms: f64,
    pub p95_execution_time_ms: f64,
    pub last_execution: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandMetrics {
    pub executed: u64,
    pub failed: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn push_bounded(samples: &mut Vec<u64>, value: u64) {
    samples.push(value);
    if samples.len() > MAX_SAMPLES {
        samples.remove(0);
    }
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_run_metrics() {
        let collector = MetricsCollector::new();

        collector.run_started();
        collector.run_completed(Duration::from_millis(1500));
        collector.run_started();
        collector.run_failed(Duration::from_millis(500));

        let metrics = collector.snapshot();
        assert_eq!(metrics.runs.runs_started, 2);
        assert_eq!(metrics.runs.runs_completed, 1);
        assert_eq!(metrics.runs.runs_failed, 1);
        assert!((metrics.runs.avg_run_time_ms - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frame_metrics() {
        let collector = MetricsCollector::new();

        collector.frame_executed("audit", Duration::from_millis(500), true);
        collector.frame_executed("audit", Duration::from_millis(300), false);
        collector.frame_timeout("audit");
        collector.frame_retried();

        let metrics = collector.snapshot();
        let audit = &metrics.frames.frame_stats["audit"];

        assert_eq!(audit.executions, 2);
        assert_eq!(audit.failures, 1);
        assert_eq!(audit.timeouts, 1);
        assert_eq!(audit.success_rate, 0.5);
        assert!(audit.avg_execution_time_ms > 350.0);
        assert_eq!(metrics.frames.total_retries, 1);
    }

    #[test]
    fn test_timeout_for_unknown_frame_is_ignored() {
        let collector = MetricsCollector::new();
        collector.frame_timeout("never_ran");
        assert!(collector.snapshot().frames.frame_stats.is_empty());
    }

    #[test]
    fn test_stage_and_command_counters() {
        let collector = MetricsCollector::new();
        collector.stage_completed();
        collector.stage_completed();
        collector.stage_failed();
        collector.stage_skipped();
        collector.command_executed(true);
        collector.command_executed(false);

        let metrics = collector.snapshot();
        assert_eq!(metrics.stages.completed, 2);
        assert_eq!(metrics.stages.failed, 1);
        assert_eq!(metrics.stages.skipped, 1);
        assert_eq!(metrics.commands.executed, 2);
        assert_eq!(metrics.commands.failed, 1);
    }

    #[test]
    fn test_state_transitions() {
        let collector = MetricsCollector::new();
        collector.set_run_state("running");
        collector.set_run_state("running");
        collector.set_run_state("completed");

        let metrics = collector.snapshot();
        assert_eq!(metrics.runs.current_state, "completed");
        assert_eq!(metrics.runs.state_transitions, 2);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.command_executed(true);
                        collector.frame_executed("f", Duration::from_millis(1), true);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.snapshot();
        assert_eq!(metrics.commands.executed, 1000);
        assert_eq!(metrics.frames.total_executions, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

        let p50 = percentile(&data, 50.0);
        let p95 = percentile(&data, 95.0);

        assert!((p50 - 5.5).abs() < 0.1, "P50: expected ~5.5, got {p50}");
        assert!((p95 - 9.5).abs() < 0.1, "P95: expected ~9.5, got {p95}");
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 100.0), 10.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_samples_are_bounded() {
        let mut samples = Vec::new();
        for i in 0..1500 {
            push_bounded(&mut samples, i);
        }
        assert_eq!(samples.len(), MAX_SAMPLES);
        assert_eq!(samples[0], 500);
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();

        collector.run_started();
        collector.set_run_state("running");
        collector.frame_executed("f", Duration::from_millis(100), true);

        collector.reset();

        let metrics = collector.snapshot();
        assert_eq!(metrics.runs.runs_started, 0);
        assert_eq!(metrics.runs.current_state, "idle");
        assert!(metrics.frames.frame_stats.is_empty());
    }
}
