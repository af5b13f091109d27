//! Mock implementations for testing
//!
//! [`ScriptedRunner`] stands in for the subprocess bridge so pipelines can be
//! exercised without Python, Node or PowerShell on the machine.

use crate::frames::{ExecutionContext, FrameError, FrameOutput, FrameRunner};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Scripted {
    Respond(FrameOutput),
    Fail(String),
    FailOnce(String),
    Timeout(u64),
}

/// In-process frame runner with canned responses per frame id
///
/// Each frame has a queue of outcomes. Entries are consumed in order and the
/// last one repeats forever, except for [`ScriptedRunner::fail_once`] entries.
/// Frames without a script, or whose script is used up, succeed with `{}`.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<ExecutionContext>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, frame_id: &str, entry: Scripted) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(frame_id.to_string())
                .or_default()
                .push_back(entry);
        }
        self
    }

    /// Queue a successful JSON object response; non-objects become `{"value": ...}`
    pub fn respond(self, frame_id: &str, response: Value) -> Self {
        let output = match response {
            Value::Object(map) => map,
            other => {
                let mut map = FrameOutput::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self.push(frame_id, Scripted::Respond(output))
    }

    /// Queue a failure, repeated if it is the last entry
    pub fn fail(self, frame_id: &str, message: &str) -> Self {
        self.push(frame_id, Scripted::Fail(message.to_string()))
    }

    /// Queue a failure that is used exactly once, even as the last entry
    pub fn fail_once(self, frame_id: &str, message: &str) -> Self {
        self.push(frame_id, Scripted::FailOnce(message.to_string()))
    }

    pub fn time_out(self, frame_id: &str, secs: u64) -> Self {
        self.push(frame_id, Scripted::Timeout(secs))
    }

    /// Every context the runner was called with, in call order
    pub fn calls(&self) -> Vec<ExecutionContext> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, frame_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|ctx| ctx.frame.id == frame_id)
            .count()
    }

    fn next(&self, frame_id: &str) -> Option<Scripted> {
        let mut scripts = self.scripts.lock().ok()?;
        let queue = scripts.get_mut(frame_id)?;
        match queue.front() {
            Some(Scripted::FailOnce(_)) => queue.pop_front(),
            _ if queue.len() > 1 => queue.pop_front(),
            front => front.cloned(),
        }
    }
}

#[async_trait]
impl FrameRunner for ScriptedRunner {
    async fn run(&self, context: &ExecutionContext) -> Result<FrameOutput, FrameError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(context.clone());
        }

        match self.next(&context.frame.id) {
            None => Ok(FrameOutput::new()),
            Some(Scripted::Respond(output)) => Ok(output),
            Some(Scripted::Fail(message)) | Some(Scripted::FailOnce(message)) => {
                Err(FrameError::Execution(message))
            }
            Some(Scripted::Timeout(secs)) => Err(FrameError::Timeout(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::Frame;
    use crate::pipeline::stage::Stage;
    use serde_json::{json, Map};

    fn ctx(frame_id: &str) -> ExecutionContext {
        ExecutionContext::new(
            Stage::Plan,
            Frame::new(frame_id, frame_id, "f.py"),
            json!({}),
            Map::new(),
            None,
            1,
        )
    }

    #[tokio::test]
    async fn test_queue_then_sticky_last_entry() {
        let runner = ScriptedRunner::new()
            .fail_once("f", "first")
            .respond("f", json!({"n": 1}));

        assert!(runner.run(&ctx("f")).await.is_err());
        assert_eq!(runner.run(&ctx("f")).await.unwrap()["n"], json!(1));
        assert_eq!(runner.run(&ctx("f")).await.unwrap()["n"], json!(1));
        assert_eq!(runner.call_count("f"), 3);
    }

    #[tokio::test]
    async fn test_fail_once_is_not_sticky() {
        let runner = ScriptedRunner::new().fail_once("f", "only once");

        assert!(matches!(
            runner.run(&ctx("f")).await,
            Err(FrameError::Execution(message)) if message == "only once"
        ));
        assert!(runner.run(&ctx("f")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_is_sticky() {
        let runner = ScriptedRunner::new().fail("f", "always");

        assert!(runner.run(&ctx("f")).await.is_err());
        assert!(runner.run(&ctx("f")).await.is_err());
    }

    #[tokio::test]
    async fn test_unscripted_frame_succeeds_empty() {
        let runner = ScriptedRunner::new();
        assert!(runner.run(&ctx("other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_entry() {
        let runner = ScriptedRunner::new().time_out("slow", 5);
        assert!(matches!(
            runner.run(&ctx("slow")).await,
            Err(FrameError::Timeout(5))
        ));
    }
}
