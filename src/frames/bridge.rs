//! Script bridge: runs frames as child processes
//!
//! The bridge writes the execution context to a temporary JSON file, starts the
//! frame under the runtime its extension selects, and reads the frame result
//! back from the last JSON object line printed on stdout.
//!
//! | Extension            | Invocation                                                      |
//! |----------------------|-----------------------------------------------------------------|
//! | `.py`                | `python -c <bootstrap> <file>`                                  |
//! | `.js` `.mjs` `.cjs`  | `node -e <bootstrap>` with `FILE_URL` and `CONTEXT_FILE` set     |
//! | `.ps1`               | `powershell -NoProfile -ExecutionPolicy Bypass -File <file> -ContextFile <ctx>` |
//! | anything else        | `<file> --context-file <ctx>`                                   |
//!
//! Every child also receives `AF_FRAMEWORK_RUN=1` and `AF_CONTEXT_FILE=<ctx>`.

use crate::config::RuntimeSection;
use crate::error::sanitize_error_message;
use crate::frames::{ExecutionContext, Frame, FrameError, FrameOutput, FrameRunner};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

/// Environment flag telling frames they run under the orchestrator
pub const FRAMEWORK_RUN_ENV: &str = "AF_FRAMEWORK_RUN";
/// Environment variable carrying the context file path
pub const CONTEXT_FILE_ENV: &str = "AF_CONTEXT_FILE";

const PYTHON_BOOTSTRAP: &str = r#"
import importlib.util, json, os, sys
path = sys.argv[1]
with open(os.environ["AF_CONTEXT_FILE"], encoding="utf-8") as fh:
    ctx = json.load(fh)
try:
    sys.path.insert(0, os.path.dirname(os.path.abspath(path)))
    spec = importlib.util.spec_from_file_location("octospine_frame", path)
    module = importlib.util.module_from_spec(spec)
    spec.loader.exec_module(module)
    target = getattr(module, ctx["entry_point"], None)
    if target is None:
        out = {"success": False, "error": "Entry point not found: " + ctx["entry_point"]}
    elif callable(target):
        try:
            out = target(context=ctx)
        except TypeError:
            out = target()
    else:
        out = target
except Exception as exc:
    out = {"success": False, "error": str(exc)}
print(json.dumps(out, default=str))
"#;

const NODE_BOOTSTRAP: &str = r#"
(async () => {
  try {
    const moduleObj = await import(process.env.FILE_URL);
    const fs = require('fs');
    const context = JSON.parse(fs.readFileSync(process.env.CONTEXT_FILE, 'utf8'));
    const target = moduleObj[context.entry_point];
    if (target === undefined) {
      console.log(JSON.stringify({ success: false, error: 'Entry point not found: ' + context.entry_point }));
      return;
    }
    const output = typeof target === 'function' ? await target(context) : target;
    console.log(JSON.stringify(output));
  } catch (error) {
    console.log(JSON.stringify({ success: false, error: String((error && error.message) || error) }));
  }
})();
"#;

/// How a frame file is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRuntime {
    Python,
    Node,
    PowerShell,
    Executable,
}

impl FrameRuntime {
    /// Select a runtime from the file extension
    pub fn detect(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("py") => FrameRuntime::Python,
            Some("js") | Some("mjs") | Some("cjs") => FrameRuntime::Node,
            Some("ps1") => FrameRuntime::PowerShell,
            _ => FrameRuntime::Executable,
        }
    }

    /// How many trailing stdout lines are searched for the JSON response
    pub fn response_window(self) -> usize {
        match self {
            FrameRuntime::Node => 10,
            _ => 20,
        }
    }
}

/// Context payload written for the child process
#[derive(Debug, Serialize)]
struct BridgeContext<'a> {
    input_data: &'a Value,
    parameters: &'a Map<String, Value>,
    previous_results: &'a Map<String, Value>,
    preserved_context: &'a Option<Value>,
    entry_point: &'a str,
    stage: &'static str,
    attempt: u32,
}

/// Production [`FrameRunner`] that shells out to the frame's runtime
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    runtimes: RuntimeSection,
    working_dir: PathBuf,
    default_timeout: Duration,
}

impl ScriptRunner {
    pub fn new(runtimes: RuntimeSection, working_dir: PathBuf, default_timeout: Duration) -> Self {
        Self {
            runtimes,
            working_dir,
            default_timeout,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn timeout_for(&self, frame: &Frame) -> Duration {
        frame
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    fn write_context_file(context: &ExecutionContext) -> Result<NamedTempFile, FrameError> {
        let payload = BridgeContext {
            input_data: &context.input_data,
            parameters: &context.parameters,
            previous_results: &context.previous_results,
            preserved_context: &context.preserved_context,
            entry_point: &context.frame.entry_point,
            stage: context.stage.key(),
            attempt: context.attempt_count + 1,
        };

        let mut file = tempfile::Builder::new()
            .prefix("octospine-ctx-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| FrameError::ContextFile(e.to_string()))?;
        serde_json::to_writer(&mut file, &payload)
            .map_err(|e| FrameError::ContextFile(e.to_string()))?;
        file.flush()
            .map_err(|e| FrameError::ContextFile(e.to_string()))?;
        Ok(file)
    }

    /// Build the child command for a frame (pure apart from path canonicalisation)
    fn build_command(
        &self,
        runtime: FrameRuntime,
        frame_path: &Path,
        context_file: &Path,
    ) -> Result<Command, FrameError> {
        let mut command = match runtime {
            FrameRuntime::Python => {
                let mut cmd = Command::new(&self.runtimes.python);
                cmd.arg("-c").arg(PYTHON_BOOTSTRAP).arg(frame_path);
                cmd
            }
            FrameRuntime::Node => {
                let file_url = url::Url::from_file_path(frame_path).map_err(|_| {
                    FrameError::ContextFile(format!(
                        "Cannot build module URL for {}",
                        frame_path.display()
                    ))
                })?;
                let mut cmd = Command::new(&self.runtimes.node);
                cmd.arg("-e")
                    .arg(NODE_BOOTSTRAP)
                    .env("FILE_URL", file_url.as_str())
                    .env("CONTEXT_FILE", context_file);
                cmd
            }
            FrameRuntime::PowerShell => {
                let mut cmd = Command::new(&self.runtimes.powershell);
                cmd.args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"])
                    .arg(frame_path)
                    .arg("-ContextFile")
                    .arg(context_file);
                cmd
            }
            FrameRuntime::Executable => {
                let mut cmd = Command::new(frame_path);
                cmd.arg("--context-file").arg(context_file);
                cmd
            }
        };

        command
            .current_dir(&self.working_dir)
            .env(FRAMEWORK_RUN_ENV, "1")
            .env(CONTEXT_FILE_ENV, context_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(command)
    }

    fn program_name(&self, runtime: FrameRuntime, frame_path: &Path) -> String {
        match runtime {
            FrameRuntime::Python => self.runtimes.python.clone(),
            FrameRuntime::Node => self.runtimes.node.clone(),
            FrameRuntime::PowerShell => self.runtimes.powershell.clone(),
            FrameRuntime::Executable => frame_path.display().to_string(),
        }
    }
}

#[async_trait]
impl FrameRunner for ScriptRunner {
    async fn run(&self, context: &ExecutionContext) -> Result<FrameOutput, FrameError> {
        let frame = &context.frame;
        let runtime = frame.runtime();
        let frame_path = frame.resolve_path(&self.working_dir);
        let timeout = self.timeout_for(frame);

        // Removed on drop, after the child has exited or been killed
        let context_file = Self::write_context_file(context)?;

        let mut command = self.build_command(runtime, &frame_path, context_file.path())?;
        let child = command.spawn().map_err(|e| FrameError::Spawn {
            program: self.program_name(runtime, &frame_path),
            message: e.to_string(),
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| FrameError::Execution(e.to_string()))?,
            Err(_) => return Err(FrameError::Timeout(timeout.as_secs())),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            frame_id = %frame.id,
            runtime = ?runtime,
            stdout_len = stdout.len(),
            stderr = %sanitize_error_message(&stderr),
            "Frame process finished"
        );

        if !output.status.success() {
            return Err(FrameError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: sanitize_error_message(stderr.trim()),
            });
        }

        let response = extract_trailing_json(&stdout, runtime.response_window())
            .ok_or(FrameError::NoResponse)?;
        normalize_response(response)
    }
}

/// Find the last JSON object line within the trailing `window` non-empty lines
pub fn extract_trailing_json(stdout: &str, window: usize) -> Option<Map<String, Value>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .rev()
        .take(window)
        .filter(|line| line.starts_with('{') && line.ends_with('}'))
        .find_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// Turn a raw frame response into a result or a reported failure
///
/// `{"success": false, "error": ...}` is a failure. A nested `result` object is
/// flattened over the response so criteria can address its keys directly.
pub fn normalize_response(response: Map<String, Value>) -> Result<FrameOutput, FrameError> {
    let reported_failure = matches!(response.get("success"), Some(Value::Bool(false)));
    if reported_failure {
        if let Some(error) = response.get("error") {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(FrameError::Reported(sanitize_error_message(&message)));
        }
    }

    match response.get("result") {
        Some(Value::Object(inner)) => {
            let mut merged = response.clone();
            for (key, value) in inner {
                merged.insert(key.clone(), value.clone());
            }
            Ok(merged)
        }
        _ => Ok(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_runtime_detection() {
        assert_eq!(FrameRuntime::detect(Path::new("a/b.py")), FrameRuntime::Python);
        assert_eq!(FrameRuntime::detect(Path::new("b.JS")), FrameRuntime::Node);
        assert_eq!(FrameRuntime::detect(Path::new("b.mjs")), FrameRuntime::Node);
        assert_eq!(FrameRuntime::detect(Path::new("b.ps1")), FrameRuntime::PowerShell);
        assert_eq!(FrameRuntime::detect(Path::new("run.sh")), FrameRuntime::Executable);
        assert_eq!(FrameRuntime::detect(Path::new("tool")), FrameRuntime::Executable);
    }

    #[test]
    fn test_extract_picks_last_json_line() {
        let stdout = "starting\n{\"step\": 1}\nprogress...\n{\"done\": true}\n\n";
        let map = extract_trailing_json(stdout, 20).unwrap();
        assert_eq!(map.get("done"), Some(&json!(true)));
    }

    #[test]
    fn test_extract_skips_invalid_candidates() {
        let stdout = "{\"ok\": 1}\n{not json}\n";
        let map = extract_trailing_json(stdout, 20).unwrap();
        assert_eq!(map.get("ok"), Some(&json!(1)));
    }

    #[test]
    fn test_extract_respects_window() {
        let mut stdout = String::from("{\"early\": true}\n");
        for i in 0..12 {
            stdout.push_str(&format!("log line {i}\n"));
        }
        assert!(extract_trailing_json(&stdout, 10).is_none());
        assert!(extract_trailing_json(&stdout, 20).is_some());
    }

    #[test]
    fn test_extract_ignores_arrays_and_scalars() {
        assert!(extract_trailing_json("[1,2,3]\n42\n\"text\"", 20).is_none());
        assert!(extract_trailing_json("", 20).is_none());
    }

    #[test]
    fn test_normalize_reported_failure() {
        let response = json!({"success": false, "error": "Entry point not found: run"});
        let err = normalize_response(response.as_object().cloned().unwrap()).unwrap_err();
        assert!(matches!(err, FrameError::Reported(ref m) if m.contains("Entry point not found")));
    }

    #[test]
    fn test_normalize_failure_without_error_is_passed_through() {
        let response = json!({"success": false, "partial": true});
        let out = normalize_response(response.as_object().cloned().unwrap()).unwrap();
        assert_eq!(out.get("partial"), Some(&json!(true)));
    }

    #[test]
    fn test_normalize_flattens_result_object() {
        let response = json!({"success": true, "result": {"hub_updated": true, "success": "inner"}});
        let out = normalize_response(response.as_object().cloned().unwrap()).unwrap();
        assert_eq!(out.get("hub_updated"), Some(&json!(true)));
        assert_eq!(out.get("success"), Some(&json!("inner")));
        assert!(out.contains_key("result"));
    }

    #[test]
    fn test_normalize_keeps_non_object_result() {
        let response = json!({"result": 5});
        let out = normalize_response(response.as_object().cloned().unwrap()).unwrap();
        assert_eq!(out.get("result"), Some(&json!(5)));
    }

    proptest! {
        #[test]
        fn extract_never_panics(stdout in ".*", window in 0usize..32) {
            let _ = extract_trailing_json(&stdout, window);
        }

        #[test]
        fn extract_finds_object_after_noise(noise in "[a-z ]{0,40}", value in any::<i64>()) {
            let stdout = format!("{noise}\n{{\"value\": {value}}}\n");
            let map = extract_trailing_json(&stdout, 10).unwrap();
            prop_assert_eq!(map.get("value"), Some(&json!(value)));
        }
    }
}
