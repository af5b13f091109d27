//! Octospine - frame orchestrator
//!
//! Runs *scaffolds*: named arrangements of external scripts ("frames") over a
//! fixed ten-stage pipeline. Frames may be Python, Node, PowerShell or plain
//! executables; they receive a JSON context and answer with a JSON object.
//!
//! # Overview
//!
//! - [`config`]: TOML configuration of frames, scaffolds and runtimes
//! - [`frames`]: frame registry, subprocess bridge and retrying executor
//! - [`pipeline`]: the ten stages, meta-audit and git publishing
//! - [`context`]: context files carried between runs of a scaffold
//! - [`external`]: external command execution with failure diagnostics
//! - [`report`]: execution, meta-analysis and failure reports
//!
//! # Quick Start
//!
//! ```no_run
//! use octospine::{FramePipeline, FrameworkConfig};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let config = FrameworkConfig::load_from_file("octospine.toml".as_ref())?;
//! let mut pipeline = FramePipeline::from_config(&config)?;
//! let outcome = pipeline
//!     .execute_scaffold("full_system", json!({"scope": "security"}))
//!     .await?;
//! println!("report written to {}", outcome.report_path.display());
//! # Ok::<(), octospine::FrameworkError>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod external;
pub mod frames;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod testing;

pub use config::{ConfigError, FrameworkConfig};
pub use error::{FrameworkError, FrameworkResult};
pub use frames::{Frame, FrameError, FrameRegistry, FrameRunner, Scaffold};
pub use pipeline::{FramePipeline, RunReport, Stage};
