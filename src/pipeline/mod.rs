//! Ten-stage scaffold pipeline

pub mod audit;
pub mod framework;
pub mod publish;
pub mod result;
pub mod stage;

pub use audit::MetaAnalysis;
pub use framework::{FramePipeline, RunReport};
pub use publish::{publish_changes, PublishOutcome, PublishStatus};
pub use result::{FrameResultEntry, RetryOutcome, StageRecord, StageResult, StageStatus};
pub use stage::Stage;
