pub mod blocks;
pub mod config;
pub mod manager;
pub mod plan;
pub mod queue;
pub mod sequencer;

pub use blocks::{scan, BlockListBuilder, CONFIGURATION_EXTENSIONS, VIDEO_EXTENSIONS};
pub use config::{ConfigError, OutputFormat, TaskConfig};
pub use manager::{BlockQueueManager, SessionError, SessionState, StageRun, Stages, StartOutcome};
pub use plan::{Layout, OutputNaming, SessionPlan, WashoutPolicy};
pub use queue::BlockQueue;
pub use sequencer::{SequenceError, Sequencer, SequencerState, StageEntry, StageRunner};
