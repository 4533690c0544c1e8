use behx_core::{Fields, StageKind};
use behx_log::LogOutput;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::OutputFormat;

/// Stage order around and inside each block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub before: Vec<StageKind>,
    pub block: Vec<StageKind>,
    pub after: Vec<StageKind>,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            before: vec![StageKind::Instructions],
            block: vec![StageKind::Washout, StageKind::Video, StageKind::Questionnaire],
            after: vec![StageKind::Washout, StageKind::Finish],
        }
    }
}

/// How a block's configured washout becomes the interval actually shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WashoutPolicy {
    /// The block's value is the interval.
    #[default]
    Direct,
    /// The block's value is subtracted from a fixed base.
    FromBase { base: Duration },
}

impl WashoutPolicy {
    pub fn apply(&self, block_washout: Duration) -> Duration {
        match self {
            WashoutPolicy::Direct => block_washout,
            WashoutPolicy::FromBase { base } => base.saturating_sub(block_washout),
        }
    }
}

/// Where session records go. Each session gets its own file, stamped with
/// the time it started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNaming {
    pub dir: PathBuf,
    /// Leading part of every file name, `{subject}_{session}`.
    pub prefix: String,
    pub format: OutputFormat,
}

impl OutputNaming {
    fn stem(&self, now: NaiveDateTime) -> String {
        format!("{}_{}", self.prefix, now.format("%Y-%m-%d_%H~%M~%S"))
    }

    /// `{prefix}_{YYYY-MM-DD_HH~MM~SS}.{csv|sqlite}` in `dir`.
    pub fn path(&self, now: NaiveDateTime) -> PathBuf {
        self.dir
            .join(format!("{}.{}", self.stem(now), self.format.extension()))
    }

    /// The output for a session starting at `now`. An existing file of the
    /// same name is never reused; a counter is appended instead.
    pub fn output(&self, now: NaiveDateTime) -> LogOutput {
        let mut path = self.path(now);
        let mut n = 1;
        while path.exists() {
            path = self
                .dir
                .join(format!("{}_{n}.{}", self.stem(now), self.format.extension()));
            n += 1;
        }
        match self.format {
            OutputFormat::Flat => LogOutput::Flat(path),
            OutputFormat::Columnar => LogOutput::Columnar(path),
        }
    }
}

/// Everything a session needs to know besides the blocks themselves.
#[derive(Debug, Clone, Default)]
pub struct SessionPlan {
    pub layout: Layout,
    pub washout: WashoutPolicy,
    /// Overrides the washout before the trailing stages.
    pub closing_washout: Option<Duration>,
    /// Stages whose terminal completion also fires the hardware trigger.
    pub trigger_on: Vec<StageKind>,
    pub instructions: Option<PathBuf>,
    pub output: Option<OutputNaming>,
    /// File attributes written with the log.
    pub attributes: Fields,
}

impl SessionPlan {
    pub fn triggers(&self, stage: StageKind) -> bool {
        self.trigger_on.contains(&stage)
    }
}
