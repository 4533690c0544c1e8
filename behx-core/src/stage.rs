use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::block::BlockId;
use crate::completion::{Completion, CompletionRoutes};

/// The presentable units a session is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Instructions,
    Washout,
    Video,
    Questionnaire,
    Rating,
    Finish,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::Instructions,
        StageKind::Washout,
        StageKind::Video,
        StageKind::Questionnaire,
        StageKind::Rating,
        StageKind::Finish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Instructions => "instructions",
            StageKind::Washout => "washout",
            StageKind::Video => "video",
            StageKind::Questionnaire => "questionnaire",
            StageKind::Rating => "rating",
            StageKind::Finish => "finish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments stored with a stage entry and handed to the presenter on `run`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageArgs {
    pub duration: Option<Duration>,
    pub path: Option<PathBuf>,
    pub text: Option<String>,
    pub block: Option<BlockId>,
    pub routes: CompletionRoutes,
}

impl StageArgs {
    pub fn new(routes: CompletionRoutes) -> Self {
        Self {
            routes,
            ..Self::default()
        }
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn block(mut self, block: BlockId) -> Self {
        self.block = Some(block);
        self
    }
}

#[derive(Debug, Error)]
pub enum PresentError {
    #[error("resource not found: {0}")]
    MissingResource(PathBuf),

    #[error("failed to read {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("no presenter registered for stage '{0}'")]
    Unsupported(StageKind),
}

/// The presentation contract every stage satisfies.
///
/// `run` begins presentation and returns immediately; completion is reported
/// later through the `Completion` handle. The presenter never sees the
/// sequencer or the event log.
pub trait Presenter {
    fn run(&mut self, args: &StageArgs, done: Completion) -> Result<(), PresentError>;

    /// Cancel pending asynchronous work (armed timers, playing media).
    fn halt(&mut self) {}
}
