use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Position of a block in the configured block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One trial's resources: the stimulus video, an optional question/rating
/// file and the washout preceding it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Block {
    pub video: PathBuf,
    #[serde(default)]
    pub configuration: Option<PathBuf>,
    #[serde(alias = "washout_secs", default, deserialize_with = "whole_seconds")]
    pub washout: Duration,
}

fn whole_seconds<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
    u64::deserialize(de).map(Duration::from_secs)
}

impl Block {
    pub fn new(video: impl Into<PathBuf>, washout: Duration) -> Self {
        Self {
            video: video.into(),
            configuration: None,
            washout,
        }
    }

    pub fn with_configuration(mut self, configuration: impl Into<PathBuf>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    /// File name of the video, as recorded in event payloads.
    pub fn video_name(&self) -> String {
        file_name(&self.video)
    }

    pub fn configuration_name(&self) -> Option<String> {
        self.configuration.as_deref().map(file_name)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
