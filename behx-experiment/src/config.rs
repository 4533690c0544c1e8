use behx_core::{Block, Fields, StageKind};
use behx_trigger::TriggerSettings;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::blocks::BlockListBuilder;
use crate::plan::{Layout, OutputNaming, SessionPlan, WashoutPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse task configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid task configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Flat,
    Columnar,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Flat => "csv",
            OutputFormat::Columnar => "sqlite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WashoutMode {
    #[default]
    Direct,
    FromBase,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WashoutConfig {
    pub policy: WashoutMode,
    pub base_secs: f64,
    pub closing_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    #[serde(flatten)]
    pub settings: TriggerSettings,
    /// Stages whose terminal completion also fires the trigger.
    pub on: Vec<StageKind>,
    /// Count emissions instead of playing them.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockSource {
    pub randomize: bool,
    pub seed: Option<u64>,
    pub video_dir: Option<PathBuf>,
    pub configuration_dir: Option<PathBuf>,
    pub washout_secs: u64,
}

/// Task description read from a TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub subject: String,
    pub session: String,
    pub task: String,
    pub output_dir: PathBuf,
    pub output_format: OutputFormat,
    pub instructions: Option<PathBuf>,
    pub layout: Layout,
    pub washout: WashoutConfig,
    pub trigger: TriggerConfig,
    pub blocks: BlockSource,
    /// Explicit `[[block]]` entries, played before any scanned ones.
    #[serde(rename = "block")]
    pub block_entries: Vec<Block>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            subject: "subject".into(),
            session: "1".into(),
            task: "Emotion Video".into(),
            output_dir: PathBuf::from("."),
            output_format: OutputFormat::default(),
            instructions: None,
            layout: Layout::default(),
            washout: WashoutConfig::default(),
            trigger: TriggerConfig::default(),
            blocks: BlockSource::default(),
            block_entries: Vec::new(),
        }
    }
}

impl TaskConfig {
    /// Reads and validates `path`. Relative paths inside the file are taken
    /// relative to the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.subject.trim().is_empty() {
            return Err(ConfigError::Invalid("subject must not be empty".into()));
        }
        if self.layout.block.is_empty() {
            return Err(ConfigError::Invalid("layout.block must name at least one stage".into()));
        }
        if self.layout.block.contains(&StageKind::Finish) {
            return Err(ConfigError::Invalid(
                "the finish stage cannot be part of a block".into(),
            ));
        }
        let secs = [Some(self.washout.base_secs), self.washout.closing_secs];
        if secs.into_iter().flatten().any(|s| !s.is_finite() || s < 0.0) {
            return Err(ConfigError::Invalid(
                "washout seconds must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.output_dir);
        self.instructions.iter_mut().for_each(resolve);
        self.blocks.video_dir.iter_mut().for_each(resolve);
        self.blocks.configuration_dir.iter_mut().for_each(resolve);
        for entry in &mut self.block_entries {
            resolve(&mut entry.video);
            entry.configuration.iter_mut().for_each(resolve);
        }
    }

    pub fn output_naming(&self) -> OutputNaming {
        OutputNaming {
            dir: self.output_dir.clone(),
            prefix: format!("{}_{}", self.subject, self.session),
            format: self.output_format,
        }
    }

    /// `{subject}_{session}_{YYYY-MM-DD_HH~MM~SS}.{csv|sqlite}` in the output
    /// directory.
    pub fn output_path(&self, now: NaiveDateTime) -> PathBuf {
        self.output_naming().path(now)
    }

    pub fn washout_policy(&self) -> WashoutPolicy {
        match self.washout.policy {
            WashoutMode::Direct => WashoutPolicy::Direct,
            WashoutMode::FromBase => WashoutPolicy::FromBase {
                base: Duration::from_secs_f64(self.washout.base_secs),
            },
        }
    }

    /// The session plan. The log file is named when each session starts.
    pub fn plan(&self) -> SessionPlan {
        SessionPlan {
            layout: self.layout.clone(),
            washout: self.washout_policy(),
            closing_washout: self.washout.closing_secs.map(Duration::from_secs_f64),
            trigger_on: self.trigger.on.clone(),
            instructions: self.instructions.clone(),
            output: Some(self.output_naming()),
            attributes: Fields::new()
                .with("Subject", self.subject.as_str())
                .with("Task", self.task.as_str())
                .with("Block", self.session.as_str()),
        }
    }

    /// Explicit entries followed by the directory scan, shuffled if asked.
    pub fn build_blocks(&self) -> Result<Vec<Block>, ConfigError> {
        let mut builder = BlockListBuilder::new()
            .blocks(self.block_entries.iter().cloned())
            .washout(Duration::from_secs(self.blocks.washout_secs));
        if let Some(dir) = &self.blocks.video_dir {
            builder = builder
                .scan_videos(dir)
                .map_err(|source| ConfigError::Read {
                    path: dir.clone(),
                    source,
                })?;
        }
        if let Some(dir) = &self.blocks.configuration_dir {
            builder = builder
                .scan_configurations(dir)
                .map_err(|source| ConfigError::Read {
                    path: dir.clone(),
                    source,
                })?;
        }
        if self.blocks.randomize {
            builder = builder.shuffle(self.blocks.seed);
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use behx_trigger::DeviceId;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"
subject = "S07"
session = "2"
task = "Emotion Categorization"
output_dir = "out"
output_format = "columnar"

[layout]
before = ["instructions", "washout"]

[washout]
policy = "from_base"
base_secs = 10.0

[trigger]
device = 3
on = ["video"]

[[block]]
video = "clips/joy.mp4"
configuration = "questions/joy.toml"
washout = 4
"#;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    #[test]
    fn parses_a_full_task() {
        let config = TaskConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.subject, "S07");
        assert_eq!(config.layout.before, [StageKind::Instructions, StageKind::Washout]);
        assert_eq!(config.layout.after, Layout::default().after);
        assert_eq!(config.trigger.settings.device, Some(DeviceId::Index(3)));
        assert_eq!(config.trigger.settings.samples, 22_000);
        assert_eq!(config.trigger.on, [StageKind::Video]);
        assert_eq!(config.block_entries.len(), 1);
    }

    #[test]
    fn output_path_follows_naming_scheme() {
        let config = TaskConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            config.output_path(stamp()),
            PathBuf::from("out/S07_2_2024-03-09_14~05~07.sqlite")
        );
    }

    #[test]
    fn plan_carries_policy_and_attributes() {
        let plan = TaskConfig::from_toml_str(SAMPLE).unwrap().plan();
        assert_eq!(
            plan.washout,
            WashoutPolicy::FromBase {
                base: Duration::from_secs(10)
            }
        );
        let output = plan.output.as_ref().unwrap().output(stamp());
        assert!(matches!(output, behx_log::LogOutput::Columnar(_)));
        assert!(plan.triggers(StageKind::Video));
        assert_eq!(
            plan.attributes.get("Subject").and_then(|v| v.as_str()),
            Some("S07")
        );
    }

    #[test]
    fn block_washout_is_read_in_seconds() {
        let config = TaskConfig::from_toml_str(
            "[[block]]\nvideo = \"a.mp4\"\nwashout = 2\n\n[[block]]\nvideo = \"b.mp4\"\nwashout_secs = 3\n",
        )
        .unwrap();
        let blocks = config.build_blocks().unwrap();
        assert_eq!(blocks[0].washout, Duration::from_secs(2));
        assert_eq!(blocks[1].washout, Duration::from_secs(3));
    }

    #[test]
    fn empty_block_layout_is_rejected() {
        let err = TaskConfig::from_toml_str("[layout]\nblock = []").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_stage_is_a_parse_error() {
        let err = TaskConfig::from_toml_str("[layout]\nblock = [\"slideshow\"]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = TaskConfig::load(&path).unwrap();
        assert_eq!(config.output_dir, dir.path().join("out"));
        assert_eq!(config.block_entries[0].video, dir.path().join("clips/joy.mp4"));
        let blocks = config.build_blocks().unwrap();
        assert_eq!(blocks[0].washout, Duration::from_secs(4));
        assert_eq!(blocks[0].configuration_name().as_deref(), Some("joy.toml"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = TaskConfig::load(Path::new("/nonexistent/task.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/task.toml"));
    }
}
