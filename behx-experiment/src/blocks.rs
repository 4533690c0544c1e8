use behx_core::Block;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const VIDEO_EXTENSIONS: [&str; 6] = ["avi", "mp4", "ogg", "qt", "wmv", "yuv"];
pub const CONFIGURATION_EXTENSIONS: [&str; 1] = ["toml"];

/// Files in `dir` whose extension is one of `extensions` (any case), sorted
/// by path.
pub fn scan(dir: &Path, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Assembles the session's block list before it is loaded.
#[derive(Debug, Default)]
pub struct BlockListBuilder {
    blocks: Vec<Block>,
    videos: Vec<PathBuf>,
    configurations: Vec<PathBuf>,
    washout: Duration,
    shuffle: Option<Option<u64>>,
}

impl BlockListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(mut self, blocks: impl IntoIterator<Item = Block>) -> Self {
        self.blocks.extend(blocks);
        self
    }

    pub fn videos(mut self, videos: Vec<PathBuf>) -> Self {
        self.videos = videos;
        self
    }

    pub fn configurations(mut self, configurations: Vec<PathBuf>) -> Self {
        self.configurations = configurations;
        self
    }

    pub fn scan_videos(self, dir: &Path) -> io::Result<Self> {
        Ok(self.videos(scan(dir, &VIDEO_EXTENSIONS)?))
    }

    pub fn scan_configurations(self, dir: &Path) -> io::Result<Self> {
        Ok(self.configurations(scan(dir, &CONFIGURATION_EXTENSIONS)?))
    }

    /// Washout given to blocks built from scanned videos.
    pub fn washout(mut self, washout: Duration) -> Self {
        self.washout = washout;
        self
    }

    /// Randomizes the final order; a seed makes it reproducible.
    pub fn shuffle(mut self, seed: Option<u64>) -> Self {
        self.shuffle = Some(seed);
        self
    }

    /// Explicit blocks first, then one block per scanned video paired with the
    /// configuration at the same position.
    pub fn build(self) -> Vec<Block> {
        let mut blocks = self.blocks;
        let mut configurations = self.configurations.into_iter();
        for video in self.videos {
            let block = Block::new(video, self.washout);
            blocks.push(match configurations.next() {
                Some(cfg) => block.with_configuration(cfg),
                None => block,
            });
        }
        match self.shuffle {
            Some(Some(seed)) => blocks.shuffle(&mut StdRng::seed_from_u64(seed)),
            Some(None) => blocks.shuffle(&mut rand::rng()),
            None => {}
        }
        blocks
    }
}
