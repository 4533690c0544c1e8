use behx_core::{PresentError, StageArgs, StageKind};
use thiserror::Error;

/// One slot of the sequence: which presenter runs and with what arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct StageEntry {
    pub stage: StageKind,
    pub args: StageArgs,
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("sequence exhausted")]
    Exhausted,

    #[error("stage {index} ({stage}) failed to start: {source}")]
    Stage {
        index: usize,
        stage: StageKind,
        #[source]
        source: PresentError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Uninitialized,
    Ready,
    Running(usize),
    Exhausted,
}

/// Whatever actually starts a stage when the sequencer lands on it.
pub trait StageRunner {
    fn run_stage(&mut self, index: usize, entry: &StageEntry) -> Result<(), PresentError>;
}

/// Ordered list of stages with a cursor.
///
/// Entries may be inserted or removed while a stage is running. The cursor
/// is a position, not a reference to an entry: changing the list before it
/// shifts what "current" refers to. It is only pulled back when a removal
/// would leave it past the end.
#[derive(Debug, Default)]
pub struct Sequencer {
    sequence: Vec<StageEntry>,
    index: Option<usize>,
    looping: bool,
    exhausted: bool,
    /// Set by the first `clear()` or `start()`.
    initialized: bool,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts at `position` (appending when `None` or past the end) and
    /// returns where the entry landed.
    pub fn insert(&mut self, stage: StageKind, position: Option<usize>, args: StageArgs) -> usize {
        let entry = StageEntry { stage, args };
        match position {
            Some(i) if i < self.sequence.len() => {
                self.sequence.insert(i, entry);
                i
            }
            _ => {
                self.sequence.push(entry);
                self.sequence.len() - 1
            }
        }
    }

    pub fn remove(&mut self, i: usize) -> Option<StageEntry> {
        if i >= self.sequence.len() {
            return None;
        }
        let entry = self.sequence.remove(i);
        self.clamp_index();
        Some(entry)
    }

    pub fn pop(&mut self) -> Option<StageEntry> {
        let entry = self.sequence.pop()?;
        self.clamp_index();
        Some(entry)
    }

    fn clamp_index(&mut self) {
        if let Some(i) = self.index {
            self.index = match self.sequence.len() {
                0 => None,
                len => Some(i.min(len - 1)),
            };
        }
    }

    pub fn clear(&mut self) {
        self.sequence.clear();
        self.index = None;
        self.exhausted = false;
        self.initialized = true;
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn entries(&self) -> &[StageEntry] {
        &self.sequence
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn current(&self) -> Option<(usize, &StageEntry)> {
        let i = self.index?;
        self.sequence.get(i).map(|e| (i, e))
    }

    /// Position after the cursor, wrapping to 0 past the end.
    pub fn next_index(&self) -> usize {
        match self.index {
            Some(i) if i + 1 < self.sequence.len() => i + 1,
            _ => 0,
        }
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn state(&self) -> SequencerState {
        match self.index {
            _ if self.exhausted => SequencerState::Exhausted,
            Some(i) => SequencerState::Running(i),
            None if self.sequence.is_empty() && !self.initialized => {
                SequencerState::Uninitialized
            }
            None => SequencerState::Ready,
        }
    }

    pub fn start(&mut self, runner: &mut impl StageRunner) -> Result<usize, SequenceError> {
        self.initialized = true;
        if self.sequence.is_empty() {
            self.exhausted = true;
            return Err(SequenceError::Exhausted);
        }
        self.exhausted = false;
        self.index = Some(0);
        self.run_current(runner)
    }

    /// Moves the cursor forward and runs the stage it lands on. Without
    /// looping, stepping past the last entry reports `Exhausted` and runs
    /// nothing.
    pub fn advance(&mut self, runner: &mut impl StageRunner) -> Result<usize, SequenceError> {
        if self.sequence.is_empty() {
            self.exhausted = true;
            return Err(SequenceError::Exhausted);
        }
        if let Some(i) = self.index {
            if i + 1 >= self.sequence.len() && !self.looping {
                self.exhausted = true;
                return Err(SequenceError::Exhausted);
            }
        }
        self.exhausted = false;
        self.index = Some(self.next_index());
        self.run_current(runner)
    }

    /// Moves the cursor without running anything.
    pub fn skip(&mut self) -> Option<usize> {
        if self.sequence.is_empty() {
            return None;
        }
        let next = self.next_index();
        self.index = Some(next);
        Some(next)
    }

    fn run_current(&mut self, runner: &mut impl StageRunner) -> Result<usize, SequenceError> {
        let Some((index, entry)) = self.current() else {
            return Err(SequenceError::Exhausted);
        };
        runner
            .run_stage(index, entry)
            .map_err(|source| SequenceError::Stage {
                index,
                stage: entry.stage,
                source,
            })?;
        Ok(index)
    }
}
