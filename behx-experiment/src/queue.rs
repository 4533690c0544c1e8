use behx_core::{Block, BlockId};
use std::collections::VecDeque;

/// Tracks which blocks are waiting, which one is playing and which are done.
/// Every loaded block is in exactly one of the three collections.
#[derive(Debug, Default, Clone)]
pub struct BlockQueue {
    blocks: Vec<Block>,
    queued: VecDeque<BlockId>,
    playing: Option<BlockId>,
    completed: Vec<BlockId>,
}

impl BlockQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the block list; everything starts out queued, in order.
    pub fn load(&mut self, blocks: Vec<Block>) {
        self.blocks = blocks;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.queued = (0..self.blocks.len()).map(BlockId).collect();
        self.playing = None;
        self.completed.clear();
    }

    /// Retires the playing block and promotes the head of the queue. Returns
    /// false once nothing is left to play.
    pub fn next_queue(&mut self) -> bool {
        if let Some(done) = self.playing.take() {
            self.completed.push(done);
        }
        self.playing = self.queued.pop_front();
        self.playing.is_some()
    }

    pub fn queued(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.queued.iter().copied()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn playing(&self) -> Option<BlockId> {
        self.playing
    }

    pub fn completed(&self) -> &[BlockId] {
        &self.completed
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn playing_block(&self) -> Option<&Block> {
        self.playing.and_then(|id| self.block(id))
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn total(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_consistent(&self) -> bool {
        let mut seen = vec![false; self.blocks.len()];
        let all = self
            .queued
            .iter()
            .chain(self.playing.iter())
            .chain(self.completed.iter());
        for id in all {
            match seen.get_mut(id.0) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        seen.into_iter().all(|s| s)
    }
}
