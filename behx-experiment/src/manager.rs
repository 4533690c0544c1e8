use behx_core::{
    Block, BlockId, Completion, CompletionError, CompletionKind, CompletionRoutes, EventDraft,
    Fields, Handler, PresentError, Presenter, StageArgs, StageKind, StageSignal,
};
use behx_log::{EventLog, LogError};
use behx_timing::SessionClock;
use chrono::Local;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;
use thiserror::Error;

use crate::plan::SessionPlan;
use crate::queue::BlockQueue;
use crate::sequencer::{SequenceError, Sequencer, StageEntry, StageRunner};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is running")]
    Running,

    #[error("no block is playing")]
    NoPlayingBlock,

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("stage {index} ({stage}) failed: {source}")]
    Stage {
        index: usize,
        stage: StageKind,
        #[source]
        source: PresentError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Finished,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// A stage as it was actually run.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRun {
    pub index: usize,
    pub stage: StageKind,
    pub args: StageArgs,
}

/// The presenter set. Hands every stage run a `Completion` stamped with the
/// current generation and sequence position.
pub struct Stages {
    presenters: HashMap<StageKind, Box<dyn Presenter>>,
    tx: Sender<StageSignal>,
    generation: u64,
    active: Option<StageKind>,
    history: Vec<StageRun>,
}

impl Stages {
    fn new(tx: Sender<StageSignal>) -> Self {
        Self {
            presenters: HashMap::new(),
            tx,
            generation: 0,
            active: None,
            history: Vec::new(),
        }
    }

    /// Registers `presenter` for `kind`, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: StageKind,
        presenter: Box<dyn Presenter>,
    ) -> Option<Box<dyn Presenter>> {
        self.presenters.insert(kind, presenter)
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.presenters.contains_key(&kind)
    }

    pub fn active(&self) -> Option<StageKind> {
        self.active
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn bump(&mut self) {
        self.generation += 1;
    }

    pub fn halt_active(&mut self) {
        if let Some(kind) = self.active.take() {
            if let Some(presenter) = self.presenters.get_mut(&kind) {
                tracing::debug!(stage = %kind, "halting stage");
                presenter.halt();
            }
        }
    }

    pub fn halt_all(&mut self) {
        for presenter in self.presenters.values_mut() {
            presenter.halt();
        }
        self.active = None;
    }
}

impl StageRunner for Stages {
    fn run_stage(&mut self, index: usize, entry: &StageEntry) -> Result<(), PresentError> {
        let presenter = self
            .presenters
            .get_mut(&entry.stage)
            .ok_or(PresentError::Unsupported(entry.stage))?;
        tracing::debug!(index, stage = %entry.stage, "running stage");
        let done = Completion::new(self.tx.clone(), self.generation, index, entry.stage);
        self.active = Some(entry.stage);
        self.history.push(StageRun {
            index,
            stage: entry.stage,
            args: entry.args.clone(),
        });
        presenter.run(&entry.args, done)
    }
}

/// Turns the block list into sequencer insertions and reacts to presenter
/// completions. Sole owner of the sequencer, the block queue and the log.
pub struct BlockQueueManager<C: SessionClock> {
    plan: SessionPlan,
    sequencer: Sequencer,
    queue: BlockQueue,
    log: EventLog<C>,
    stages: Stages,
    signals: Receiver<StageSignal>,
    state: SessionState,
    trailing_queued: bool,
}

impl<C: SessionClock> BlockQueueManager<C> {
    pub fn new(plan: SessionPlan, log: EventLog<C>) -> Self {
        let (tx, signals) = mpsc::channel();
        Self {
            plan,
            sequencer: Sequencer::new(),
            queue: BlockQueue::new(),
            log,
            stages: Stages::new(tx),
            signals,
            state: SessionState::Idle,
            trailing_queued: false,
        }
    }

    pub fn plan(&self) -> &SessionPlan {
        &self.plan
    }

    pub fn log(&self) -> &EventLog<C> {
        &self.log
    }

    pub fn queue(&self) -> &BlockQueue {
        &self.queue
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn stages_mut(&mut self) -> &mut Stages {
        &mut self.stages
    }

    /// Stages run since the session started, in order.
    pub fn history(&self) -> &[StageRun] {
        &self.stages.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn load(&mut self, blocks: Vec<Block>) {
        tracing::info!(blocks = blocks.len(), "blocks loaded");
        self.queue.load(blocks);
    }

    pub fn start(&mut self) -> Result<StartOutcome, SessionError> {
        if self.is_running() {
            return Ok(StartOutcome::AlreadyRunning);
        }
        self.stages.halt_all();
        self.stages.bump();
        self.stages.history.clear();
        while self.signals.try_recv().is_ok() {}
        self.sequencer.clear();
        self.queue.reset();
        self.log.clear();
        self.trailing_queued = false;
        self.state = SessionState::Running;

        if let Err(e) = self.open_log() {
            self.state = SessionState::Failed;
            return Err(e);
        }
        if let Err(e) = self.log.trigger_mut().prepare() {
            tracing::warn!(error = %e, "hardware trigger unavailable; trigger records will be degraded");
        }
        self.log.set_time()?;
        tracing::info!(blocks = self.queue.total(), "session started");

        self.insert_leading();
        if self.sequencer.is_empty() {
            self.queue_next_block()?;
        }
        let started = self.sequencer.start(&mut self.stages);
        self.settle(started)?;
        Ok(StartOutcome::Started)
    }

    fn open_log(&mut self) -> Result<(), SessionError> {
        for (name, value) in self.plan.attributes.iter() {
            self.log.set_attribute(name, value.clone())?;
        }
        if let Some(naming) = &self.plan.output {
            let started = self.log.clock().wallclock().with_timezone(&Local).naive_local();
            let output = naming.output(started);
            self.log.open(output)?;
        }
        Ok(())
    }

    /// Ends a running session early, keeping what was recorded. Returns false
    /// when nothing was running.
    pub fn stop(&mut self) -> Result<bool, SessionError> {
        if !self.is_running() {
            return Ok(false);
        }
        self.stages.halt_all();
        self.stages.bump();
        self.sequencer.clear();
        self.state = SessionState::Stopped;
        self.queue.reset();
        let appended = self.log.append("ManualStop", Fields::new());
        let persisted = self.persist_log();
        tracing::info!("session stopped");
        appended?;
        persisted?;
        Ok(true)
    }

    /// Discards the record and requeues every block. Refused while running.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.is_running() {
            return Err(SessionError::Running);
        }
        self.log.clear();
        self.sequencer.clear();
        self.queue.reset();
        self.stages.history.clear();
        self.trailing_queued = false;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Handles every pending presenter signal in arrival order. Returns how
    /// many were taken off the channel.
    pub fn drain(&mut self) -> Result<usize, SessionError> {
        let mut handled = 0;
        while let Ok(signal) = self.signals.try_recv() {
            handled += 1;
            self.handle(signal)?;
        }
        Ok(handled)
    }

    pub fn handle(&mut self, signal: StageSignal) -> Result<(), SessionError> {
        if !self.is_current(&signal) {
            tracing::debug!(
                stage = %signal.caller,
                kind = %signal.kind,
                index = signal.index,
                generation = signal.generation,
                "dropping stale signal"
            );
            return Ok(());
        }
        let handler = match self.sequencer.entries().get(signal.index) {
            Some(entry) => entry.args.routes.resolve(signal.caller, signal.kind)?,
            None => return Ok(()),
        };
        let dispatched = self.dispatch(handler, signal);
        self.fail_on_log(dispatched)
    }

    /// A log that stops recording ends the session as failed; otherwise it
    /// would wait forever on a stage that has already completed.
    fn fail_on_log(&mut self, result: Result<(), SessionError>) -> Result<(), SessionError> {
        if let Err(SessionError::Log(e)) = &result {
            if self.is_running() {
                tracing::error!(error = %e, "event log failed; ending session");
                if let Err(persist) = self.end(SessionState::Failed) {
                    tracing::warn!(error = %persist, "persisting the failed session failed");
                }
            }
        }
        result
    }

    fn is_current(&self, signal: &StageSignal) -> bool {
        self.is_running()
            && signal.generation == self.stages.generation
            && self.sequencer.index() == Some(signal.index)
            && self
                .sequencer
                .entries()
                .get(signal.index)
                .is_some_and(|e| e.stage == signal.caller)
    }

    fn dispatch(&mut self, handler: Handler, signal: StageSignal) -> Result<(), SessionError> {
        let event = signal.event;
        match handler {
            Handler::AdvanceWithinBlock => self.advance_within_block(event),
            Handler::AdvanceBlock => self.advance_block(event),
            Handler::AdvanceWithinBlockTrigger => {
                self.trigger_for(&event)?;
                self.advance_within_block(event)
            }
            Handler::AdvanceBlockTrigger => {
                self.trigger_for(&event)?;
                self.advance_block(event)
            }
            Handler::Record => {
                self.log.append(&event.kind, event.fields)?;
                Ok(())
            }
            Handler::FinishSession => self.finish(event),
            Handler::Abort => self.abort(event),
            Handler::Unbound => Err(CompletionError::Unbound {
                stage: signal.caller,
                kind: signal.kind,
            }
            .into()),
        }
    }

    fn trigger_for(&mut self, event: &EventDraft) -> Result<(), SessionError> {
        let mut fields = Fields::new().with("SubType", event.kind.as_str());
        fields.extend(event.fields.clone());
        self.log.trigger_event(fields)?;
        Ok(())
    }

    /// Records `event` and moves on to the next stage.
    pub fn advance_within_block(&mut self, event: EventDraft) -> Result<(), SessionError> {
        self.log.append(&event.kind, event.fields)?;
        let advanced = self.sequencer.advance(&mut self.stages);
        self.settle(advanced)
    }

    /// Retires the playing block, queues the stages of the next one (or the
    /// trailing stages once the queue is empty), then records `event` and
    /// moves on.
    pub fn advance_block(&mut self, event: EventDraft) -> Result<(), SessionError> {
        self.queue_next_block()?;
        self.advance_within_block(event)
    }

    fn queue_next_block(&mut self) -> Result<(), SessionError> {
        if self.next_queue() {
            self.next_block()
        } else {
            self.insert_trailing();
            Ok(())
        }
    }

    pub fn next_queue(&mut self) -> bool {
        let more = self.queue.next_queue();
        match self.queue.playing() {
            Some(id) => tracing::info!(block = %id, remaining = self.queue.queued_len(), "next block"),
            None => tracing::info!(completed = self.queue.completed().len(), "all blocks played"),
        }
        more
    }

    /// Appends the playing block's stages per the block layout.
    pub fn next_block(&mut self) -> Result<(), SessionError> {
        let id = self.queue.playing().ok_or(SessionError::NoPlayingBlock)?;
        let block = self
            .queue
            .block(id)
            .cloned()
            .ok_or(SessionError::NoPlayingBlock)?;
        let washout = self.plan.washout.apply(block.washout);
        let stages = self.plan.layout.block.clone();
        let last = stages.len().saturating_sub(1);
        for (i, stage) in stages.into_iter().enumerate() {
            let handler = if i == last {
                Handler::AdvanceBlock
            } else {
                Handler::AdvanceWithinBlock
            };
            let args = self
                .stage_args(stage, CompletionRoutes::terminal(self.routed(stage, handler)), washout)
                .block(id);
            let args = match stage {
                StageKind::Video => args.path(block.video.clone()),
                StageKind::Questionnaire | StageKind::Rating => match &block.configuration {
                    Some(path) => args.path(path.clone()),
                    None => args,
                },
                _ => args,
            };
            self.sequencer.insert(stage, None, args);
        }
        Ok(())
    }

    fn insert_leading(&mut self) {
        let stages = self.plan.layout.before.clone();
        let last = stages.len().saturating_sub(1);
        let washout = self.plan.washout.apply(Duration::ZERO);
        for (i, stage) in stages.into_iter().enumerate() {
            let handler = if i == last {
                Handler::AdvanceBlock
            } else {
                Handler::AdvanceWithinBlock
            };
            let mut routes = CompletionRoutes::terminal(self.routed(stage, handler));
            if i == 0 {
                routes = routes.with(CompletionKind::Back, Handler::Abort);
            }
            let args = self.stage_args(stage, routes, washout);
            self.sequencer.insert(stage, None, args);
        }
    }

    fn insert_trailing(&mut self) {
        if self.trailing_queued {
            return;
        }
        self.trailing_queued = true;
        let washout = self.closing_washout();
        for stage in self.plan.layout.after.clone() {
            let handler = match stage {
                StageKind::Finish => Handler::FinishSession,
                _ => self.routed(stage, Handler::AdvanceWithinBlock),
            };
            let args = self.stage_args(stage, CompletionRoutes::terminal(handler), washout);
            self.sequencer.insert(stage, None, args);
        }
    }

    /// Washout shown before the trailing stages.
    pub fn closing_washout(&self) -> Duration {
        self.plan.closing_washout.unwrap_or_else(|| {
            let last = self
                .queue
                .last_block()
                .map(|b| b.washout)
                .unwrap_or(Duration::ZERO);
            self.plan.washout.apply(last)
        })
    }

    fn routed(&self, stage: StageKind, handler: Handler) -> Handler {
        if self.plan.triggers(stage) {
            handler.with_trigger()
        } else {
            handler
        }
    }

    fn stage_args(&self, stage: StageKind, routes: CompletionRoutes, washout: Duration) -> StageArgs {
        let args = StageArgs::new(routes);
        match stage {
            StageKind::Washout => args.duration(washout),
            StageKind::Instructions => match &self.plan.instructions {
                Some(path) => args.path(path.clone()),
                None => args,
            },
            _ => args,
        }
    }

    /// Halts the playing media and jumps to the end of the current block,
    /// recording a `Skip`. Does nothing outside a block.
    pub fn skip_action(&mut self) -> Result<bool, SessionError> {
        if !self.is_running() || self.trailing_queued {
            return Ok(false);
        }
        let Some(block) = self.queue.playing_block() else {
            return Ok(false);
        };
        let event = EventDraft::new("Skip").with("Video", block.video_name());
        self.stages.halt_active();
        self.stages.bump();
        while self.sequencer.next_index() != 0 {
            self.sequencer.skip();
        }
        tracing::info!(video = ?event.fields.get("Video"), "block skipped");
        let advanced = self.advance_block(event);
        self.fail_on_log(advanced)?;
        Ok(true)
    }

    fn finish(&mut self, event: EventDraft) -> Result<(), SessionError> {
        self.log.append(&event.kind, event.fields)?;
        self.end(SessionState::Finished)
    }

    fn abort(&mut self, event: EventDraft) -> Result<(), SessionError> {
        self.log.append(&event.kind, event.fields)?;
        tracing::info!("participant backed out");
        self.stop().map(|_| ())
    }

    fn end(&mut self, state: SessionState) -> Result<(), SessionError> {
        self.stages.halt_all();
        self.state = state;
        tracing::info!(state = ?state, records = self.log.len(), "session ended");
        self.persist_log().map(|_| ())
    }

    fn persist_log(&mut self) -> Result<Option<PathBuf>, SessionError> {
        if self.log.output().is_none() {
            tracing::debug!("no log output configured; record kept in memory");
            return Ok(None);
        }
        Ok(Some(self.log.persist()?))
    }

    /// Folds the outcome of a sequencer step into the session state.
    fn settle(&mut self, step: Result<usize, SequenceError>) -> Result<(), SessionError> {
        match step {
            Ok(_) => Ok(()),
            Err(SequenceError::Exhausted) => {
                tracing::info!("sequence exhausted without a finish stage");
                self.end(SessionState::Finished)
            }
            Err(SequenceError::Stage {
                index,
                stage,
                source,
            }) => {
                tracing::error!(index, stage = %stage, error = %source, "stage failed to start");
                let fields = Fields::new()
                    .with("Stage", stage.as_str())
                    .with("Index", index)
                    .with("Reason", source.to_string());
                let appended = self.log.append("StageFailed", fields);
                let ended = self.end(SessionState::Failed);
                appended?;
                ended?;
                Err(SessionError::Stage {
                    index,
                    stage,
                    source,
                })
            }
        }
    }

    /// The stage currently presenting, if any.
    pub fn active_stage(&self) -> Option<StageKind> {
        self.stages.active()
    }

    pub fn playing(&self) -> Option<(BlockId, &Block)> {
        let id = self.queue.playing()?;
        self.queue.block(id).map(|b| (id, b))
    }
}
