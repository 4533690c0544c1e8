use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

use crate::event::EventDraft;
use crate::stage::StageKind;

/// How a presenter finished (or reported progress).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionKind {
    Ok,
    Back,
    Timeout,
    Finish,
    /// Intermediate step inside a multi-page stage.
    Next,
    /// Answer selected, stage still active.
    Answer,
}

impl fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompletionKind::Ok => "ok",
            CompletionKind::Back => "back",
            CompletionKind::Timeout => "timeout",
            CompletionKind::Finish => "finish",
            CompletionKind::Next => "next",
            CompletionKind::Answer => "answer",
        };
        f.write_str(name)
    }
}

/// What the session does with a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handler {
    AdvanceWithinBlock,
    AdvanceBlock,
    AdvanceWithinBlockTrigger,
    AdvanceBlockTrigger,
    /// Append the event without moving the sequencer.
    Record,
    FinishSession,
    /// Abandon the session (participant backed out).
    Abort,
    #[default]
    Unbound,
}

impl Handler {
    /// The variant that also emits a hardware trigger.
    pub fn with_trigger(self) -> Self {
        match self {
            Handler::AdvanceWithinBlock => Handler::AdvanceWithinBlockTrigger,
            Handler::AdvanceBlock => Handler::AdvanceBlockTrigger,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("no handler bound for the {kind} completion of stage '{stage}'")]
    Unbound {
        stage: StageKind,
        kind: CompletionKind,
    },
}

/// One handler slot per completion kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompletionRoutes {
    pub ok: Handler,
    pub back: Handler,
    pub timeout: Handler,
    pub finish: Handler,
    pub next: Handler,
    pub answer: Handler,
}

impl CompletionRoutes {
    /// Routes every terminal completion to `handler`; intermediate steps are
    /// recorded and `back` stays unbound.
    pub fn terminal(handler: Handler) -> Self {
        Self {
            ok: handler,
            back: Handler::Unbound,
            timeout: handler,
            finish: handler,
            next: Handler::Record,
            answer: Handler::Record,
        }
    }

    pub fn with(mut self, kind: CompletionKind, handler: Handler) -> Self {
        *self.slot_mut(kind) = handler;
        self
    }

    pub fn get(&self, kind: CompletionKind) -> Handler {
        match kind {
            CompletionKind::Ok => self.ok,
            CompletionKind::Back => self.back,
            CompletionKind::Timeout => self.timeout,
            CompletionKind::Finish => self.finish,
            CompletionKind::Next => self.next,
            CompletionKind::Answer => self.answer,
        }
    }

    pub fn resolve(&self, stage: StageKind, kind: CompletionKind) -> Result<Handler, CompletionError> {
        match self.get(kind) {
            Handler::Unbound => Err(CompletionError::Unbound { stage, kind }),
            handler => Ok(handler),
        }
    }

    fn slot_mut(&mut self, kind: CompletionKind) -> &mut Handler {
        match kind {
            CompletionKind::Ok => &mut self.ok,
            CompletionKind::Back => &mut self.back,
            CompletionKind::Timeout => &mut self.timeout,
            CompletionKind::Finish => &mut self.finish,
            CompletionKind::Next => &mut self.next,
            CompletionKind::Answer => &mut self.answer,
        }
    }
}

/// A completion posted by a presenter, tagged with the run it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSignal {
    pub generation: u64,
    pub index: usize,
    pub caller: StageKind,
    pub kind: CompletionKind,
    pub event: EventDraft,
}

/// Callback handle bound to a single stage run.
#[derive(Debug, Clone)]
pub struct Completion {
    tx: Sender<StageSignal>,
    generation: u64,
    index: usize,
    caller: StageKind,
}

impl Completion {
    pub fn new(tx: Sender<StageSignal>, generation: u64, index: usize, caller: StageKind) -> Self {
        Self {
            tx,
            generation,
            index,
            caller,
        }
    }

    /// A handle with its own channel, for driving a presenter in isolation.
    pub fn detached(caller: StageKind) -> (Self, Receiver<StageSignal>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx, 0, 0, caller), rx)
    }

    pub fn caller(&self) -> StageKind {
        self.caller
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns false when the session that issued this handle is gone.
    pub fn signal(&self, kind: CompletionKind, event: EventDraft) -> bool {
        self.tx
            .send(StageSignal {
                generation: self.generation,
                index: self.index,
                caller: self.caller,
                kind,
                event,
            })
            .is_ok()
    }

    pub fn ok(&self, event: EventDraft) -> bool {
        self.signal(CompletionKind::Ok, event)
    }

    pub fn back(&self, event: EventDraft) -> bool {
        self.signal(CompletionKind::Back, event)
    }

    pub fn timeout(&self, event: EventDraft) -> bool {
        self.signal(CompletionKind::Timeout, event)
    }

    pub fn finish(&self, event: EventDraft) -> bool {
        self.signal(CompletionKind::Finish, event)
    }

    pub fn next(&self, event: EventDraft) -> bool {
        self.signal(CompletionKind::Next, event)
    }

    pub fn answer(&self, event: EventDraft) -> bool {
        self.signal(CompletionKind::Answer, event)
    }
}
