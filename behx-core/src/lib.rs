pub mod block;
pub mod completion;
pub mod event;
pub mod stage;

pub use block::{Block, BlockId};
pub use completion::{
    Completion, CompletionError, CompletionKind, CompletionRoutes, Handler, StageSignal,
};
pub use event::{EventDraft, EventRecord, FieldValue, Fields};
pub use stage::{PresentError, Presenter, StageArgs, StageKind};
