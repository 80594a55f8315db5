//! Context window guard and editor-context payloads.

pub mod guard;
pub mod ide;

pub use guard::{check_request, ContextWindowCheck};
pub use ide::{
    compute_payload, ActiveFile, CursorPosition, IdeContextMode, IdeContextPayload,
    IdeContextSnapshot, IdeContextSource,
};
