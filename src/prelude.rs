//! Convenience re-exports for common use.

pub use crate::chat::Chat;
pub use crate::compression::{CompressionResult, CompressionStatus};
pub use crate::config::{AuthType, RetrySettings, SessionConfig};
pub use crate::context::{IdeContextSnapshot, IdeContextSource};
pub use crate::error::{ParleyError, Result};
pub use crate::provider::ContentGenerator;
pub use crate::routing::{ModelRouter, RoutingContext, RoutingDecision};
pub use crate::session::{
    SessionEvent, SessionOrchestrator, Turn, TurnEvent, TurnExecutor, MAX_TURNS,
};
pub use crate::types::{Content, GenerateRequest, GenerateResponse, Part, Role};
pub use crate::util::retry::{FallbackHandler, FallbackIntent};
pub use tokio_util::sync::CancellationToken;
