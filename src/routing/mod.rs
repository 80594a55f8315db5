//! Model routing: picks a concrete model for a sequence.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{is_auto, DEFAULT_MODEL};
use crate::types::{Content, Part};

/// Inputs available to a routing decision.
#[derive(Debug, Clone, Copy)]
pub struct RoutingContext<'a> {
    pub history: &'a [Content],
    pub request: &'a [Part],
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub model: String,
    /// Human-readable source of the decision, for logs.
    pub reason: String,
}

impl RoutingDecision {
    pub fn new(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            reason: reason.into(),
        }
    }
}

/// Maps a request to a model identifier.
#[async_trait]
pub trait ModelRouter: Send + Sync {
    async fn route(&self, context: RoutingContext<'_>) -> Result<RoutingDecision>;
}

/// Routes to the configured model, resolving `auto` to the default model.
#[derive(Debug, Clone)]
pub struct DefaultRouter {
    model: String,
}

impl DefaultRouter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl ModelRouter for DefaultRouter {
    async fn route(&self, _context: RoutingContext<'_>) -> Result<RoutingDecision> {
        if is_auto(&self.model) {
            Ok(RoutingDecision::new(DEFAULT_MODEL, "auto resolved to default"))
        } else {
            Ok(RoutingDecision::new(self.model.clone(), "configured model"))
        }
    }
}
