//! Pre-flight check of request size against the remaining context window.

use crate::types::Part;
use crate::util::tokens::estimate_tokens;

/// Percentage of the remaining window a single request may occupy.
pub const OVERFLOW_SAFETY_PERCENT: usize = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextWindowCheck {
    pub estimated_request_tokens: usize,
    pub remaining_tokens: usize,
}

impl ContextWindowCheck {
    /// Strictly greater than 95% of what remains.
    pub fn will_overflow(&self) -> bool {
        self.estimated_request_tokens.saturating_mul(100)
            > self.remaining_tokens.saturating_mul(OVERFLOW_SAFETY_PERCENT)
    }
}

/// Estimate `request` and compare it with `token_limit - last_prompt_tokens`.
pub fn check_request(
    request: &[Part],
    token_limit: usize,
    last_prompt_tokens: usize,
) -> ContextWindowCheck {
    ContextWindowCheck {
        estimated_request_tokens: estimate_tokens(request),
        remaining_tokens: token_limit.saturating_sub(last_prompt_tokens),
    }
}
