//! Utility modules: retry and token estimation.

pub mod retry;
pub mod tokens;
