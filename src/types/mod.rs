//! Core types for Parley.

pub mod content;
pub mod generation;

pub use content::*;
pub use generation::*;
