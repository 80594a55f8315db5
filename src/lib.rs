//! Parley: conversation orchestration for tool-using agent sessions.
//!
//! A [`session::SessionOrchestrator`] turns one request into an ordered stream of
//! events. Around each streamed model call it enforces the session turn budget,
//! guards the context window, compresses history, injects editor context, pins a
//! routed model for the sequence, and decides whether the model keeps speaking.
//! One-shot calls (summaries, classification) go through a retry coordinator
//! that backs off on transient failures and falls back to a cheaper model on
//! persistent quota exhaustion.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use parley::prelude::*;
//!
//! # async fn example(
//! #     generator: Arc<dyn ContentGenerator>,
//! #     executor: Arc<dyn TurnExecutor>,
//! # ) -> parley::error::Result<()> {
//! let mut session = SessionOrchestrator::builder(SessionConfig::from_env()?)
//!     .with_generator(generator)
//!     .with_turn_executor(executor)
//!     .build()?;
//!
//! let events = session
//!     .send_message(vec![Part::text("Hello!")], CancellationToken::new(), "prompt-1", MAX_TURNS)
//!     .await;
//! for event in events {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod prelude;
pub mod provider;
pub mod routing;
pub mod session;
pub mod types;
pub mod util;
