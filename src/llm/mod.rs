//! Upstream generation source: streaming chat completions
//!
//! The engine consumes an ordered sequence of [`StreamEvent`]s and does not
//! care how they are produced; [`ChatClient`] is the HTTP implementation.

pub mod client;
pub mod config;
pub mod events;
pub mod sse;

pub use client::ChatClient;
pub use config::LlmConfig;
pub use events::{ResponseSource, StreamEvent, ToolDeclaration};
