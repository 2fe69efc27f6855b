//! Normalized streaming events from the generation source
//!
//! Every upstream provider reduces to the same ordered, finite event
//! sequence: zero or more text deltas, then optionally one tool call, then
//! end of stream. The engine never sees provider wire formats.

use crossbeam_channel::Receiver;

use crate::messages::{Message, ToolCall};
use crate::Result;

/// Declared capability advertised to the model.
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

/// One event in a generation stream.
///
/// Ordering contract: all `TextDelta`s precede a `ToolCall` announcement,
/// which precedes `End`. A sender that fails mid-stream drops its channel
/// without sending `End`; the receiver treats the disconnect as a transport
/// failure.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A chunk of generated assistant text.
    TextDelta(String),

    /// The model requests a tool invocation; generation pauses until a tool
    /// result is appended to history and a continuation call is made.
    ToolCall(ToolCall),

    /// The stream completed normally.
    End,
}

/// Upstream generation source.
///
/// `begin_turn` starts one model call for the given history snapshot and
/// returns the ordered event stream. Dropping the receiver abandons the
/// call; implementations must tolerate that without corrupting anything.
pub trait ResponseSource: Send + Sync {
    fn begin_turn(
        &self,
        history: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<Receiver<StreamEvent>>;
}
