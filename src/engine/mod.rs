//! Conversation engine: the root of the streaming pipeline
//!
//! Owns the conversation history, drives streaming turns, interleaves tool
//! calls, and feeds the sentence segmenter and synthesis queue.

pub mod conversation;
pub mod segmenter;

pub use conversation::{
    ConversationEngine, EngineCommand, EngineConfig, EngineEvent, EngineHandle, EngineState,
    APOLOGY_SENTENCE,
};
pub use segmenter::{segment_all, Sentence, SentenceSegmenter};
