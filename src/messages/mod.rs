pub mod types;

pub use types::{History, Message, Role, ToolCall};
