//! Server-Sent Events parsing for the streaming chat endpoint
//!
//! Converts raw response chunks into [`SseEvent`]s, handling events split
//! across chunk boundaries, multi-line `data:` fields, comment lines and
//! the `[DONE]` sentinel.

/// A parsed Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event type (from `event:`), if any.
    pub event_type: Option<String>,
    /// The data payload; multiple `data:` lines are joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// Whether this event is the `[DONE]` end-of-stream sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental SSE parser fed with arbitrary chunks of response text.
#[derive(Debug, Default)]
pub struct SseLineParser {
    /// Partial line carried over from the previous chunk.
    partial_line: String,
    event_type: Option<String>,
    data_lines: Vec<String>,
}

impl SseLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut events = Vec::new();

        for c in chunk.chars() {
            if c == '\n' {
                let line = std::mem::take(&mut self.partial_line);
                if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                    events.push(event);
                }
            } else {
                self.partial_line.push(c);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        // Empty line marks the event boundary.
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            return Some(SseEvent {
                event_type: self.event_type.take(),
                data: std::mem::take(&mut self.data_lines).join("\n"),
            });
        }

        // Comment line.
        if line.starts_with(':') {
            return None;
        }

        if let Some((field, value)) = parse_field(line) {
            match field {
                "data" => self.data_lines.push(value.to_string()),
                "event" => self.event_type = Some(value.to_string()),
                // Unknown fields are ignored per the SSE spec.
                _ => {}
            }
        }

        None
    }
}

/// Split a line into (field, value), stripping the single optional space
/// after the colon.
fn parse_field(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let field = &line[..colon];
    let value = line[colon + 1..].strip_prefix(' ').unwrap_or(&line[colon + 1..]);
    Some((field, value))
}
