//! Streaming chat-completions client
//!
//! Implements [`ResponseSource`] against an OpenAI-compatible
//! `/v1/chat/completions` endpoint with `stream: true`. Each turn runs on
//! its own worker thread with a dedicated Tokio runtime; the engine only
//! ever sees the ordered [`StreamEvent`] channel.

use crossbeam_channel::{bounded, Receiver, Sender};
use futures::StreamExt;
use serde::Deserialize;
use tokio::runtime::Runtime;
use tracing::{debug, error, warn};

use crate::llm::config::LlmConfig;
use crate::llm::events::{ResponseSource, StreamEvent, ToolDeclaration};
use crate::llm::sse::SseLineParser;
use crate::messages::{Message, ToolCall};
use crate::{MurmurError, Result};

/// Buffered events between the HTTP worker and the engine.
const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Streaming chat client for OpenAI-compatible endpoints.
pub struct ChatClient {
    config: LlmConfig,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

impl ResponseSource for ChatClient {
    fn begin_turn(
        &self,
        history: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<Receiver<StreamEvent>> {
        let (event_tx, event_rx) = bounded(STREAM_CHANNEL_CAPACITY);
        let config = self.config.clone();
        let body = build_request(&config, history, tools);

        std::thread::spawn(move || {
            let runtime = match Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create tokio runtime for chat stream: {}", e);
                    // Dropping the sender without End signals transport failure.
                    return;
                }
            };

            if let Err(e) = runtime.block_on(stream_turn(&config, body, &event_tx)) {
                error!("Chat stream failed: {}", e);
            }
        });

        Ok(event_rx)
    }
}

/// Run one streaming request, forwarding normalized events.
///
/// On any transport failure the sender is dropped without `End`, which the
/// engine treats as a recoverable transport error.
async fn stream_turn(
    config: &LlmConfig,
    body: serde_json::Value,
    event_tx: &Sender<StreamEvent>,
) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{}/v1/chat/completions", config.base_url.trim_end_matches('/'));

    let response = client
        .post(&url)
        .bearer_auth(config.resolved_api_key())
        .json(&body)
        .send()
        .await
        .map_err(|e| MurmurError::TransportError(format!("Request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(MurmurError::TransportError(format!(
            "Chat endpoint returned {}: {}",
            status, detail
        )));
    }

    let mut byte_stream = response.bytes_stream();
    let mut parser = SseLineParser::new();
    let mut pending_call = PendingToolCall::default();
    let mut saw_done = false;
    // Bytes held back until they form complete UTF-8; chunks can split
    // multi-byte characters.
    let mut undecoded: Vec<u8> = Vec::new();

    'stream: while let Some(chunk) = byte_stream.next().await {
        let chunk =
            chunk.map_err(|e| MurmurError::TransportError(format!("Stream read failed: {}", e)))?;

        undecoded.extend_from_slice(&chunk);
        let valid_len = match std::str::from_utf8(&undecoded) {
            Ok(_) => undecoded.len(),
            Err(e) => e.valid_up_to(),
        };
        let text = String::from_utf8_lossy(&undecoded[..valid_len]).into_owned();
        undecoded.drain(..valid_len);

        for event in parser.push_chunk(&text) {
            if event.is_done() {
                saw_done = true;
                break 'stream;
            }

            let parsed: ChatChunk = match serde_json::from_str(&event.data) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Skipping unparseable stream chunk: {}", e);
                    continue;
                }
            };

            let Some(choice) = parsed.choices.into_iter().next() else {
                continue;
            };

            if let Some(delta) = choice.delta {
                if let Some(text) = delta.content {
                    if !text.is_empty() && event_tx.send(StreamEvent::TextDelta(text)).is_err() {
                        // Receiver gone: the turn was abandoned.
                        return Ok(());
                    }
                }
                for call_delta in delta.tool_calls.unwrap_or_default() {
                    pending_call.merge(call_delta);
                }
            }

            if choice.finish_reason.as_deref() == Some("tool_calls") {
                saw_done = true;
                break 'stream;
            }
        }
    }

    if !saw_done {
        return Err(MurmurError::TransportError(
            "Stream ended before completion".to_string(),
        ));
    }

    if let Some(call) = pending_call.finish() {
        debug!("Stream announced tool call: {} ({})", call.name, call.id);
        if event_tx.send(StreamEvent::ToolCall(call)).is_err() {
            return Ok(());
        }
    }

    let _ = event_tx.send(StreamEvent::End);
    Ok(())
}

/// Build the request body for the streaming chat endpoint.
pub fn build_request(
    config: &LlmConfig,
    history: &[Message],
    tools: &[ToolDeclaration],
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": config.model,
        "messages": messages_to_wire(history),
        "stream": true,
        "temperature": config.temperature,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(max_tokens) = config.max_tokens {
            obj.insert("max_tokens".into(), serde_json::json!(max_tokens));
        }
        if !tools.is_empty() {
            let tools_json: Vec<serde_json::Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
            obj.insert("tools".into(), serde_json::json!(tools_json));
        }
    }

    body
}

/// Convert history messages to the chat wire format.
fn messages_to_wire(history: &[Message]) -> Vec<serde_json::Value> {
    history
        .iter()
        .map(|msg| {
            let mut wire = serde_json::json!({
                "role": msg.role.as_str(),
                "content": msg.content,
            });
            if let Some(obj) = wire.as_object_mut() {
                if let Some(tool_call_id) = &msg.tool_call_id {
                    obj.insert("tool_call_id".into(), serde_json::json!(tool_call_id));
                }
                if !msg.tool_calls.is_empty() {
                    let calls: Vec<serde_json::Value> = msg
                        .tool_calls
                        .iter()
                        .map(|c| {
                            serde_json::json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": c.arguments,
                                },
                            })
                        })
                        .collect();
                    obj.insert("tool_calls".into(), serde_json::json!(calls));
                }
            }
            wire
        })
        .collect()
}

/// Tool call reassembled from streaming argument fragments.
///
/// One tool call is serviced per model turn; only the first declared call
/// (index 0) is accumulated and any parallel calls are ignored.
#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl PendingToolCall {
    fn merge(&mut self, delta: ToolCallDelta) {
        if delta.index != 0 {
            return;
        }
        if let Some(id) = delta.id {
            self.id.get_or_insert(id);
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                self.name.get_or_insert(name);
            }
            if let Some(fragment) = function.arguments {
                self.arguments.push_str(&fragment);
            }
        }
    }

    fn finish(self) -> Option<ToolCall> {
        let name = self.name?;
        let id = self.id.unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
        Some(ToolCall::new(id, name, self.arguments))
    }
}

// ── Wire types for streaming chunks ─────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declaration() -> ToolDeclaration {
        ToolDeclaration {
            name: "fetch_webpage".to_string(),
            description: "Fetch the text content of a webpage".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"],
            }),
        }
    }

    #[test]
    fn test_build_request_basic() {
        let config = LlmConfig::new("test-model");
        let history = vec![Message::system("prompt"), Message::user("hi")];

        let body = build_request(&config, &history, &[]);

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_build_request_with_tools() {
        let config = LlmConfig::new("test-model");
        let history = vec![Message::user("read my mail")];

        let body = build_request(&config, &history, &[declaration()]);

        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "fetch_webpage");
    }

    #[test]
    fn test_tool_round_trip_wire_format() {
        let call = ToolCall::new("call_9", "open_file", r#"{"path":"notes.txt"}"#);
        let history = vec![
            Message::assistant_tool_call(None, call),
            Message::tool_result("call_9", "notes.txt opened successfully"),
        ];

        let wire = messages_to_wire(&history);

        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["content"], serde_json::Value::Null);
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call_9");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "open_file");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_9");
    }

    #[test]
    fn test_pending_call_reassembles_fragments() {
        let mut pending = PendingToolCall::default();
        pending.merge(ToolCallDelta {
            index: 0,
            id: Some("call_1".to_string()),
            function: Some(FunctionDelta {
                name: Some("send_email".to_string()),
                arguments: Some("{\"to\":".to_string()),
            }),
        });
        pending.merge(ToolCallDelta {
            index: 0,
            id: None,
            function: Some(FunctionDelta {
                name: None,
                arguments: Some("\"a@b.c\"}".to_string()),
            }),
        });
        // Parallel calls beyond the first are ignored.
        pending.merge(ToolCallDelta {
            index: 1,
            id: Some("call_2".to_string()),
            function: Some(FunctionDelta {
                name: Some("other".to_string()),
                arguments: Some("{}".to_string()),
            }),
        });

        let call = pending.finish().unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.name, "send_email");
        assert_eq!(call.arguments, "{\"to\":\"a@b.c\"}");
    }

    #[test]
    fn test_pending_call_without_name_is_dropped() {
        let pending = PendingToolCall::default();
        assert!(pending.finish().is_none());
    }

    #[test]
    fn test_chunk_parsing() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let chunk: ChatChunk = serde_json::from_str(data).unwrap();

        let choice = &chunk.choices[0];
        assert_eq!(choice.delta.as_ref().unwrap().content.as_deref(), Some("Hel"));
        assert!(choice.finish_reason.is_none());
    }

    #[test]
    fn test_tool_call_chunk_parsing() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_7","function":{"name":"list_directory","arguments":"{\"path\""}}]},"finish_reason":null}]}"#;
        let chunk: ChatChunk = serde_json::from_str(data).unwrap();

        let delta = chunk.choices[0].delta.as_ref().unwrap();
        let calls = delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_7"));
        assert_eq!(
            calls[0].function.as_ref().unwrap().name.as_deref(),
            Some("list_directory")
        );
    }
}
