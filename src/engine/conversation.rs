//! The conversation state machine
//!
//! States: `Idle → Streaming → AwaitingToolResult → Streaming → Idle`, with
//! a transient `Error` that always recovers to `Idle`. History is owned by
//! the worker thread; all mutation happens there. Waiting for a tool result
//! is a suspension point — the worker parks on its command channel, never
//! busy-waits.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::engine::segmenter::{Sentence, SentenceSegmenter};
use crate::llm::{ResponseSource, StreamEvent, ToolDeclaration};
use crate::messages::{History, Message, Role, ToolCall};
use crate::speech::{SynthesisHandle, SynthesisJob};
use crate::{MurmurError, Result};

/// Spoken in place of a response when the generation service fails.
pub const APOLOGY_SENTENCE: &str = "Sorry, I encountered an error.";

/// How often an in-flight turn re-checks the cancellation flag while
/// waiting on the upstream stream.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

const COMMAND_CHANNEL_CAPACITY: usize = 100;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Engine lifecycle state, shared as an atomic so `submit` can be rejected
/// synchronously without waiting on the worker.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle = 0,
    Streaming = 1,
    AwaitingToolResult = 2,
    Error = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineState::Idle,
            1 => EngineState::Streaming,
            2 => EngineState::AwaitingToolResult,
            _ => EngineState::Error,
        }
    }
}

/// Commands consumed by the engine worker.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Submit { text: String, role: Role },
    DeliverToolResult { text: String },
    Shutdown,
}

/// Events emitted toward the orchestrator / presentation layer.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    TurnStarted,
    Token(String),
    SentenceReady(Sentence),
    ToolCallRequested(ToolCall),
    ToolResultDelivered,
    TurnComplete { full_response: String },
    Error(String),
    Shutdown,
}

/// Construction-time configuration; no global state is consulted.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub system_prompt: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a desktop assistant.".to_string(),
        }
    }
}

/// Caller-side handle: synchronous state checks, asynchronous work.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: Sender<EngineCommand>,
    state: Arc<AtomicU8>,
    cancelled: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Submit user (or system-originated) input for a new turn.
    ///
    /// Rejected with `ConflictError` unless the engine is `Idle`; the state
    /// transition to `Streaming` happens here, atomically, so two racing
    /// submissions cannot both pass.
    pub fn submit(&self, text: impl Into<String>, role: Role) -> Result<()> {
        if role == Role::Tool {
            return Err(MurmurError::ProtocolError(
                "tool messages are delivered via deliver_tool_result".to_string(),
            ));
        }

        self.state
            .compare_exchange(
                EngineState::Idle as u8,
                EngineState::Streaming as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|actual| {
                MurmurError::ConflictError(format!(
                    "cannot submit while {:?}",
                    EngineState::from_u8(actual)
                ))
            })?;

        self.command_tx
            .send(EngineCommand::Submit {
                text: text.into(),
                role,
            })
            .map_err(|e| {
                self.state
                    .store(EngineState::Idle as u8, Ordering::SeqCst);
                MurmurError::ChannelError(format!("Failed to send submit: {}", e))
            })
    }

    /// Deliver the result for the pending tool call and resume generation.
    pub fn deliver_tool_result(&self, text: impl Into<String>) -> Result<()> {
        self.state
            .compare_exchange(
                EngineState::AwaitingToolResult as u8,
                EngineState::Streaming as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|actual| {
                MurmurError::ProtocolError(format!(
                    "no tool call awaiting a result (state is {:?})",
                    EngineState::from_u8(actual)
                ))
            })?;

        self.command_tx
            .send(EngineCommand::DeliverToolResult { text: text.into() })
            .map_err(|e| MurmurError::ChannelError(format!("Failed to send tool result: {}", e)))
    }

    /// Abandon the in-progress turn, if any. No partial assistant message
    /// is committed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn shutdown(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(EngineCommand::Shutdown);
    }
}

/// The conversation engine pipeline.
pub struct ConversationEngine {
    config: EngineConfig,
    source: Arc<dyn ResponseSource>,
    tools: Vec<ToolDeclaration>,
    synthesis: Option<SynthesisHandle>,
    command_tx: Sender<EngineCommand>,
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    event_rx: Receiver<EngineEvent>,
    state: Arc<AtomicU8>,
    cancelled: Arc<AtomicBool>,
}

impl ConversationEngine {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn ResponseSource>,
        tools: Vec<ToolDeclaration>,
        synthesis: Option<SynthesisHandle>,
    ) -> Self {
        let (command_tx, command_rx) = bounded(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = bounded(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            source,
            tools,
            synthesis,
            command_tx,
            command_rx,
            event_tx,
            event_rx,
            state: Arc::new(AtomicU8::new(EngineState::Idle as u8)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            command_tx: self.command_tx.clone(),
            state: Arc::clone(&self.state),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn event_receiver(&self) -> Receiver<EngineEvent> {
        self.event_rx.clone()
    }

    /// Start the worker thread that owns history and drives turns.
    pub fn start_worker(self) -> JoinHandle<()> {
        let mut worker = EngineWorker {
            history: History::with_system_prompt(&self.config.system_prompt),
            source: self.source,
            tools: self.tools,
            synthesis: self.synthesis,
            event_tx: self.event_tx,
            state: self.state,
            cancelled: self.cancelled,
            turn: None,
        };
        let command_rx = self.command_rx;

        thread::spawn(move || {
            info!("Conversation engine worker starting");
            worker.run(command_rx);
            info!("Conversation engine worker stopped");
        })
    }
}

/// Per-turn accumulation. Survives the tool-call detour so sentence
/// sequence numbers keep increasing across the continuation.
#[derive(Default)]
struct TurnContext {
    segmenter: SentenceSegmenter,
    /// Everything generated this turn, across continuations.
    full_response: String,
    /// Text since the last history commit (turn start or tool call).
    segment_text: String,
    pending_call: Option<ToolCall>,
}

struct EngineWorker {
    history: History,
    source: Arc<dyn ResponseSource>,
    tools: Vec<ToolDeclaration>,
    synthesis: Option<SynthesisHandle>,
    event_tx: Sender<EngineEvent>,
    state: Arc<AtomicU8>,
    cancelled: Arc<AtomicBool>,
    turn: Option<TurnContext>,
}

impl EngineWorker {
    fn run(&mut self, command_rx: Receiver<EngineCommand>) {
        loop {
            match command_rx.recv() {
                Ok(EngineCommand::Submit { text, role }) => {
                    // A stale cancel from a previous turn must not kill
                    // this one.
                    self.cancelled.store(false, Ordering::SeqCst);

                    self.history.push(match role {
                        Role::System => Message::system(text),
                        Role::Assistant => Message::assistant(text),
                        _ => Message::user(text),
                    });
                    self.turn = Some(TurnContext::default());
                    self.emit(EngineEvent::TurnStarted);
                    self.run_stream();
                }
                Ok(EngineCommand::DeliverToolResult { text }) => {
                    if self.cancelled.swap(false, Ordering::SeqCst) {
                        self.abort_turn();
                        continue;
                    }

                    let call = self
                        .turn
                        .as_mut()
                        .and_then(|turn| turn.pending_call.take());
                    let Some(call) = call else {
                        warn!("Tool result delivered with no pending call; ignoring");
                        self.set_state(EngineState::Idle);
                        continue;
                    };

                    self.history.push(Message::tool_result(call.id, text));
                    self.emit(EngineEvent::ToolResultDelivered);
                    self.run_stream();
                }
                Ok(EngineCommand::Shutdown) => {
                    self.set_state(EngineState::Idle);
                    self.emit(EngineEvent::Shutdown);
                    break;
                }
                Err(_) => break,
            }
        }
    }

    /// Consume one generation stream: from turn start or continuation until
    /// end-of-stream, a tool-call announcement, cancellation, or failure.
    fn run_stream(&mut self) {
        let mut turn = self.turn.take().unwrap_or_default();

        let events = match self.source.begin_turn(self.history.as_slice(), &self.tools) {
            Ok(events) => events,
            Err(e) => {
                self.recover_transport(turn.segmenter.next_seq(), e.to_string());
                return;
            }
        };

        loop {
            if self.cancelled.swap(false, Ordering::SeqCst) {
                // Dropping the receiver abandons the upstream call; the
                // unflushed buffer is discarded with the turn context.
                debug!("Turn cancelled; discarding in-progress stream");
                self.abort_turn();
                return;
            }

            match events.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(StreamEvent::TextDelta(text)) => {
                    turn.full_response.push_str(&text);
                    turn.segment_text.push_str(&text);
                    self.emit(EngineEvent::Token(text.clone()));
                    for sentence in turn.segmenter.feed(&text) {
                        self.emit_sentence(sentence);
                    }
                }
                Ok(StreamEvent::ToolCall(call)) => {
                    // The assistant message carrying the call is committed
                    // now; its answer arrives via deliver_tool_result.
                    let content = if turn.segment_text.is_empty() {
                        None
                    } else {
                        Some(std::mem::take(&mut turn.segment_text))
                    };
                    self.history
                        .push(Message::assistant_tool_call(content, call.clone()));
                    turn.pending_call = Some(call.clone());
                    self.turn = Some(turn);
                    self.set_state(EngineState::AwaitingToolResult);
                    self.emit(EngineEvent::ToolCallRequested(call));
                    return;
                }
                Ok(StreamEvent::End) => {
                    if let Some(sentence) = turn.segmenter.flush() {
                        self.emit_sentence(sentence);
                    }
                    self.history
                        .push(Message::assistant(std::mem::take(&mut turn.segment_text)));
                    self.set_state(EngineState::Idle);
                    self.emit(EngineEvent::TurnComplete {
                        full_response: turn.full_response,
                    });
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.recover_transport(
                        turn.segmenter.next_seq(),
                        "generation stream disconnected".to_string(),
                    );
                    return;
                }
            }
        }
    }

    /// Recover from an upstream failure: one apology sentence, no partial
    /// assistant message, back to `Idle`.
    fn recover_transport(&mut self, seq: usize, detail: String) {
        warn!("Transport failure during turn: {}", detail);
        self.set_state(EngineState::Error);
        self.emit(EngineEvent::Error(detail));
        self.emit_sentence(Sentence::new(APOLOGY_SENTENCE.to_string(), seq));
        self.turn = None;
        self.set_state(EngineState::Idle);
    }

    /// Discard the in-progress turn without committing anything.
    fn abort_turn(&mut self) {
        self.turn = None;
        self.set_state(EngineState::Idle);
    }

    fn emit_sentence(&self, sentence: Sentence) {
        let spoken = sentence.spoken_text();
        if spoken.is_empty() {
            return;
        }

        if let Some(synthesis) = &self.synthesis {
            if let Err(e) = synthesis.enqueue(SynthesisJob::new(spoken, sentence.seq)) {
                warn!("Failed to enqueue sentence for synthesis: {}", e);
            }
        }
        self.emit(EngineEvent::SentenceReady(sentence));
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// One scripted generation stream. With `hold_open` the sender is kept
    /// alive after the events, so the stream neither ends nor fails; without
    /// it, a script lacking `End` (and any tool call) simulates a transport
    /// failure, since the sender is dropped after the last event.
    struct Script {
        events: Vec<StreamEvent>,
        hold_open: bool,
    }

    impl Script {
        fn closed(events: Vec<StreamEvent>) -> Self {
            Self {
                events,
                hold_open: false,
            }
        }

        fn held(events: Vec<StreamEvent>) -> Self {
            Self {
                events,
                hold_open: true,
            }
        }
    }

    /// Scripted source: each `begin_turn` pops the next script and records
    /// the history snapshot it was called with.
    struct ScriptedSource {
        turns: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<Vec<Message>>>,
        held_senders: Mutex<Vec<Sender<StreamEvent>>>,
    }

    impl ScriptedSource {
        fn new(turns: Vec<Script>) -> Self {
            Self {
                turns: Mutex::new(turns.into()),
                requests: Mutex::new(Vec::new()),
                held_senders: Mutex::new(Vec::new()),
            }
        }
    }

    impl ResponseSource for ScriptedSource {
        fn begin_turn(
            &self,
            history: &[Message],
            _tools: &[ToolDeclaration],
        ) -> Result<Receiver<StreamEvent>> {
            self.requests.lock().push(history.to_vec());
            let script = self
                .turns
                .lock()
                .pop_front()
                .ok_or_else(|| MurmurError::TransportError("no scripted turn".to_string()))?;
            let (tx, rx) = bounded(64);
            for event in script.events {
                let _ = tx.send(event);
            }
            if script.hold_open {
                self.held_senders.lock().push(tx);
            }
            Ok(rx)
        }
    }

    fn deltas(text: &str) -> Vec<StreamEvent> {
        // Split into small deltas to exercise cross-token boundaries.
        text.as_bytes()
            .chunks(3)
            .map(|c| StreamEvent::TextDelta(String::from_utf8_lossy(c).to_string()))
            .collect()
    }

    fn engine_with(
        source: ScriptedSource,
    ) -> (ConversationEngine, EngineHandle, Receiver<EngineEvent>) {
        let engine = ConversationEngine::new(
            EngineConfig::default(),
            Arc::new(source),
            Vec::new(),
            None,
        );
        let handle = engine.handle();
        let events = engine.event_receiver();
        (engine, handle, events)
    }

    fn wait_for<F>(events: &Receiver<EngineEvent>, mut predicate: F) -> Vec<EngineEvent>
    where
        F: FnMut(&EngineEvent) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    let done = predicate(&event);
                    seen.push(event);
                    if done {
                        return seen;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        panic!("timed out waiting for engine event; saw {:?}", seen);
    }

    #[test]
    fn test_simple_turn_completes() {
        let mut script = deltas("Hello there. How are you?");
        script.push(StreamEvent::End);
        let (engine, handle, events) =
            engine_with(ScriptedSource::new(vec![Script::closed(script)]));
        let worker = engine.start_worker();

        handle.submit("hi", Role::User).unwrap();
        let seen = wait_for(&events, |e| matches!(e, EngineEvent::TurnComplete { .. }));

        let sentences: Vec<String> = seen
            .iter()
            .filter_map(|e| match e {
                EngineEvent::SentenceReady(s) => Some(s.spoken_text().to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(sentences, vec!["Hello there.", "How are you?"]);

        match seen.last() {
            Some(EngineEvent::TurnComplete { full_response }) => {
                assert_eq!(full_response, "Hello there. How are you?");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(handle.state(), EngineState::Idle);

        handle.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_submit_while_busy_is_conflict() {
        // The first turn's stream is held open so the engine stays in
        // Streaming until cancelled.
        let (engine, handle, events) = engine_with(ScriptedSource::new(vec![
            Script::held(deltas("Thinking")),
            Script::closed(vec![StreamEvent::TextDelta("Done.".to_string()), StreamEvent::End]),
        ]));
        let worker = engine.start_worker();

        handle.submit("first", Role::User).unwrap();
        // State flipped synchronously by the first submit.
        let err = handle.submit("second", Role::User).unwrap_err();
        assert!(matches!(err, MurmurError::ConflictError(_)));

        handle.cancel();
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.state() != EngineState::Idle && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        // Recovered: the next submission runs a full turn.
        assert!(handle.submit("third", Role::User).is_ok());
        wait_for(&events, |e| matches!(e, EngineEvent::TurnComplete { .. }));

        handle.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_tool_call_round_trip() {
        let call = ToolCall::new("call_42", "fetch_webpage", r#"{"a":1}"#);
        let mut first = deltas("Let me check. ");
        first.push(StreamEvent::ToolCall(call));
        let mut second = deltas("All done.");
        second.push(StreamEvent::End);

        let source = Arc::new(ScriptedSource::new(vec![
            Script::closed(first),
            Script::closed(second),
        ]));
        let engine = ConversationEngine::new(
            EngineConfig::default(),
            Arc::clone(&source) as Arc<dyn ResponseSource>,
            Vec::new(),
            None,
        );
        let handle = engine.handle();
        let events = engine.event_receiver();
        let worker = engine.start_worker();

        handle.submit("look this up", Role::User).unwrap();

        let seen = wait_for(&events, |e| matches!(e, EngineEvent::ToolCallRequested(_)));
        let requested = seen
            .iter()
            .find_map(|e| match e {
                EngineEvent::ToolCallRequested(c) => Some(c.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(requested.name, "fetch_webpage");
        assert_eq!(handle.state(), EngineState::AwaitingToolResult);

        // New submissions are blocked while awaiting the result.
        assert!(matches!(
            handle.submit("another", Role::User),
            Err(MurmurError::ConflictError(_))
        ));

        handle.deliver_tool_result("result payload").unwrap();
        let seen = wait_for(&events, |e| matches!(e, EngineEvent::TurnComplete { .. }));
        assert!(seen
            .iter()
            .any(|e| matches!(e, EngineEvent::ToolResultDelivered)));

        // The continuation call saw exactly one tool message, answering the
        // originating call, before any further assistant text was appended.
        let requests = source.requests.lock();
        assert_eq!(requests.len(), 2);
        let continuation = &requests[1];
        assert_eq!(continuation.len(), 4);
        assert_eq!(continuation[2].role, Role::Assistant);
        assert_eq!(continuation[2].tool_calls[0].id, "call_42");
        assert_eq!(continuation[2].content.as_deref(), Some("Let me check. "));
        assert_eq!(continuation[3].role, Role::Tool);
        assert_eq!(continuation[3].tool_call_id.as_deref(), Some("call_42"));
        assert_eq!(continuation[3].content.as_deref(), Some("result payload"));

        handle.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_tool_result_only_valid_when_awaiting() {
        let (engine, handle, _events) = engine_with(ScriptedSource::new(vec![]));
        let worker = engine.start_worker();

        let err = handle.deliver_tool_result("oops").unwrap_err();
        assert!(matches!(err, MurmurError::ProtocolError(_)));

        handle.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_transport_failure_recovers_with_apology() {
        // Deltas but no End: the stream dies mid-response.
        let script = Script::closed(deltas("I was about to say"));
        let (engine, handle, events) = engine_with(ScriptedSource::new(vec![script]));
        let worker = engine.start_worker();

        handle.submit("hello?", Role::User).unwrap();
        let seen = wait_for(&events, |e| {
            matches!(e, EngineEvent::SentenceReady(s) if s.text == APOLOGY_SENTENCE)
        });

        assert!(seen.iter().any(|e| matches!(e, EngineEvent::Error(_))));
        // Recovered: a new submission is accepted.
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.state() != EngineState::Idle && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.state(), EngineState::Idle);

        handle.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_cancel_discards_partial_turn() {
        // The stream stays open: deltas only, worker parked on timeouts
        // after consuming them.
        let script = Script::held(deltas("Partial sentence without end"));
        let (engine, handle, events) = engine_with(ScriptedSource::new(vec![script]));
        let worker = engine.start_worker();

        handle.submit("go", Role::User).unwrap();
        wait_for(&events, |e| matches!(e, EngineEvent::Token(_)));

        handle.cancel();
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.state() != EngineState::Idle && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.state(), EngineState::Idle);

        // No sentence was flushed from the discarded buffer.
        assert!(!events
            .try_iter()
            .any(|e| matches!(e, EngineEvent::SentenceReady(_))));

        handle.shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_submit_tool_role_rejected() {
        let (engine, handle, _events) = engine_with(ScriptedSource::new(vec![]));
        let worker = engine.start_worker();

        assert!(matches!(
            handle.submit("x", Role::Tool),
            Err(MurmurError::ProtocolError(_))
        ));

        handle.shutdown();
        worker.join().unwrap();
    }
}
