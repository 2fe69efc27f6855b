//! Orchestrator for the end-to-end assistant pipeline
//!
//! Wires the conversation engine, synthesis queue, playback scheduler,
//! voice capture and tool dispatcher together, and exposes one handle and
//! one event stream to the presentation layer. Components communicate only
//! through channels; the orchestrator never reaches into their state.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use crate::audio::recorder::RecorderConfig;
use crate::audio::transcribe::{HttpTranscriber, Transcriber, TranscriberConfig};
use crate::engine::{ConversationEngine, EngineEvent, EngineHandle, EngineState};
use crate::integration::config::AssistantConfig;
use crate::llm::{ChatClient, ResponseSource};
use crate::messages::Role;
use crate::speech::playback::{AudioSink, PlaybackEvent, PlaybackScheduler};
use crate::speech::synthesis::{HttpSynthesizer, SpeechSynthesisQueue, SpeechSynthesizer};
use crate::speech::{PipelineStatus, SynthesisHandle};
use crate::mind::{AssistantMind, MindHandle, MindSignal};
use crate::tools::ToolCallDispatcher;
use crate::utils::channels::{PromptChannels, SpeechChannels};
use crate::{MurmurError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const CLIP_CHANNEL_CAPACITY: usize = 100;
const FRAME_CHANNEL_CAPACITY: usize = 1024;

/// Idle sleep for the event pump between polls.
const PUMP_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Poll interval for the capture session loop.
const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Signals consumed by the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub enum AssistantEvent {
    TurnStarted,
    AssistantToken(String),
    SentenceReady(String),
    SpeakingStarted,
    SpeakingFinished,
    InputEnabled,
    InputDisabled,
    ToolCallRequested { name: String, arguments: String },
    ToolResultDelivered,
    Transcription(String),
    TurnComplete { response: String },
    Error(String),
    Shutdown,
}

#[derive(Clone, Debug)]
enum ListenCommand {
    Start,
    Stop,
    Shutdown,
}

/// Handle for driving the assistant from the presentation layer.
pub struct OrchestratorHandle {
    engine: EngineHandle,
    event_rx: Receiver<AssistantEvent>,
    listen_tx: Sender<ListenCommand>,
    mind: MindHandle,
    synthesis: Option<SynthesisHandle>,
    playback_stop: Option<Arc<std::sync::atomic::AtomicBool>>,
    capture_enabled: bool,
}

impl OrchestratorHandle {
    /// Submit typed user input. Fails with `ConflictError` while a turn is
    /// in progress.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.engine.submit(text, Role::User)
    }

    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn event_receiver(&self) -> Receiver<AssistantEvent> {
        self.event_rx.clone()
    }

    pub fn try_recv_event(&self) -> Option<AssistantEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Begin a voice capture session.
    pub fn start_listening(&self) -> Result<()> {
        if !self.capture_enabled {
            return Err(MurmurError::ConfigError(
                "audio input is disabled".to_string(),
            ));
        }
        self.listen_tx
            .send(ListenCommand::Start)
            .map_err(|e| MurmurError::ChannelError(format!("Failed to start listening: {}", e)))
    }

    /// Cancel the in-progress capture session, if any.
    pub fn stop_listening(&self) -> Result<()> {
        if !self.capture_enabled {
            return Err(MurmurError::ConfigError(
                "audio input is disabled".to_string(),
            ));
        }
        self.listen_tx
            .send(ListenCommand::Stop)
            .map_err(|e| MurmurError::ChannelError(format!("Failed to stop listening: {}", e)))
    }

    /// Stop every worker. In-flight turns are abandoned without corrupting
    /// history.
    pub fn shutdown(&self) {
        self.engine.shutdown();
        self.mind.notify(MindSignal::Shutdown);
        let _ = self.listen_tx.send(ListenCommand::Shutdown);
        if let Some(synthesis) = &self.synthesis {
            synthesis.shutdown();
        }
        if let Some(stop) = &self.playback_stop {
            stop.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }
}

/// The assembled pipeline, ready to start.
pub struct Orchestrator {
    config: AssistantConfig,
    engine: Option<ConversationEngine>,
    engine_handle: EngineHandle,
    synthesis: Option<(SpeechSynthesisQueue, Box<dyn SpeechSynthesizer>)>,
    playback: Option<(PlaybackScheduler, Box<dyn AudioSink>)>,
    transcriber: Option<Arc<dyn Transcriber>>,
    dispatcher: Arc<ToolCallDispatcher>,
    mind: Option<AssistantMind>,
    mind_handle: MindHandle,
    event_tx: Sender<AssistantEvent>,
    listen_rx: Receiver<ListenCommand>,
    playback_events: Option<Receiver<PlaybackEvent>>,
}

impl Orchestrator {
    /// Start all workers, consuming the orchestrator.
    pub fn start(mut self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        if let Some((queue, synthesizer)) = self.synthesis.take() {
            handles.push(queue.start_worker(synthesizer));
            info!("Synthesis queue started");
        }

        if let Some((scheduler, sink)) = self.playback.take() {
            handles.push(scheduler.start_worker(sink));
            info!("Playback scheduler started");
        }

        let mind = self.mind.take().ok_or_else(|| {
            MurmurError::ConfigError("orchestrator already started".to_string())
        })?;
        let boot_prompt = mind.boot_prompt();
        let prompts = PromptChannels::new(16);
        handles.push(mind.start_worker(prompts.prompt_tx.clone()));
        info!("Assistant mind started");

        let engine = self.engine.take().ok_or_else(|| {
            MurmurError::ConfigError("orchestrator already started".to_string())
        })?;
        let engine_events = engine.event_receiver();
        handles.push(engine.start_worker());
        info!("Conversation engine started");

        // Capture worker (voice input).
        if self.config.enable_audio_input {
            if let Some(transcriber) = self.transcriber.clone() {
                handles.push(spawn_capture_worker(
                    self.listen_rx.clone(),
                    self.config.recorder.clone(),
                    transcriber,
                    self.engine_handle.clone(),
                    self.event_tx.clone(),
                ));
                info!("Capture worker started");
            }
        }

        // Event pump: merges engine and playback events, dispatches tool
        // calls, and forwards mind prompts.
        let pump = EventPump {
            engine_events,
            playback_events: self.playback_events.take(),
            prompt_rx: prompts.prompt_rx,
            dispatcher: Arc::clone(&self.dispatcher),
            engine: self.engine_handle.clone(),
            mind: self.mind_handle.clone(),
            event_tx: self.event_tx.clone(),
            gate_from_playback: self.config.enable_audio_output,
        };
        handles.push(thread::spawn(move || pump.run()));
        info!("Orchestrator event pump started");

        if let Some(prompt) = boot_prompt {
            if let Err(e) = self.engine_handle.submit(prompt, Role::User) {
                warn!("Boot greeting not submitted: {}", e);
            }
        }

        Ok(handles)
    }
}

/// Merges component events into the presentation stream and services tool
/// calls. Runs until the engine announces shutdown.
struct EventPump {
    engine_events: Receiver<EngineEvent>,
    playback_events: Option<Receiver<PlaybackEvent>>,
    prompt_rx: Receiver<String>,
    dispatcher: Arc<ToolCallDispatcher>,
    engine: EngineHandle,
    mind: MindHandle,
    event_tx: Sender<AssistantEvent>,
    /// With audio output the playback gate owns input readiness; without,
    /// turn boundaries do.
    gate_from_playback: bool,
}

impl EventPump {
    fn run(self) {
        loop {
            let mut active = false;

            loop {
                match self.engine_events.try_recv() {
                    Ok(event) => {
                        active = true;
                        if self.forward_engine_event(event) {
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        let _ = self.event_tx.send(AssistantEvent::Shutdown);
                        return;
                    }
                }
            }

            if let Some(playback) = &self.playback_events {
                while let Ok(event) = playback.try_recv() {
                    active = true;
                    self.forward_playback_event(event);
                }
            }

            while let Ok(prompt) = self.prompt_rx.try_recv() {
                active = true;
                match self.engine.submit(prompt, Role::User) {
                    Ok(()) => debug!("Mind prompt submitted"),
                    Err(MurmurError::ConflictError(_)) => {
                        debug!("Mind prompt dropped; engine busy")
                    }
                    Err(e) => warn!("Mind prompt failed: {}", e),
                }
            }

            if !active {
                thread::sleep(PUMP_IDLE_SLEEP);
            }
        }
    }

    /// Returns true when the pump should exit.
    fn forward_engine_event(&self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::TurnStarted => {
                let _ = self.event_tx.send(AssistantEvent::TurnStarted);
                if !self.gate_from_playback {
                    let _ = self.event_tx.send(AssistantEvent::InputDisabled);
                    self.mind.notify(MindSignal::InputDisabled);
                }
            }
            EngineEvent::Token(token) => {
                let _ = self.event_tx.send(AssistantEvent::AssistantToken(token));
            }
            EngineEvent::SentenceReady(sentence) => {
                let _ = self
                    .event_tx
                    .send(AssistantEvent::SentenceReady(sentence.spoken_text().to_string()));
            }
            EngineEvent::ToolCallRequested(call) => {
                let _ = self.event_tx.send(AssistantEvent::ToolCallRequested {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
                // The engine is parked in AwaitingToolResult; dispatch here
                // and resume it. The dispatcher never fails.
                let result = self.dispatcher.dispatch_call(&call);
                if let Err(e) = self.engine.deliver_tool_result(result) {
                    warn!("Failed to deliver tool result: {}", e);
                }
            }
            EngineEvent::ToolResultDelivered => {
                let _ = self.event_tx.send(AssistantEvent::ToolResultDelivered);
            }
            EngineEvent::TurnComplete { full_response } => {
                let _ = self.event_tx.send(AssistantEvent::TurnComplete {
                    response: full_response,
                });
                if !self.gate_from_playback {
                    let _ = self.event_tx.send(AssistantEvent::InputEnabled);
                    self.mind.notify(MindSignal::InputEnabled);
                }
            }
            EngineEvent::Error(error) => {
                let _ = self.event_tx.send(AssistantEvent::Error(error));
                if !self.gate_from_playback {
                    let _ = self.event_tx.send(AssistantEvent::InputEnabled);
                    self.mind.notify(MindSignal::InputEnabled);
                }
            }
            EngineEvent::Shutdown => {
                let _ = self.event_tx.send(AssistantEvent::Shutdown);
                return true;
            }
        }
        false
    }

    fn forward_playback_event(&self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::SpeakingStarted { .. } => {
                let _ = self.event_tx.send(AssistantEvent::SpeakingStarted);
            }
            PlaybackEvent::SpeakingFinished { .. } => {
                let _ = self.event_tx.send(AssistantEvent::SpeakingFinished);
            }
            PlaybackEvent::InputEnabled => {
                let _ = self.event_tx.send(AssistantEvent::InputEnabled);
                self.mind.notify(MindSignal::InputEnabled);
            }
            PlaybackEvent::InputDisabled => {
                let _ = self.event_tx.send(AssistantEvent::InputDisabled);
                self.mind.notify(MindSignal::InputDisabled);
            }
            PlaybackEvent::Shutdown => {}
        }
    }
}

/// Voice capture worker: each `Start` runs one recording session, hands the
/// finalized utterance to the transcriber, and submits the text.
fn spawn_capture_worker(
    listen_rx: Receiver<ListenCommand>,
    recorder_config: RecorderConfig,
    transcriber: Arc<dyn Transcriber>,
    engine: EngineHandle,
    event_tx: Sender<AssistantEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        info!("Capture worker starting");

        loop {
            match listen_rx.recv() {
                Ok(ListenCommand::Start) => {
                    run_capture_session(
                        &listen_rx,
                        &recorder_config,
                        transcriber.as_ref(),
                        &engine,
                        &event_tx,
                    );
                }
                Ok(ListenCommand::Stop) => {}
                Ok(ListenCommand::Shutdown) | Err(_) => break,
            }
        }

        info!("Capture worker stopped");
    })
}

#[cfg(feature = "audio-io")]
fn run_capture_session(
    listen_rx: &Receiver<ListenCommand>,
    recorder_config: &RecorderConfig,
    transcriber: &dyn Transcriber,
    engine: &EngineHandle,
    event_tx: &Sender<AssistantEvent>,
) {
    use crate::audio::input::AudioInput;
    use crate::audio::recorder::{SessionStatus, VoiceActivityRecorder};
    use crate::utils::channels::CaptureChannels;

    let channels = CaptureChannels::new(FRAME_CHANNEL_CAPACITY);

    let mut input = match AudioInput::new() {
        Ok(input) => input,
        Err(e) => {
            warn!("Capture unavailable: {}", e);
            let _ = event_tx.send(AssistantEvent::Error(e.user_message()));
            return;
        }
    };

    let mut config = recorder_config.clone();
    config.sample_rate = input.sample_rate();

    if let Err(e) = input.start_capture(channels.frame_tx.clone(), config.frame_size) {
        warn!("Capture failed to start: {}", e);
        let _ = event_tx.send(AssistantEvent::Error(e.user_message()));
        return;
    }

    let mut recorder = VoiceActivityRecorder::new(config);
    let utterance = loop {
        // A Stop (or Shutdown) command cancels the session.
        match listen_rx.try_recv() {
            Ok(ListenCommand::Stop) | Ok(ListenCommand::Shutdown) => break None,
            Ok(ListenCommand::Start) | Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => break None,
        }

        match channels.frame_rx.recv_timeout(CAPTURE_POLL_INTERVAL) {
            Ok(frame) => match recorder.push_frame(&frame) {
                SessionStatus::Finalized(utterance) => break Some(utterance),
                SessionStatus::Ended => break None,
                SessionStatus::Listening | SessionStatus::Recording => {}
            },
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break None,
        }
    };

    let _ = input.stop_capture();

    let Some(utterance) = utterance else {
        // Empty or cancelled session: nothing is emitted, caller may retry.
        debug!("Capture session ended without an utterance");
        return;
    };

    match transcriber.transcribe(&utterance) {
        Ok(text) if !text.trim().is_empty() => {
            info!("Transcription: {}", text);
            let _ = event_tx.send(AssistantEvent::Transcription(text.clone()));
            if let Err(e) = engine.submit(text, Role::User) {
                warn!("Transcription not submitted: {}", e);
            }
        }
        Ok(_) => debug!("Transcription empty; ignoring"),
        Err(e) => {
            warn!("Transcription failed: {}", e);
            let _ = event_tx.send(AssistantEvent::Error(e.user_message()));
        }
    }
}

#[cfg(not(feature = "audio-io"))]
fn run_capture_session(
    _listen_rx: &Receiver<ListenCommand>,
    _recorder_config: &RecorderConfig,
    _transcriber: &dyn Transcriber,
    _engine: &EngineHandle,
    event_tx: &Sender<AssistantEvent>,
) {
    let _ = event_tx.send(AssistantEvent::Error(
        "audio capture support is not compiled in".to_string(),
    ));
}

/// Builder assembling the pipeline from a config plus collaborators.
///
/// Collaborators left unset fall back to the HTTP implementations derived
/// from the config; tests inject mocks instead.
pub struct OrchestratorBuilder {
    config: AssistantConfig,
    source: Option<Arc<dyn ResponseSource>>,
    synthesizer: Option<Box<dyn SpeechSynthesizer>>,
    sink: Option<Box<dyn AudioSink>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    dispatcher: Option<ToolCallDispatcher>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: AssistantConfig::default(),
            source: None,
            synthesizer: None,
            sink: None,
            transcriber: None,
            dispatcher: None,
        }
    }

    pub fn with_config(mut self, config: AssistantConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn ResponseSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Box<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: ToolCallDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Result<(Orchestrator, OrchestratorHandle)> {
        let mut config = self.config;

        if config.enable_audio_input && !cfg!(feature = "audio-io") && self.transcriber.is_none() {
            warn!("audio-io feature not compiled in; disabling audio input");
            config.enable_audio_input = false;
        }

        let dispatcher = Arc::new(self.dispatcher.unwrap_or_else(|| {
            ToolCallDispatcher::new(crate::tools::ToolRegistry::new())
        }));

        let source: Arc<dyn ResponseSource> = match self.source {
            Some(source) => source,
            None => Arc::new(ChatClient::new(config.llm.clone())),
        };

        // Speech pipeline (only with audio output).
        let status = PipelineStatus::new();
        let mut synthesis = None;
        let mut playback = None;
        let mut playback_events = None;
        let mut synthesis_handle = None;
        let mut playback_stop = None;

        if config.enable_audio_output {
            let speech_channels = SpeechChannels::new(CLIP_CHANNEL_CAPACITY);

            let queue = SpeechSynthesisQueue::new(speech_channels.clip_tx, status.clone());
            synthesis_handle = Some(queue.handle());

            let synthesizer: Box<dyn SpeechSynthesizer> = match self.synthesizer {
                Some(synthesizer) => synthesizer,
                None => Box::new(HttpSynthesizer::new(
                    config.llm.base_url.clone(),
                    config.llm.resolved_api_key(),
                    config.synthesis_model.clone(),
                    config.synthesis_voice.clone(),
                )?),
            };
            synthesis = Some((queue, synthesizer));

            let scheduler = PlaybackScheduler::new(
                config.playback.clone(),
                speech_channels.clip_rx,
                status.clone(),
            );
            playback_events = Some(scheduler.event_receiver());
            playback_stop = Some(scheduler.stop_flag());

            let sink: Box<dyn AudioSink> = match self.sink {
                Some(sink) => sink,
                None => default_sink()?,
            };
            playback = Some((scheduler, sink));
        }

        let transcriber: Option<Arc<dyn Transcriber>> = if config.enable_audio_input {
            Some(match self.transcriber {
                Some(transcriber) => transcriber,
                None => Arc::new(HttpTranscriber::new(TranscriberConfig {
                    base_url: config.llm.base_url.clone(),
                    api_key: config.llm.resolved_api_key(),
                    ..Default::default()
                })?),
            })
        } else {
            None
        };

        let engine = ConversationEngine::new(
            config.engine.clone(),
            source,
            dispatcher.declarations(),
            synthesis_handle.clone(),
        );
        let engine_handle = engine.handle();

        let mind = AssistantMind::new(config.mind.clone());
        let mind_handle = mind.handle();

        let (event_tx, event_rx) = bounded(EVENT_CHANNEL_CAPACITY);
        let (listen_tx, listen_rx) = bounded(16);

        let handle = OrchestratorHandle {
            engine: engine_handle.clone(),
            event_rx,
            listen_tx,
            mind: mind_handle.clone(),
            synthesis: synthesis_handle,
            playback_stop,
            capture_enabled: config.enable_audio_input,
        };

        let orchestrator = Orchestrator {
            config,
            engine: Some(engine),
            engine_handle,
            synthesis,
            playback,
            transcriber,
            dispatcher,
            mind: Some(mind),
            mind_handle,
            event_tx,
            listen_rx,
            playback_events,
        };

        Ok((orchestrator, handle))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "audio-io")]
fn default_sink() -> Result<Box<dyn AudioSink>> {
    Ok(Box::new(crate::audio::output::CpalSink::new()?))
}

#[cfg(not(feature = "audio-io"))]
fn default_sink() -> Result<Box<dyn AudioSink>> {
    Err(MurmurError::ConfigError(
        "no playback sink: audio-io feature is not compiled in".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{StreamEvent, ToolDeclaration};
    use crate::messages::Message;

    struct EmptySource;

    impl ResponseSource for EmptySource {
        fn begin_turn(
            &self,
            _history: &[Message],
            _tools: &[ToolDeclaration],
        ) -> Result<Receiver<StreamEvent>> {
            let (tx, rx) = bounded(4);
            let _ = tx.send(StreamEvent::End);
            Ok(rx)
        }
    }

    fn text_only_builder() -> OrchestratorBuilder {
        let config = AssistantConfig::default()
            .without_audio_input()
            .without_audio_output()
            .with_mind(crate::mind::MindConfig {
                boot_greeting: false,
                ..Default::default()
            });
        OrchestratorBuilder::new()
            .with_config(config)
            .with_source(Arc::new(EmptySource))
    }

    #[test]
    fn test_build_text_only() {
        let result = text_only_builder().build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_listening_rejected_without_audio_input() {
        let (_orchestrator, handle) = text_only_builder().build().unwrap();
        assert!(matches!(
            handle.start_listening(),
            Err(MurmurError::ConfigError(_))
        ));
    }

    #[test]
    fn test_text_turn_produces_events() {
        let (orchestrator, handle) = text_only_builder().build().unwrap();
        let _workers = orchestrator.start().unwrap();
        let events = handle.event_receiver();

        handle.send_text("hello").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while std::time::Instant::now() < deadline {
            if let Ok(event) = events.recv_timeout(Duration::from_millis(100)) {
                let done = matches!(event, AssistantEvent::TurnComplete { .. });
                seen.push(event);
                if done {
                    break;
                }
            }
        }

        assert!(seen.contains(&AssistantEvent::TurnStarted));
        assert!(seen.contains(&AssistantEvent::InputDisabled));
        assert!(seen
            .iter()
            .any(|e| matches!(e, AssistantEvent::TurnComplete { .. })));

        handle.shutdown();
    }
}
