//! Configuration for the assembled assistant
//!
//! One explicit value injected at construction; nothing reads global state.

use crate::audio::recorder::RecorderConfig;
use crate::engine::EngineConfig;
use crate::llm::LlmConfig;
use crate::mind::MindConfig;
use crate::speech::playback::PlaybackConfig;

#[derive(Clone, Debug)]
pub struct AssistantConfig {
    pub engine: EngineConfig,
    pub llm: LlmConfig,
    pub playback: PlaybackConfig,
    pub recorder: RecorderConfig,
    pub mind: MindConfig,

    /// Model for the speech-synthesis collaborator.
    pub synthesis_model: String,

    /// Voice for the speech-synthesis collaborator.
    pub synthesis_voice: String,

    /// Whether to capture microphone input.
    pub enable_audio_input: bool,

    /// Whether to synthesize and play responses.
    pub enable_audio_output: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            llm: LlmConfig::default(),
            playback: PlaybackConfig::default(),
            recorder: RecorderConfig::default(),
            mind: MindConfig::default(),
            synthesis_model: "tts-1-hd".to_string(),
            synthesis_voice: "nova".to_string(),
            enable_audio_input: true,
            enable_audio_output: true,
        }
    }
}

impl AssistantConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.engine.system_prompt = prompt.into();
        self
    }

    pub fn with_llm(mut self, llm: LlmConfig) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_mind(mut self, mind: MindConfig) -> Self {
        self.mind = mind;
        self
    }

    /// Text-only input: no microphone capture.
    pub fn without_audio_input(mut self) -> Self {
        self.enable_audio_input = false;
        self
    }

    /// Text-only output: no synthesis or playback.
    pub fn without_audio_output(mut self) -> Self {
        self.enable_audio_output = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AssistantConfig::default();
        assert!(config.enable_audio_input);
        assert!(config.enable_audio_output);
        assert_eq!(config.synthesis_voice, "nova");
        assert_eq!(config.recorder.sample_rate, 44100);
    }

    #[test]
    fn test_builders() {
        let config = AssistantConfig::default()
            .with_system_prompt("You are terse.")
            .without_audio_input()
            .without_audio_output();

        assert_eq!(config.engine.system_prompt, "You are terse.");
        assert!(!config.enable_audio_input);
        assert!(!config.enable_audio_output);
    }
}
