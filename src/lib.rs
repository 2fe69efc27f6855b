pub mod audio;
pub mod engine;
pub mod integration;
pub mod llm;
pub mod messages;
pub mod mind;
pub mod speech;
pub mod tools;
pub mod utils;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MurmurError {
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Synthesis error: {0}")]
    SynthesisError(String),

    #[error("Playback error: {0}")]
    PlaybackError(String),

    #[error("Transcription error: {0}")]
    TranscriptionError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Conflict: {0}")]
    ConflictError(String),

    #[error("Capture error: {0}")]
    CaptureError(String),

    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<std::io::Error> for MurmurError {
    fn from(e: std::io::Error) -> Self {
        MurmurError::IOError(e.to_string())
    }
}

impl MurmurError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Transient service failures; the pipeline degrades and continues
            MurmurError::TransportError(_) => true,
            MurmurError::SynthesisError(_) => true,
            MurmurError::PlaybackError(_) => true,
            MurmurError::TranscriptionError(_) => true,
            // Converted to result strings at the dispatcher boundary
            MurmurError::ProtocolError(_) => true,
            MurmurError::ToolError(_) => true,
            // Rejected synchronously, caller retries
            MurmurError::ConflictError(_) => true,
            // Session ends silently, caller may retry
            MurmurError::CaptureError(_) => true,
            // Hardware/device errors may require user intervention
            MurmurError::AudioDeviceError(_) => false,
            MurmurError::IOError(_) => false,
            MurmurError::ConfigError(_) => false,
            MurmurError::ChannelError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            MurmurError::TransportError(_) => {
                "The assistant service could not be reached. Please try again.".to_string()
            }
            MurmurError::SynthesisError(_) => {
                "Text-to-speech failed. The response will be shown as text.".to_string()
            }
            MurmurError::PlaybackError(_) => {
                "Audio playback failed. Please check your speakers.".to_string()
            }
            MurmurError::TranscriptionError(_) => {
                "Speech recognition failed. Please try again.".to_string()
            }
            MurmurError::ProtocolError(_) => {
                "The assistant issued a malformed request. The turn will continue.".to_string()
            }
            MurmurError::ConflictError(_) => {
                "The assistant is still responding. Please wait.".to_string()
            }
            MurmurError::CaptureError(_) => {
                "No speech was captured. Please try again.".to_string()
            }
            MurmurError::AudioDeviceError(_) => {
                "Audio device error. Please check your microphone/speakers.".to_string()
            }
            MurmurError::ToolError(_) => {
                "An assistant capability failed. The turn will continue.".to_string()
            }
            MurmurError::IOError(_) => "File system error occurred.".to_string(),
            MurmurError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            MurmurError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, MurmurError>;
