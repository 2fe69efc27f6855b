#[cfg(feature = "audio-io")]
pub mod input;
#[cfg(feature = "audio-io")]
pub mod output;
pub mod recorder;
pub mod resampler;
pub mod transcribe;
pub mod wav;

#[cfg(feature = "audio-io")]
pub use input::AudioInput;
#[cfg(feature = "audio-io")]
pub use output::CpalSink;
pub use recorder::{CapturedUtterance, RecorderConfig, SessionStatus, VoiceActivityRecorder};
pub use resampler::resample_audio;
pub use transcribe::{HttpTranscriber, Transcriber};
