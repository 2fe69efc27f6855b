use crossbeam_channel::{bounded, Receiver, Sender};

use crate::speech::synthesis::AudioClip;

/// Channels connecting the synthesis queue to the playback scheduler.
pub struct SpeechChannels {
    pub clip_tx: Sender<AudioClip>,
    pub clip_rx: Receiver<AudioClip>,
}

impl SpeechChannels {
    pub fn new(buffer_size: usize) -> Self {
        let (clip_tx, clip_rx) = bounded(buffer_size);
        Self { clip_tx, clip_rx }
    }
}

/// Channels carrying microphone frames into a capture session.
pub struct CaptureChannels {
    pub frame_tx: Sender<Vec<f32>>,
    pub frame_rx: Receiver<Vec<f32>>,
}

impl CaptureChannels {
    pub fn new(buffer_size: usize) -> Self {
        let (frame_tx, frame_rx) = bounded(buffer_size);
        Self { frame_tx, frame_rx }
    }
}

/// Channels for prompts originating from the assistant's own initiative.
pub struct PromptChannels {
    pub prompt_tx: Sender<String>,
    pub prompt_rx: Receiver<String>,
}

impl PromptChannels {
    pub fn new(buffer_size: usize) -> Self {
        let (prompt_tx, prompt_rx) = bounded(buffer_size);
        Self {
            prompt_tx,
            prompt_rx,
        }
    }
}
