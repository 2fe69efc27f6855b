//! Voice-activity gated recording
//!
//! Turns a live stream of audio frames into one finalized utterance. A
//! session waits for volume above the speech threshold, records until a run
//! of silence long enough to be considered "done", then emits the
//! concatenated clip. The required trailing silence grows with the length
//! of the utterance, capped at a maximum.

use crossbeam_channel::Receiver;
use tracing::{debug, info};

/// Thresholds and adaptive-silence parameters.
///
/// The formulas are behavior-compatible with the tuned values they were
/// lifted from; changing them changes when an utterance is considered
/// finished.
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub sample_rate: u32,
    /// Samples per analysis frame.
    pub frame_size: usize,
    /// RMS volume above which a frame counts as speech.
    pub speech_threshold: f32,
    /// RMS volume below which a frame counts as silence.
    pub silence_threshold: f32,
    /// Trailing silence required for the shortest utterances, in seconds.
    pub base_silence_secs: f32,
    /// Upper bound on required trailing silence, in seconds.
    pub max_silence_secs: f32,
    /// Extra required silence per second of recorded speech.
    pub silence_scaling_factor: f32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_size: 1024,
            speech_threshold: 0.01,
            silence_threshold: 0.01,
            base_silence_secs: 1.0,
            max_silence_secs: 5.0,
            silence_scaling_factor: 0.2,
        }
    }
}

/// A finalized capture: concatenated mono samples.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedUtterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl CapturedUtterance {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Session progress after consuming one frame.
#[derive(Debug, PartialEq)]
pub enum SessionStatus {
    /// No speech heard yet.
    Listening,
    /// Speech detected; accumulating.
    Recording,
    /// The silence run was exceeded; the utterance is complete.
    Finalized(CapturedUtterance),
    /// Empty input ended the session; nothing is emitted.
    Ended,
}

/// State machine over incoming frames: Listening → Recording → Finalized.
///
/// One recorder serves one session; it is consumed by finalization.
#[derive(Debug)]
pub struct VoiceActivityRecorder {
    config: RecorderConfig,
    recorded: Vec<f32>,
    speech_detected: bool,
    silence_run: u32,
}

impl VoiceActivityRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            recorded: Vec::new(),
            speech_detected: false,
            silence_run: 0,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Required trailing silence for the current recording length, in
    /// seconds: `min(max_silence, base_silence + recorded_secs * scaling)`.
    pub fn required_silence_secs(&self) -> f32 {
        let recorded_secs = self.recorded.len() as f32 / self.config.sample_rate as f32;
        self.config.max_silence_secs.min(
            self.config.base_silence_secs + recorded_secs * self.config.silence_scaling_factor,
        )
    }

    /// The silence run, in frames, that finalizes the session.
    pub fn required_silence_frames(&self) -> f32 {
        self.required_silence_secs() * self.config.sample_rate as f32
            / self.config.frame_size as f32
    }

    /// Consume one frame and advance the session.
    pub fn push_frame(&mut self, frame: &[f32]) -> SessionStatus {
        // A fully-empty frame means the input went away.
        if frame.iter().all(|s| *s == 0.0) {
            debug!("Empty frame; capture session ends without emitting");
            return SessionStatus::Ended;
        }

        let volume = rms(frame);

        if volume > self.config.speech_threshold {
            self.speech_detected = true;
            self.recorded.extend_from_slice(frame);
            self.silence_run = 0;
            return SessionStatus::Recording;
        }

        if volume < self.config.silence_threshold && self.speech_detected {
            let limit = self.required_silence_frames();
            self.silence_run += 1;
            if self.silence_run as f32 > limit {
                let utterance = CapturedUtterance {
                    samples: std::mem::take(&mut self.recorded),
                    sample_rate: self.config.sample_rate,
                };
                info!(
                    "Capture finalized: {:.2}s after {:.2}s of silence",
                    utterance.duration_secs(),
                    self.required_silence_secs()
                );
                return SessionStatus::Finalized(utterance);
            }
            return SessionStatus::Recording;
        }

        if self.speech_detected {
            // Between the thresholds while recording: keep the audio.
            self.recorded.extend_from_slice(frame);
            return SessionStatus::Recording;
        }

        SessionStatus::Listening
    }
}

/// Root-mean-square volume of a frame.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = frame.iter().map(|s| s * s).sum();
    (sum_squares / frame.len() as f32).sqrt()
}

/// Drive one capture session from a frame channel.
///
/// Returns the finalized utterance, or `None` if the session ended empty or
/// was cancelled (sender dropped mid-session).
pub fn run_session(
    mut recorder: VoiceActivityRecorder,
    frames: &Receiver<Vec<f32>>,
) -> Option<CapturedUtterance> {
    for frame in frames.iter() {
        match recorder.push_frame(&frame) {
            SessionStatus::Finalized(utterance) => {
                if utterance.is_empty() {
                    return None;
                }
                return Some(utterance);
            }
            SessionStatus::Ended => return None,
            SessionStatus::Listening | SessionStatus::Recording => {}
        }
    }
    // Channel closed before finalization: session cancelled.
    None
}
