//! Speech synthesis queue
//!
//! Single-consumer FIFO of [`SynthesisJob`]s with at most one synthesis in
//! flight, preserving emission order. A failed synthesis degrades to a
//! timed-pause clip proportional to the text length instead of stalling the
//! pipeline.

use std::io::Cursor;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::speech::PipelineStatus;
use crate::{MurmurError, Result};

/// Reading speed assumed when estimating the length of unspoken text.
/// A fallback pause lasts `len(text) / 25` seconds.
pub const FALLBACK_CHARS_PER_SECOND: f32 = 25.0;

/// Capacity of the job and clip channels.
const QUEUE_CAPACITY: usize = 100;

/// One sentence queued for synthesis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesisJob {
    pub text: String,
    /// Strictly increasing within a turn; playback order is keyed on it.
    pub seq: usize,
}

impl SynthesisJob {
    pub fn new(text: impl Into<String>, seq: usize) -> Self {
        Self {
            text: text.into(),
            seq,
        }
    }
}

/// Audio produced by the synthesis collaborator.
#[derive(Clone, Debug)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SynthesizedAudio {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Payload of a finished clip: real audio, or a timed pause standing in for
/// audio that could not be synthesized.
#[derive(Clone, Debug)]
pub enum ClipPayload {
    Samples { samples: Vec<f32>, sample_rate: u32 },
    Pause { duration: Duration },
}

/// A clip ready for playback, ordered by `seq`.
#[derive(Clone, Debug)]
pub struct AudioClip {
    pub seq: usize,
    pub payload: ClipPayload,
}

impl AudioClip {
    pub fn duration_secs(&self) -> f32 {
        match &self.payload {
            ClipPayload::Samples {
                samples,
                sample_rate,
            } => {
                if *sample_rate == 0 {
                    0.0
                } else {
                    samples.len() as f32 / *sample_rate as f32
                }
            }
            ClipPayload::Pause { duration } => duration.as_secs_f32(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.payload, ClipPayload::Pause { .. })
    }
}

/// Synthesis collaborator: text in, audio out, may fail.
pub trait SpeechSynthesizer: Send {
    fn synthesize(&mut self, text: &str) -> Result<SynthesizedAudio>;
}

/// Command sent to the synthesis worker.
#[derive(Clone, Debug)]
enum SynthesisCommand {
    Synthesize(SynthesisJob),
    Shutdown,
}

/// Producer-side handle to the queue.
#[derive(Clone)]
pub struct SynthesisHandle {
    command_tx: Sender<SynthesisCommand>,
    status: PipelineStatus,
}

impl SynthesisHandle {
    /// Enqueue a sentence. The pending-job counter is bumped before the job
    /// is visible to the worker so the gating poll never misses it.
    pub fn enqueue(&self, job: SynthesisJob) -> Result<()> {
        self.status.job_enqueued();
        self.command_tx
            .send(SynthesisCommand::Synthesize(job))
            .map_err(|e| {
                self.status.job_finished();
                MurmurError::ChannelError(format!("Failed to enqueue synthesis job: {}", e))
            })
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(SynthesisCommand::Shutdown);
    }
}

/// The synthesis queue worker.
///
/// Jobs are processed strictly in enqueue order; the worker is the only
/// consumer, so at most one synthesis operation is in flight at any time.
pub struct SpeechSynthesisQueue {
    command_tx: Sender<SynthesisCommand>,
    command_rx: Receiver<SynthesisCommand>,
    clip_tx: Sender<AudioClip>,
    status: PipelineStatus,
}

impl SpeechSynthesisQueue {
    pub fn new(clip_tx: Sender<AudioClip>, status: PipelineStatus) -> Self {
        let (command_tx, command_rx) = bounded(QUEUE_CAPACITY);
        Self {
            command_tx,
            command_rx,
            clip_tx,
            status,
        }
    }

    pub fn handle(&self) -> SynthesisHandle {
        SynthesisHandle {
            command_tx: self.command_tx.clone(),
            status: self.status.clone(),
        }
    }

    /// Start the worker thread, consuming the queue.
    pub fn start_worker(self, mut synthesizer: Box<dyn SpeechSynthesizer>) -> JoinHandle<()> {
        let command_rx = self.command_rx;
        let clip_tx = self.clip_tx;
        let status = self.status;

        thread::spawn(move || {
            info!("Synthesis queue worker starting");

            loop {
                match command_rx.recv() {
                    Ok(SynthesisCommand::Synthesize(job)) => {
                        let clip = synthesize_job(synthesizer.as_mut(), &job);

                        // Clip counted before the job is released so the
                        // gating poll never sees a gap between the stages.
                        status.clip_enqueued();
                        let send_failed = clip_tx.send(clip).is_err();
                        if send_failed {
                            status.clip_dequeued();
                        }
                        status.job_finished();

                        if send_failed {
                            warn!("Clip channel closed; stopping synthesis worker");
                            break;
                        }
                    }
                    Ok(SynthesisCommand::Shutdown) => {
                        info!("Synthesis queue worker shutting down");
                        break;
                    }
                    Err(e) => {
                        error!("Synthesis command channel error: {}", e);
                        break;
                    }
                }
            }

            info!("Synthesis queue worker stopped");
        })
    }
}

/// Synthesize one job, degrading to a timed pause on failure.
fn synthesize_job(synthesizer: &mut dyn SpeechSynthesizer, job: &SynthesisJob) -> AudioClip {
    debug!(
        "Synthesizing segment {}: {}",
        job.seq,
        job.text.chars().take(50).collect::<String>()
    );

    match synthesizer.synthesize(&job.text) {
        Ok(audio) => AudioClip {
            seq: job.seq,
            payload: ClipPayload::Samples {
                samples: audio.samples,
                sample_rate: audio.sample_rate,
            },
        },
        Err(e) => {
            warn!("Synthesis failed for segment {}: {}", job.seq, e);
            AudioClip {
                seq: job.seq,
                payload: ClipPayload::Pause {
                    duration: fallback_duration(&job.text),
                },
            }
        }
    }
}

/// Pause duration substituting for audio of the given text.
pub fn fallback_duration(text: &str) -> Duration {
    Duration::from_secs_f32(text.len() as f32 / FALLBACK_CHARS_PER_SECOND)
}

/// HTTP synthesis collaborator for OpenAI-compatible `/v1/audio/speech`.
///
/// Requests WAV output and decodes it to samples for the playback sink.
pub struct HttpSynthesizer {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl HttpSynthesizer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| MurmurError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
        })
    }
}

impl SpeechSynthesizer for HttpSynthesizer {
    fn synthesize(&mut self, text: &str) -> Result<SynthesizedAudio> {
        let url = format!("{}/v1/audio/speech", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "response_format": "wav",
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| MurmurError::SynthesisError(format!("Speech request failed: {}", e)))?;

        let bytes = response
            .bytes()
            .map_err(|e| MurmurError::SynthesisError(format!("Failed to read audio: {}", e)))?;

        decode_wav(&bytes)
    }
}

/// Decode a WAV byte buffer into mono f32 samples.
fn decode_wav(bytes: &[u8]) -> Result<SynthesizedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| MurmurError::SynthesisError(format!("Invalid WAV payload: {}", e)))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| MurmurError::SynthesisError(format!("Failed to read sample: {}", e)))?,
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| MurmurError::SynthesisError(format!("Failed to read sample: {}", e)))?,
    };

    // Mix down to mono for the playback sink.
    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(SynthesizedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}
