//! Playback scheduling
//!
//! Drains the clip queue strictly in sequence order, plays exactly one clip
//! at a time, and drives the speaking/input-enable signals consumed by the
//! presentation layer. Readiness is a bounded poll, not an edge-triggered
//! event, so jobs enqueued after a check started are picked up on the next
//! tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::speech::synthesis::{AudioClip, ClipPayload};
use crate::speech::PipelineStatus;
use crate::Result;

/// Capacity of the playback event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Playback collaborator: plays samples synchronously to completion.
pub trait AudioSink: Send {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()>;
}

/// Signals emitted toward the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackEvent {
    SpeakingStarted { seq: usize },
    SpeakingFinished { seq: usize },
    InputEnabled,
    InputDisabled,
    Shutdown,
}

/// Tunable poll intervals.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Fixed tick for both the clip poll and the input-enable recheck.
    pub poll_interval: Duration,

    /// Breathing pause between consecutive clips.
    pub post_clip_pause: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            post_clip_pause: Duration::from_millis(500),
        }
    }
}

/// Sequential, exclusive clip playback with input-enable gating.
pub struct PlaybackScheduler {
    config: PlaybackConfig,
    clip_rx: Receiver<AudioClip>,
    event_tx: Sender<PlaybackEvent>,
    event_rx: Receiver<PlaybackEvent>,
    status: PipelineStatus,
    stop: Arc<AtomicBool>,
}

impl PlaybackScheduler {
    pub fn new(config: PlaybackConfig, clip_rx: Receiver<AudioClip>, status: PipelineStatus) -> Self {
        let (event_tx, event_rx) = bounded(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            clip_rx,
            event_tx,
            event_rx,
            status,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn event_receiver(&self) -> Receiver<PlaybackEvent> {
        self.event_rx.clone()
    }

    /// Flag shared with the worker; set to stop at the next tick.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Start the playback worker, consuming the scheduler.
    pub fn start_worker(self, mut sink: Box<dyn AudioSink>) -> JoinHandle<()> {
        let config = self.config;
        let clip_rx = self.clip_rx;
        let event_tx = self.event_tx;
        let status = self.status;
        let stop = self.stop;

        thread::spawn(move || {
            info!("Playback scheduler starting");

            // Input starts enabled; the first enqueued job flips it off on
            // the next tick.
            let mut input_enabled = true;
            let mut last_seq: Option<usize> = None;

            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }

                // Gate first: a clip that would drain instantly must still
                // be observed as a disabled window.
                update_gate(&status, &event_tx, &mut input_enabled);

                match clip_rx.recv_timeout(config.poll_interval) {
                    Ok(clip) => {
                        if let Some(last) = last_seq {
                            if clip.seq <= last {
                                warn!("Clip {} arrived after clip {}", clip.seq, last);
                            }
                        }
                        last_seq = Some(clip.seq);
                        play_clip(sink.as_mut(), clip, &status, &event_tx, &config);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        debug!("Clip channel closed; playback scheduler draining");
                        break;
                    }
                }
            }

            // Whatever remains is abandoned, but the gate must settle so the
            // presentation layer is not left disabled.
            update_gate(&status, &event_tx, &mut input_enabled);
            let _ = event_tx.send(PlaybackEvent::Shutdown);
            info!("Playback scheduler stopped");
        })
    }
}

/// Play one clip to completion, bracketed by the speaking signals.
///
/// A sink failure is treated as a zero-duration clip; the finished signal is
/// still emitted so downstream ordering is preserved.
fn play_clip(
    sink: &mut dyn AudioSink,
    clip: AudioClip,
    status: &PipelineStatus,
    event_tx: &Sender<PlaybackEvent>,
    config: &PlaybackConfig,
) {
    status.set_playing(true);
    status.clip_dequeued();

    let seq = clip.seq;
    let _ = event_tx.send(PlaybackEvent::SpeakingStarted { seq });
    debug!("Playing clip {} ({:.2}s)", seq, clip.duration_secs());

    match clip.payload {
        ClipPayload::Samples {
            samples,
            sample_rate,
        } => {
            if let Err(e) = sink.play(&samples, sample_rate) {
                warn!("Playback failed for clip {}: {}", seq, e);
            }
        }
        ClipPayload::Pause { duration } => thread::sleep(duration),
    }

    let _ = event_tx.send(PlaybackEvent::SpeakingFinished { seq });
    status.set_playing(false);
    thread::sleep(config.post_clip_pause);
}

/// Re-check the input-enable condition, emitting only on changes.
fn update_gate(status: &PipelineStatus, event_tx: &Sender<PlaybackEvent>, input_enabled: &mut bool) {
    let quiescent = status.is_quiescent();
    if quiescent && !*input_enabled {
        *input_enabled = true;
        let _ = event_tx.send(PlaybackEvent::InputEnabled);
    } else if !quiescent && *input_enabled {
        *input_enabled = false;
        let _ = event_tx.send(PlaybackEvent::InputDisabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::synthesis::{SpeechSynthesisQueue, SpeechSynthesizer, SynthesisJob, SynthesizedAudio};
    use crate::MurmurError;
    use std::time::Instant;

    fn test_config() -> PlaybackConfig {
        PlaybackConfig {
            poll_interval: Duration::from_millis(5),
            post_clip_pause: Duration::from_millis(1),
        }
    }

    struct InstantSink;

    impl AudioSink for InstantSink {
        fn play(&mut self, _samples: &[f32], _sample_rate: u32) -> Result<()> {
            Ok(())
        }
    }

    struct FailingSink;

    impl AudioSink for FailingSink {
        fn play(&mut self, _samples: &[f32], _sample_rate: u32) -> Result<()> {
            Err(MurmurError::PlaybackError("device gone".to_string()))
        }
    }

    fn sample_clip(seq: usize) -> AudioClip {
        AudioClip {
            seq,
            payload: ClipPayload::Samples {
                samples: vec![0.0; 10],
                sample_rate: 22050,
            },
        }
    }

    fn collect_events(rx: &Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(PlaybackEvent::Shutdown) => break,
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }

    #[test]
    fn test_exclusive_sequential_playback() {
        let (clip_tx, clip_rx) = bounded(16);
        let status = PipelineStatus::new();
        let scheduler = PlaybackScheduler::new(test_config(), clip_rx, status.clone());
        let event_rx = scheduler.event_receiver();

        for seq in 0..3 {
            status.clip_enqueued();
            clip_tx.send(sample_clip(seq)).unwrap();
        }
        drop(clip_tx);

        let worker = scheduler.start_worker(Box::new(InstantSink));
        let events = collect_events(&event_rx);
        worker.join().unwrap();

        // speaking-finished for clip N strictly precedes speaking-started
        // for clip N+1.
        let speaking: Vec<&PlaybackEvent> = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    PlaybackEvent::SpeakingStarted { .. } | PlaybackEvent::SpeakingFinished { .. }
                )
            })
            .collect();
        let expected: Vec<PlaybackEvent> = (0..3)
            .flat_map(|seq| {
                [
                    PlaybackEvent::SpeakingStarted { seq },
                    PlaybackEvent::SpeakingFinished { seq },
                ]
            })
            .collect();
        assert_eq!(speaking.len(), expected.len());
        for (actual, wanted) in speaking.iter().zip(expected.iter()) {
            assert_eq!(**actual, *wanted);
        }
    }

    #[test]
    fn test_gate_disables_then_reenables() {
        let (clip_tx, clip_rx) = bounded(16);
        let status = PipelineStatus::new();
        let scheduler = PlaybackScheduler::new(test_config(), clip_rx, status.clone());
        let event_rx = scheduler.event_receiver();

        status.clip_enqueued();
        clip_tx.send(sample_clip(0)).unwrap();
        drop(clip_tx);

        let worker = scheduler.start_worker(Box::new(InstantSink));
        let events = collect_events(&event_rx);
        worker.join().unwrap();

        let disabled = events.iter().position(|e| *e == PlaybackEvent::InputDisabled);
        let enabled = events.iter().position(|e| *e == PlaybackEvent::InputEnabled);
        assert!(disabled.is_some());
        assert!(enabled.is_some());
        assert!(disabled.unwrap() < enabled.unwrap());
    }

    #[test]
    fn test_failed_playback_still_emits_finished() {
        let (clip_tx, clip_rx) = bounded(16);
        let status = PipelineStatus::new();
        let scheduler = PlaybackScheduler::new(test_config(), clip_rx, status.clone());
        let event_rx = scheduler.event_receiver();

        status.clip_enqueued();
        clip_tx.send(sample_clip(0)).unwrap();
        drop(clip_tx);

        let worker = scheduler.start_worker(Box::new(FailingSink));
        let events = collect_events(&event_rx);
        worker.join().unwrap();

        assert!(events.contains(&PlaybackEvent::SpeakingFinished { seq: 0 }));
        assert!(!status.is_playing());
    }

    #[test]
    fn test_fallback_clip_times_out_instead_of_stalling() {
        let (clip_tx, clip_rx) = bounded(16);
        let status = PipelineStatus::new();
        let scheduler = PlaybackScheduler::new(test_config(), clip_rx, status.clone());
        let event_rx = scheduler.event_receiver();

        status.clip_enqueued();
        clip_tx
            .send(AudioClip {
                seq: 0,
                payload: ClipPayload::Pause {
                    duration: Duration::from_millis(30),
                },
            })
            .unwrap();
        drop(clip_tx);

        let start = Instant::now();
        let worker = scheduler.start_worker(Box::new(InstantSink));
        let events = collect_events(&event_rx);
        worker.join().unwrap();

        assert!(events.contains(&PlaybackEvent::SpeakingFinished { seq: 0 }));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_end_to_end_synthesis_into_playback_order() {
        struct FailSecond {
            calls: usize,
        }
        impl SpeechSynthesizer for FailSecond {
            fn synthesize(&mut self, _text: &str) -> Result<SynthesizedAudio> {
                self.calls += 1;
                if self.calls == 2 {
                    return Err(MurmurError::SynthesisError("down".to_string()));
                }
                Ok(SynthesizedAudio {
                    samples: vec![0.0; 10],
                    sample_rate: 22050,
                })
            }
        }

        let (clip_tx, clip_rx) = bounded(16);
        let status = PipelineStatus::new();
        let queue = SpeechSynthesisQueue::new(clip_tx, status.clone());
        let synth_handle = queue.handle();
        let scheduler = PlaybackScheduler::new(test_config(), clip_rx, status.clone());
        let event_rx = scheduler.event_receiver();

        let synth_worker = queue.start_worker(Box::new(FailSecond { calls: 0 }));
        let playback_worker = scheduler.start_worker(Box::new(InstantSink));

        synth_handle.enqueue(SynthesisJob::new("A", 0)).unwrap();
        synth_handle.enqueue(SynthesisJob::new("B", 1)).unwrap();
        synth_handle.enqueue(SynthesisJob::new("C", 2)).unwrap();
        synth_handle.shutdown();
        synth_worker.join().unwrap();

        let events = collect_events(&event_rx);
        playback_worker.join().unwrap();

        let started: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                PlaybackEvent::SpeakingStarted { seq } => Some(*seq),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![0, 1, 2]);
        assert!(status.is_quiescent());
    }
}
