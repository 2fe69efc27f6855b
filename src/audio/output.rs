use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::audio::resampler::resample_audio;
use crate::speech::playback::AudioSink;
use crate::{MurmurError, Result};

/// Extra wait beyond the nominal clip duration before giving up on the
/// device draining its buffer.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Playback sink on the default output device.
///
/// `play` is synchronous: it returns once the clip has fully drained, which
/// is exactly the contract the playback scheduler needs for exclusivity.
pub struct CpalSink {
    device: Device,
    config: StreamConfig,
}

impl CpalSink {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| MurmurError::AudioDeviceError("No output device available".into()))?;

        info!(
            "Using output device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = device
            .default_output_config()
            .map_err(|e| {
                MurmurError::AudioDeviceError(format!("Failed to get output config: {}", e))
            })?
            .into();

        Ok(Self { device, config })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl AudioSink for CpalSink {
    fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let device_rate = self.config.sample_rate.0;
        let samples = if sample_rate != device_rate {
            resample_audio(samples, sample_rate, device_rate)?
        } else {
            samples.to_vec()
        };

        let duration = Duration::from_secs_f32(samples.len() as f32 / device_rate as f32);
        debug!("Playing {:.2}s clip on output device", duration.as_secs_f32());

        let queue = Arc::new(Mutex::new(VecDeque::from(samples)));
        let finished = Arc::new(AtomicBool::new(false));

        let channels = self.config.channels as usize;
        let queue_cb = Arc::clone(&queue);
        let finished_cb = Arc::clone(&finished);

        let err_fn = |err| {
            error!("Audio output stream error: {}", err);
        };

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = queue_cb.lock();
                    for frame in data.chunks_mut(channels) {
                        match queue.pop_front() {
                            Some(sample) => frame.fill(sample),
                            None => {
                                frame.fill(0.0);
                                finished_cb.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| {
                MurmurError::PlaybackError(format!("Failed to build output stream: {}", e))
            })?;

        stream.play().map_err(|e| {
            MurmurError::PlaybackError(format!("Failed to start output stream: {}", e))
        })?;

        let deadline = Instant::now() + duration + DRAIN_GRACE;
        while !finished.load(Ordering::SeqCst) {
            if Instant::now() > deadline {
                return Err(MurmurError::PlaybackError(
                    "Output device did not drain in time".to_string(),
                ));
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        drop(stream);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_creation() {
        // This test might fail in CI environments without audio devices
        if let Ok(sink) = CpalSink::new() {
            assert!(sink.sample_rate() > 0);
        }
    }
}
