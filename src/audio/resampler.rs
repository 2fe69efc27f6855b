use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::{MurmurError, Result};

/// Mono audio resampler for matching clip rates to the output device.
pub struct AudioResampler {
    resampler: SincFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
}

impl AudioResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(MurmurError::ConfigError(
                "Sample rates must be greater than 0".into(),
            ));
        }

        let resample_ratio = output_rate as f64 / input_rate as f64;

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let chunk_size = 1024;
        let resampler = SincFixedIn::<f32>::new(resample_ratio, 2.0, params, chunk_size, 1)
            .map_err(|e| {
                MurmurError::ConfigError(format!("Failed to create resampler: {}", e))
            })?;

        debug!("Created resampler: {} Hz -> {} Hz", input_rate, output_rate);

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
        })
    }

    /// Resample a mono buffer in fixed-size chunks, zero-padding the tail.
    pub fn resample(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_size = self.resampler.input_frames_max();
        let ratio = self.output_rate as f64 / self.input_rate as f64;
        let mut output = Vec::with_capacity((input.len() as f64 * ratio * 1.1) as usize);

        let mut offset = 0;
        while offset < input.len() {
            let remaining = input.len() - offset;
            let to_read = remaining.min(chunk_size);

            let mut chunk = vec![0.0f32; chunk_size];
            chunk[..to_read].copy_from_slice(&input[offset..offset + to_read]);

            let processed = self
                .resampler
                .process(&[chunk], None)
                .map_err(|e| MurmurError::PlaybackError(format!("Resampling failed: {}", e)))?;

            // The zero-padded tail of the final chunk is trimmed
            // proportionally to the real input it carried.
            let produced = processed[0].len();
            let to_take = if remaining < chunk_size {
                ((to_read as f64) * ratio).ceil() as usize
            } else {
                produced
            };
            output.extend_from_slice(&processed[0][..to_take.min(produced)]);

            offset += to_read;
        }

        Ok(output)
    }
}

/// Resample a mono buffer in one step.
pub fn resample_audio(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == output_rate {
        return Ok(input.to_vec());
    }

    let mut resampler = AudioResampler::new(input_rate, output_rate)?;
    resampler.resample(input)
}
