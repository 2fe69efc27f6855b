use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::{MurmurError, Result};

/// Encode mono f32 samples as 16-bit PCM WAV bytes.
///
/// Used to hand captured utterances to the transcription collaborator
/// without touching the filesystem.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| MurmurError::IOError(format!("Failed to create WAV writer: {}", e)))?;

        for &sample in samples {
            let sample_i16 = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| MurmurError::IOError(format!("Failed to write sample: {}", e)))?;
        }

        writer
            .finalize()
            .map_err(|e| MurmurError::IOError(format!("Failed to finalize WAV data: {}", e)))?;
    }

    Ok(cursor.into_inner())
}

/// Write mono f32 samples to a WAV file.
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let bytes = encode_wav(samples, sample_rate)?;
    std::fs::write(path.as_ref(), bytes)
        .map_err(|e| MurmurError::IOError(format!("Failed to write WAV file: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wav_header_and_length() {
        let samples: Vec<f32> = (0..160).map(|i| (i as f32 * 0.01).sin()).collect();
        let bytes = encode_wav(&samples, 16000).unwrap();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");

        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.channels, 1);
        assert_eq!(reader.samples::<i16>().count(), 160);
    }

    #[test]
    fn test_encode_clamps_out_of_range_samples() {
        let bytes = encode_wav(&[2.0, -2.0], 8000).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded[0], i16::MAX);
    }
}
