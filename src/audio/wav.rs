//! WAV export for captured waveform data

use anyhow::Result;
use hound::{WavSpec, WavWriter};
use std::path::Path;

/// Write time-domain byte samples to a mono 16-bit PCM WAV file
///
/// Samples are unsigned bytes centered at 128, as returned by
/// `AudioCapture::waveform_data`; they are recentered to signed 16-bit
/// on write.
pub fn waveform_to_wav<P: AsRef<Path>>(
    samples: &[u8],
    output_path: P,
    sample_rate: u32,
) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(output_path, spec)?;
    for &byte in samples {
        writer.write_sample((byte as i16 - 128) * 256)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_to_wav_recenters_samples() {
        let path = std::env::temp_dir().join(format!("audioscope-wav-test-{}.wav", std::process::id()));

        waveform_to_wav(&[128, 0, 255], &path, 48_000).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.bits_per_sample, 16);

        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, -32768, 32512]);

        std::fs::remove_file(&path).ok();
    }
}
