// Sample conversions between the capture device format and the wire format
//
// Capture devices deliver interleaved frames at their native rate; the live
// channel wants 16kHz mono. Playback renders at a fixed rate.

/// Downmix interleaved samples to mono by averaging channels
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample mono audio with linear interpolation
///
/// Equal or zero rates return the input unchanged.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

/// Root-mean-square energy of a block
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Meter level in [0, 1]: amplified RMS, saturating at 1
pub fn volume_level(samples: &[f32], gain: f32) -> f32 {
    let level = rms(samples) * gain;
    if level.is_nan() {
        return 0.0;
    }
    level.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_mono_averages_stereo() {
        let stereo = vec![0.5, -0.5, 1.0, 0.0, 0.2, 0.4];
        let mono = to_mono(&stereo, 2);
        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.0).abs() < 1e-6);
        assert!((mono[1] - 0.5).abs() < 1e-6);
        assert!((mono[2] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_to_mono_passthrough() {
        let mono = vec![0.1, 0.2, 0.3];
        assert_eq!(to_mono(&mono, 1), mono);
    }

    #[test]
    fn test_resample_48k_to_16k_length() {
        let input = vec![0.25; 4800];
        let output = resample(&input, 48000, 16000);
        assert_eq!(output.len(), 1600);
        assert!(output.iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_resample_44_1k_block() {
        // One 4096-sample block at 44.1kHz is ~92.9ms
        let output = resample(&vec![0.0; 4096], 44100, 16000);
        assert_eq!(output.len(), 1486);
    }

    #[test]
    fn test_resample_interpolates() {
        let input = vec![0.0, 1.0];
        let output = resample(&input, 8000, 16000);
        assert_eq!(output.len(), 4);
        assert!((output[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&input, 16000, 16000), input);
    }

    #[test]
    fn test_rms_and_volume() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert!((volume_level(&[0.1, -0.1], 5.0) - 0.5).abs() < 1e-6);
        assert_eq!(volume_level(&[0.9, -0.9], 5.0), 1.0);
        assert_eq!(volume_level(&[0.0; 64], 5.0), 0.0);
    }
}
