//! Sample-rate and channel conversion helpers shared by inputs and outputs

/// Linearly resample mono audio from `source_rate` to `target_rate`
///
/// Returns the original samples if the rates match or either rate is zero.
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || source_rate == 0 || target_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = source_rate as f64 / target_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round().max(1.0) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx] + (samples[next] - samples[idx]) * frac
        })
        .collect()
}

/// Average interleaved channels into one
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_same_rate() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_preserves_duration() {
        let samples = vec![0.0; 2400]; // 100ms at 24kHz
        assert_eq!(resample_linear(&samples, 24000, 48000).len(), 4800);
        assert_eq!(resample_linear(&samples, 24000, 16000).len(), 1600);
    }

    #[test]
    fn test_resample_interpolates() {
        let up = resample_linear(&[0.0, 1.0], 1, 2);
        assert_eq!(up.len(), 4);
        assert_eq!(up[0], 0.0);
        assert!((up[1] - 0.5).abs() < 1e-6);
        assert_eq!(up[2], 1.0);
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix_to_mono(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert_eq!(mono[1], 0.0);
    }
}
