//! Sample format and channel layout conversions used by the cpal callbacks.

/// Average interleaved channels down to mono.
pub fn stereo_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    let channels = usize::from(channels);
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

pub fn i16_to_f32(data: &[i16]) -> Vec<f32> {
    data.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

pub fn u16_to_f32(data: &[u16]) -> Vec<f32> {
    data.iter().map(|&s| f32::from(s) / 32768.0 - 1.0).collect()
}

pub fn adjust_volume(buffer: &mut [f32], volume: f32) {
    if (volume - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in buffer.iter_mut() {
        *sample *= volume;
    }
}

pub fn mono_to_multichannel_f32(mono: &[f32], output: &mut [f32], channels: usize) {
    for (frame, &sample) in output.chunks_exact_mut(channels).zip(mono) {
        frame.fill(sample);
    }
}

#[allow(clippy::cast_possible_truncation)]
pub fn mono_to_multichannel_i16(mono: &[f32], output: &mut [i16], channels: usize) {
    for (frame, &sample) in output.chunks_exact_mut(channels).zip(mono) {
        frame.fill((sample.clamp(-1.0, 1.0) * 32767.0) as i16);
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn mono_to_multichannel_u16(mono: &[f32], output: &mut [u16], channels: usize) {
    for (frame, &sample) in output.chunks_exact_mut(channels).zip(mono) {
        frame.fill(((sample.clamp(-1.0, 1.0) * 0.5 + 0.5) * f32::from(u16::MAX)) as u16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let mono = stereo_to_mono(&[0.2, 0.4, -1.0, 1.0, 0.5, 0.5], 2);
        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
        assert!((mono[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mono_input_is_passed_through() {
        assert_eq!(stereo_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn integer_formats_map_to_unit_range() {
        assert_eq!(i16_to_f32(&[i16::MIN, 0]), vec![-1.0, 0.0]);
        let unsigned = u16_to_f32(&[0, 32768]);
        assert!((unsigned[0] + 1.0).abs() < 1e-6);
        assert!(unsigned[1].abs() < 1e-6);
    }

    #[test]
    fn upmix_duplicates_and_clamps() {
        let mut out = [0i16; 4];
        mono_to_multichannel_i16(&[2.0, -0.5], &mut out, 2);
        assert_eq!(out, [32767, 32767, -16383, -16383]);

        let mut out = [0f32; 6];
        mono_to_multichannel_f32(&[0.25, 0.5], &mut out, 3);
        assert_eq!(out, [0.25, 0.25, 0.25, 0.5, 0.5, 0.5]);

        let mut out = [0u16; 2];
        mono_to_multichannel_u16(&[-1.0, 1.0], &mut out, 1);
        assert_eq!(out, [0, u16::MAX]);
    }

    #[test]
    fn volume_scales_samples() {
        let mut buffer = [0.5, -0.5];
        adjust_volume(&mut buffer, 0.5);
        assert_eq!(buffer, [0.25, -0.25]);
    }
}
