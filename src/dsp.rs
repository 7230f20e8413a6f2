//! Pure per-block signal helpers used by the routing chain.

/// Soft-limit drive applied before `tanh` when gain exceeds unity.
const LIMITER_DRIVE: f32 = 0.9;

/// Make-up factor applied after `tanh` soft limiting.
const LIMITER_MAKEUP: f32 = 1.1;

/// Root-mean-square amplitude of an interleaved block.
///
/// Used as the per-block energy proxy for feedback detection.
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Single-pole smoothing across frames: `out[i] = in[i]*0.9 + in[i-1]*0.1`
/// per channel, with the first frame passed through unsmoothed.
///
/// Applied to the capture block once per callback when the sample rate
/// exceeds 48 kHz, as a cheap anti-aliasing measure for very high rates.
/// `channels` is the interleave stride, so each channel mixes with its own
/// previous frame.
pub fn smooth_frames(block: &mut [f32], channels: usize) {
    if channels == 0 || block.len() <= channels {
        return;
    }
    // Walk backwards so every read of the previous frame sees the
    // original input, not an already-smoothed value.
    for i in (channels..block.len()).rev() {
        block[i] = block[i] * 0.9 + block[i - channels] * 0.1;
    }
}

/// Applies a linear gain factor, soft-limiting boosted signals.
///
/// For `gain <= 1.0` this is a plain multiply. Above unity, the result is
/// run through `tanh(x * 0.9) * 1.1` so boosted channels saturate smoothly
/// instead of hard-clipping.
pub fn apply_gain(block: &mut [f32], gain: f32) {
    if gain > 1.0 {
        for sample in block.iter_mut() {
            *sample = (*sample * gain * LIMITER_DRIVE).tanh() * LIMITER_MAKEUP;
        }
    } else {
        for sample in block.iter_mut() {
            *sample *= gain;
        }
    }
}

/// Pearson correlation coefficient between two equal-length slices.
///
/// Returns `None` when either slice has zero variance (the coefficient is
/// undefined) or the lengths differ.
#[must_use]
pub fn pearson(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().map(|&x| f64::from(x)).sum::<f64>() / n;
    let mean_b = b.iter().map(|&x| f64::from(x)).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = f64::from(x) - mean_a;
        let dy = f64::from(y) - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())) as f32)
}
