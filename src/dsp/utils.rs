/// One-pole smoothing coefficient for a step of `dt_sec` against time
/// constant `tau_sec`. 0.0 means jump straight to the target.
pub fn step_coeff(tau_sec: f32, dt_sec: f32) -> f32 {
    if tau_sec <= 0.0 || dt_sec <= 0.0 {
        return 0.0;
    }
    (-dt_sec / tau_sec).exp()
}

pub fn frame_rms(x: &[f32]) -> f32 {
    let mut s = 0.0f32;
    for &v in x {
        s += v * v;
    }
    (s / (x.len().max(1) as f32)).sqrt()
}

pub fn frame_peak(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_stats() {
        assert_eq!(frame_rms(&[]), 0.0);
        assert!((frame_rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert_eq!(frame_peak(&[0.1, -0.7, 0.3]), 0.7);
    }

    #[test]
    fn test_step_coeff_bounds() {
        assert_eq!(step_coeff(0.0, 0.2), 0.0);
        let c = step_coeff(1.0, 0.2);
        assert!(c > 0.8 && c < 0.83);
    }
}
