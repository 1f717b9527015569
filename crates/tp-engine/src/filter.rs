//! Impulse Tracker resonant low-pass filter.
//!
//! A two-pole IIR filter. Cutoff and resonance are 0-255 (the IT 0-127
//! scale doubled); the filter is bypassed when the cutoff is at the top of
//! the range with no resonance.

/// Fixed-point shift of the filter coefficients.
pub const FILTER_SHIFT: u32 = 16;

/// Filter state samples are kept within this range.
const STATE_LIMIT: i64 = 65536 * 2;

/// Coefficients computed for one cutoff/resonance pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterCoefficients {
    pub a0: i32,
    pub b0: i32,
    pub b1: i32,
}

/// Per-voice filter: parameters, coefficients and history.
#[derive(Clone, Copy, Debug)]
pub struct VoiceFilter {
    pub cutoff: i32,
    pub resonance: i32,
    pub coef: FilterCoefficients,
    l1: i64,
    l2: i64,
    r1: i64,
    r2: i64,
}

impl Default for VoiceFilter {
    fn default() -> Self {
        Self {
            cutoff: 0xff,
            resonance: 0,
            coef: FilterCoefficients::default(),
            l1: 0,
            l2: 0,
            r1: 0,
            r2: 0,
        }
    }
}

impl VoiceFilter {
    /// True if samples must go through the filter.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.cutoff < 0xfe || self.resonance > 0
    }

    pub fn set(&mut self, cutoff: i32, resonance: i32, coef: FilterCoefficients) {
        self.cutoff = cutoff;
        self.resonance = resonance;
        self.coef = coef;
    }

    /// Clear the filter history (new sample).
    pub fn clear_history(&mut self) {
        self.l1 = 0;
        self.l2 = 0;
        self.r1 = 0;
        self.r2 = 0;
    }

    #[inline]
    pub fn process_left(&mut self, input: i32) -> i32 {
        let out = step(&self.coef, input, self.l1, self.l2);
        self.l2 = self.l1;
        self.l1 = out;
        out as i32
    }

    #[inline]
    pub fn process_right(&mut self, input: i32) -> i32 {
        let out = step(&self.coef, input, self.r1, self.r2);
        self.r2 = self.r1;
        self.r1 = out;
        out as i32
    }
}

#[inline]
fn step(c: &FilterCoefficients, input: i32, y1: i64, y2: i64) -> i64 {
    let acc = c.a0 as i64 * input as i64 + c.b0 as i64 * y1 + c.b1 as i64 * y2;
    ((acc + (1 << (FILTER_SHIFT - 1))) >> FILTER_SHIFT).clamp(-STATE_LIMIT, STATE_LIMIT - 1)
}

/// Compute filter coefficients for `cutoff` and `resonance` (0-255) at
/// the output sample rate.
pub fn filter_setup(sample_rate: u32, cutoff: i32, resonance: i32) -> FilterCoefficients {
    let cutoff = cutoff.clamp(0, 255) as f64;
    let res = (resonance.clamp(0, 255) >> 1) as f64;
    let fs = sample_rate as f64;

    // Damping: -24 dB across the resonance range
    let damp = libm::pow(10.0, -((24.0 / 128.0) * res) / 20.0);

    let mut freq = 110.0 * libm::exp2(0.25 + cutoff / 48.0);
    if freq > fs / 2.0 {
        freq = fs / 2.0;
    }
    let fc = freq * 2.0 * core::f64::consts::PI / fs;

    let mut d = (1.0 - 2.0 * damp) * fc;
    if d > 2.0 {
        d = 2.0;
    }
    d = (2.0 * damp - d) / fc;
    let e = 1.0 / (fc * fc);

    let fg = 1.0 / (1.0 + d + e);
    let fb0 = (d + e + e) / (1.0 + d + e);
    let fb1 = -e / (1.0 + d + e);

    let scale = (1u32 << FILTER_SHIFT) as f64;
    FilterCoefficients {
        a0: (fg * scale) as i32,
        b0: (fb0 * scale) as i32,
        b1: (fb1 * scale) as i32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_cutoff_without_resonance_bypasses() {
        let mut f = VoiceFilter::default();
        f.set(0xfe, 0, filter_setup(44100, 0xfe, 0));
        assert!(!f.is_enabled());
        f.set(0xfe, 2, filter_setup(44100, 0xfe, 2));
        assert!(f.is_enabled());
        f.set(0x80, 0, filter_setup(44100, 0x80, 0));
        assert!(f.is_enabled());
    }

    #[test]
    fn coefficients_have_unity_dc_gain() {
        let c = filter_setup(44100, 100, 0);
        let sum = c.a0 + c.b0 + c.b1;
        assert!((sum - (1 << FILTER_SHIFT)).abs() < 8, "sum = {sum}");
    }

    #[test]
    fn low_cutoff_settles_to_dc_input() {
        let mut f = VoiceFilter::default();
        f.set(100, 0, filter_setup(44100, 100, 0));
        let mut out = 0;
        for _ in 0..20000 {
            out = f.process_left(10000);
        }
        assert!((out - 10000).abs() < 300, "out = {out}");
    }

    #[test]
    fn low_cutoff_attenuates_alternating_signal() {
        let mut f = VoiceFilter::default();
        f.set(100, 0, filter_setup(44100, 100, 0));
        let mut peak = 0;
        for i in 0..4000 {
            let x = if i % 2 == 0 { 20000 } else { -20000 };
            let y = f.process_left(x);
            if i > 2000 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 500, "peak = {peak}");
    }

    #[test]
    fn channels_keep_separate_history() {
        let mut f = VoiceFilter::default();
        f.set(60, 0, filter_setup(44100, 60, 0));
        f.process_left(30000);
        assert_eq!(f.process_right(0), 0);
        f.clear_history();
        assert_eq!(f.process_left(0), 0);
    }
}
