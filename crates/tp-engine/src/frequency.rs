//! Period and pitch-bend conversions.
//!
//! Pitches are tracked as periods. Amiga periods are inversely
//! proportional to frequency; linear periods are 16 units per semitone.
//! Key 60 maps to Amiga period 428, which plays a sample at the module's
//! C-4 rate.

use tp_ir::PeriodType;

/// Amiga period of key 0; key `n` is `PERIOD_BASE / 2^(n/12)`.
pub const PERIOD_BASE: f64 = 13696.0;

/// Amiga period of key 60, which plays at the C-4 rate.
pub const C4_PERIOD: f64 = 428.0;

/// Lowest linear period.
pub const MIN_PERIOD_LINEAR: f64 = 0.0;

/// Highest linear period.
pub const MAX_PERIOD_LINEAR: f64 = 7680.0;

/// Lowest key of the ProTracker range (C-3 in Amiga notation, period 856).
pub const MIN_NOTE_MOD: i32 = 48;

/// Highest key of the ProTracker range (B-5 in Amiga notation, period 113).
pub const MAX_NOTE_MOD: i32 = 83;

/// Pitch bend units per semitone.
pub const BEND_PER_SEMITONE: i32 = 12800;

/// Convert a key plus finetune (1/128 semitone) to a period.
pub fn note_to_period(period_type: PeriodType, note: i32, finetune: i32) -> f64 {
    let d = note as f64 + finetune as f64 / 128.0;
    match period_type {
        PeriodType::Linear => (240.0 - d) * 16.0,
        PeriodType::Amiga | PeriodType::ModRange => PERIOD_BASE / libm::exp2(d / 12.0),
    }
}

/// Period used by the mixer for a key plus a bend in 1/12800 semitone.
pub fn note_to_period_mix(note: i32, bend: i32) -> f64 {
    let d = note as f64 + bend as f64 / BEND_PER_SEMITONE as f64;
    PERIOD_BASE / libm::exp2(d / 12.0)
}

/// Nearest key for an Amiga period (0 for no period).
pub fn period_to_note(period: f64) -> i32 {
    if period <= 0.0 {
        return 0;
    }
    libm::round(12.0 * libm::log2(PERIOD_BASE / period)) as i32
}

/// Pitch bend of `period` relative to the unbent period of `note`.
pub fn period_to_bend(period_type: PeriodType, period: f64, note: i32) -> i32 {
    if note == 0 {
        return 0;
    }
    match period_type {
        PeriodType::Linear => (100.0 * (8.0 * (((240 - note) << 4) as f64 - period))) as i32,
        PeriodType::Amiga | PeriodType::ModRange => {
            if period <= 0.0 {
                return 0;
            }
            let d = note_to_period(period_type, note, 0);
            libm::round(100.0 * (1536.0 / core::f64::consts::LN_2) * libm::log(d / period)) as i32
        }
    }
}

/// Period clamp range for slides at `finetune`, if the pitch model has one.
pub fn period_limits(period_type: PeriodType, finetune: i32) -> Option<(f64, f64)> {
    match period_type {
        PeriodType::Linear => Some((MIN_PERIOD_LINEAR, MAX_PERIOD_LINEAR)),
        PeriodType::ModRange => Some((
            note_to_period(period_type, MAX_NOTE_MOD, finetune),
            note_to_period(period_type, MIN_NOTE_MOD, finetune),
        )),
        PeriodType::Amiga => None,
    }
}

/// Largest accepted 16.16 step: a voice stepping faster than 256 frames
/// per output sample is skipped for the tick.
pub const MAX_STEP: u64 = 256 << 16;

/// Convert a mixer period to a 16.16 fixed-point step.
///
/// Formula: freq = c4_rate * 428 / period, then step = freq * 65536 / sample_rate.
/// Returns `None` for a zero, negative or absurd step.
pub fn period_to_step(period: f64, c4_rate: u32, sample_rate: u32) -> Option<u32> {
    if !(period > 0.0) || sample_rate == 0 {
        return None;
    }
    let freq = c4_rate as f64 * C4_PERIOD / period;
    let step = freq * 65536.0 / sample_rate as f64;
    if !(step >= 1.0) || step > MAX_STEP as f64 {
        return None;
    }
    Some(step as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const C4_RATE: u32 = 8363;
    const SAMPLE_RATE: u32 = 44100;

    #[test]
    fn key_60_is_period_428() {
        let p = note_to_period(PeriodType::Amiga, 60, 0);
        assert!((p - 428.0).abs() < 1e-9);
        assert!((note_to_period_mix(60, 0) - 428.0).abs() < 1e-9);
    }

    #[test]
    fn octave_up_halves_period() {
        let base = note_to_period(PeriodType::Amiga, 48, 0);
        let up = note_to_period(PeriodType::Amiga, 60, 0);
        assert!((base / up - 2.0).abs() < 1e-9);
    }

    #[test]
    fn linear_period_is_sixteen_per_semitone() {
        assert_eq!(note_to_period(PeriodType::Linear, 60, 0), 2880.0);
        assert_eq!(note_to_period(PeriodType::Linear, 61, 0), 2864.0);
        assert_eq!(note_to_period(PeriodType::Linear, 60, 64), 2872.0);
    }

    #[test]
    fn period_to_note_inverts() {
        for key in [24, 48, 60, 71, 95] {
            let p = note_to_period(PeriodType::Amiga, key, 0);
            assert_eq!(period_to_note(p), key);
        }
        assert_eq!(period_to_note(0.0), 0);
    }

    #[test]
    fn bend_of_unbent_period_is_zero() {
        let p = note_to_period(PeriodType::Amiga, 60, 0);
        assert_eq!(period_to_bend(PeriodType::Amiga, p, 60), 0);
        assert_eq!(period_to_bend(PeriodType::Linear, 2880.0, 60), 0);
    }

    #[test]
    fn bend_of_one_semitone() {
        let p = note_to_period(PeriodType::Amiga, 61, 0);
        assert_eq!(period_to_bend(PeriodType::Amiga, p, 60), BEND_PER_SEMITONE);
        assert_eq!(period_to_bend(PeriodType::Linear, 2864.0, 60), BEND_PER_SEMITONE);
    }

    #[test]
    fn bend_roundtrips_through_mix_period() {
        let p = note_to_period(PeriodType::Amiga, 60, 0) * 0.97;
        let bend = period_to_bend(PeriodType::Amiga, p, 60);
        let back = note_to_period_mix(60, bend);
        assert!((back - p).abs() < 0.01);
    }

    #[test]
    fn mod_range_limits() {
        let (lo, hi) = period_limits(PeriodType::ModRange, 0).unwrap();
        assert!((hi - 856.0).abs() < 1e-9);
        assert!((lo - 113.0).abs() < 0.5);
        assert!(period_limits(PeriodType::Amiga, 0).is_none());
    }

    #[test]
    fn step_at_c4_is_base_rate() {
        let step = period_to_step(428.0, C4_RATE, SAMPLE_RATE).unwrap();
        let expected = (C4_RATE as u64 * 65536 / SAMPLE_RATE as u64) as u32;
        assert!((step as i64 - expected as i64).abs() <= 1);
    }

    #[test]
    fn step_doubles_at_half_period() {
        let base = period_to_step(428.0, C4_RATE, SAMPLE_RATE).unwrap();
        let up = period_to_step(214.0, C4_RATE, SAMPLE_RATE).unwrap();
        assert!((up as i64 - 2 * base as i64).abs() <= 1);
    }

    #[test]
    fn degenerate_steps_are_rejected() {
        assert_eq!(period_to_step(0.0, C4_RATE, SAMPLE_RATE), None);
        assert_eq!(period_to_step(-5.0, C4_RATE, SAMPLE_RATE), None);
        assert_eq!(period_to_step(f64::NAN, C4_RATE, SAMPLE_RATE), None);
        assert_eq!(period_to_step(1e-6, C4_RATE, SAMPLE_RATE), None);
        assert_eq!(period_to_step(1e12, C4_RATE, SAMPLE_RATE), None);
    }
}
