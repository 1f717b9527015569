//! Low-frequency oscillator for vibrato, tremolo and panbrello.

use rand::RngCore;

/// Number of phase steps in one waveform cycle.
pub const WAVEFORM_SIZE: u8 = 64;

/// Half-cycle sine, scaled to ±255.
const SINE_WAVE: [i16; WAVEFORM_SIZE as usize] = [
    0, 24, 49, 74, 97, 120, 141, 161, 180, 197, 212, 224, 235, 244, 250, 253, 255, 253, 250, 244,
    235, 224, 212, 197, 180, 161, 141, 120, 97, 74, 49, 24, 0, -24, -49, -74, -97, -120, -141,
    -161, -180, -197, -212, -224, -235, -244, -250, -253, -255, -253, -250, -244, -235, -224, -212,
    -197, -180, -161, -141, -120, -97, -74, -49, -24,
];

/// Tracker-specific waveform shapes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LfoFlavor {
    /// ProTracker tables
    #[default]
    Mod,
    /// ScreamTracker 3 / Impulse Tracker: unipolar square
    St3,
    /// FastTracker 2: vibrato ramp runs upward
    Ft2Vibrato,
}

/// Oscillator state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Lfo {
    /// Waveform: 0 sine, 1 ramp down, 2 square, 3 random
    pub waveform: u8,
    /// Current phase (0-63)
    pub phase: u8,
    /// Phase increment per update
    pub rate: u8,
    /// Output multiplier
    pub depth: i32,
}

impl Lfo {
    /// Current output: the waveform value (±255) times depth. A zero rate
    /// yields zero regardless of depth.
    pub fn value(&self, flavor: LfoFlavor, rng: &mut impl RngCore) -> i32 {
        if self.rate == 0 {
            return 0;
        }
        let phase = self.phase as i32;
        let wave = match (flavor, self.waveform & 3) {
            (LfoFlavor::St3, 2) => {
                if phase < WAVEFORM_SIZE as i32 / 2 { 255 } else { 0 }
            }
            (LfoFlavor::Ft2Vibrato, 1) => {
                let shifted = (phase + WAVEFORM_SIZE as i32 / 2) % WAVEFORM_SIZE as i32;
                (shifted << 3) - 255
            }
            (_, 0) => SINE_WAVE[self.phase as usize % WAVEFORM_SIZE as usize] as i32,
            (_, 1) => 255 - (phase << 3),
            (_, 2) => {
                if phase < WAVEFORM_SIZE as i32 / 2 { 255 } else { -255 }
            }
            _ => (rng.next_u32() & 0x1ff) as i32 - 256,
        };
        wave * self.depth
    }

    /// Advance the phase by the rate.
    pub fn update(&mut self) {
        self.phase = (self.phase.wrapping_add(self.rate)) % WAVEFORM_SIZE;
    }

    pub fn set_waveform(&mut self, waveform: u8) {
        self.waveform = waveform & 3;
    }

    pub fn set_rate(&mut self, rate: u8) {
        self.rate = rate;
    }

    pub fn set_depth(&mut self, depth: i32) {
        self.depth = depth;
    }

    pub fn set_phase(&mut self, phase: u8) {
        self.phase = phase % WAVEFORM_SIZE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    fn lfo(waveform: u8, phase: u8) -> Lfo {
        Lfo { waveform, phase, rate: 1, depth: 1 }
    }

    #[test]
    fn zero_rate_is_silent() {
        let mut rng = Pcg32::seed_from_u64(1);
        let l = Lfo { waveform: 0, phase: 16, rate: 0, depth: 10 };
        assert_eq!(l.value(LfoFlavor::Mod, &mut rng), 0);
    }

    #[test]
    fn sine_peaks_at_quarter_cycle() {
        let mut rng = Pcg32::seed_from_u64(1);
        assert_eq!(lfo(0, 16).value(LfoFlavor::Mod, &mut rng), 255);
        assert_eq!(lfo(0, 48).value(LfoFlavor::Mod, &mut rng), -255);
        assert_eq!(lfo(0, 0).value(LfoFlavor::Mod, &mut rng), 0);
    }

    #[test]
    fn ramp_down_and_ft2_ramp_up() {
        let mut rng = Pcg32::seed_from_u64(1);
        assert_eq!(lfo(1, 0).value(LfoFlavor::Mod, &mut rng), 255);
        assert_eq!(lfo(1, 32).value(LfoFlavor::Mod, &mut rng), -1);
        assert_eq!(lfo(1, 0).value(LfoFlavor::Ft2Vibrato, &mut rng), 1);
        assert_eq!(lfo(1, 32).value(LfoFlavor::Ft2Vibrato, &mut rng), -255);
    }

    #[test]
    fn square_is_unipolar_for_st3() {
        let mut rng = Pcg32::seed_from_u64(1);
        assert_eq!(lfo(2, 40).value(LfoFlavor::Mod, &mut rng), -255);
        assert_eq!(lfo(2, 40).value(LfoFlavor::St3, &mut rng), 0);
        assert_eq!(lfo(2, 10).value(LfoFlavor::St3, &mut rng), 255);
    }

    #[test]
    fn random_stays_in_range() {
        let mut rng = Pcg32::seed_from_u64(7);
        for _ in 0..200 {
            let v = lfo(3, 0).value(LfoFlavor::Mod, &mut rng);
            assert!((-256..=255).contains(&v));
        }
    }

    #[test]
    fn depth_scales_output() {
        let mut rng = Pcg32::seed_from_u64(1);
        let l = Lfo { waveform: 0, phase: 16, rate: 4, depth: 8 };
        assert_eq!(l.value(LfoFlavor::Mod, &mut rng), 255 * 8);
    }

    #[test]
    fn phase_wraps() {
        let mut l = Lfo { waveform: 0, phase: 60, rate: 8, depth: 1 };
        l.update();
        assert_eq!(l.phase, 4);
    }
}
