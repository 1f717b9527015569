//! Resampling kernels.
//!
//! Positions are 16.16 fixed point. The spline kernel is a Catmull-Rom
//! cubic with precomputed 1024-step tables.

pub use crate::config::Interpolation;

/// Fractional bits of the spline table index.
const SPLINE_BITS: u32 = 10;
const SPLINE_SIZE: usize = 1 << SPLINE_BITS;
/// Fixed-point shift of the spline coefficients.
const SPLINE_SHIFT: u32 = 14;

/// Spline coefficient for tap `tap` (0..4) at table index `i`.
///
/// Coefficient polynomials scaled by 2 * 1024^3 so that the table can be
/// built with integer arithmetic; the divisor folds in the 1 << 14 scale.
const fn spline_coef(tap: usize, i: i64) -> i16 {
    const N: i64 = SPLINE_SIZE as i64;
    const DIV: i64 = 2 * N * N * N / (1 << SPLINE_SHIFT);
    let num = match tap {
        0 => -i * i * i + 2 * N * i * i - N * N * i,
        1 => 3 * i * i * i - 5 * N * i * i + 2 * N * N * N,
        2 => -3 * i * i * i + 4 * N * i * i + N * N * i,
        _ => i * i * i - N * i * i,
    };
    (num / DIV) as i16
}

const fn build_spline() -> [[i16; 4]; SPLINE_SIZE] {
    let mut lut = [[0i16; 4]; SPLINE_SIZE];
    let mut i = 0;
    while i < SPLINE_SIZE {
        let mut tap = 0;
        while tap < 4 {
            lut[i][tap] = spline_coef(tap, i as i64);
            tap += 1;
        }
        i += 1;
    }
    lut
}

static SPLINE_LUT: [[i16; 4]; SPLINE_SIZE] = build_spline();

/// Interpolate at `frac` (16-bit fraction) between `s0` and `s1`, with
/// outer neighbors `sm1` and `s2` for the spline kernel.
#[inline]
pub fn interpolate(kind: Interpolation, frac: u32, sm1: i32, s0: i32, s1: i32, s2: i32) -> i32 {
    match kind {
        Interpolation::Nearest => {
            if frac >= 0x8000 { s1 } else { s0 }
        }
        // Full-scale edges overflow 32 bits
        Interpolation::Linear => s0 + (((s1 - s0) as i64 * frac as i64) >> 16) as i32,
        Interpolation::Spline => {
            let c = &SPLINE_LUT[(frac >> (16 - SPLINE_BITS)) as usize & (SPLINE_SIZE - 1)];
            let acc = c[0] as i64 * sm1 as i64
                + c[1] as i64 * s0 as i64
                + c[2] as i64 * s1 as i64
                + c[3] as i64 * s2 as i64;
            (acc >> SPLINE_SHIFT) as i32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spline_taps_sum_to_unity() {
        for i in [0usize, 1, 100, 511, 512, 1023] {
            let sum: i32 = SPLINE_LUT[i].iter().map(|&c| c as i32).sum();
            assert!((sum - (1 << SPLINE_SHIFT)).abs() <= 3, "index {i}: {sum}");
        }
        assert_eq!(SPLINE_LUT[0], [0, 1 << SPLINE_SHIFT, 0, 0]);
    }

    #[test]
    fn nearest_rounds_to_closer_frame() {
        assert_eq!(interpolate(Interpolation::Nearest, 0x7fff, 0, 100, 200, 0), 100);
        assert_eq!(interpolate(Interpolation::Nearest, 0x8000, 0, 100, 200, 0), 200);
    }

    #[test]
    fn linear_midpoint() {
        assert_eq!(interpolate(Interpolation::Linear, 0x8000, 0, 100, 200, 0), 150);
        assert_eq!(interpolate(Interpolation::Linear, 0, 0, -300, 200, 0), -300);
    }

    #[test]
    fn linear_full_scale_edge() {
        let v = interpolate(Interpolation::Linear, 0xffff, 0, -32768, 32767, 0);
        assert_eq!(v, 32766);
        let v = interpolate(Interpolation::Linear, 0xffff, 0, 32767, -32768, 0);
        assert_eq!(v, -32768);
    }

    #[test]
    fn spline_full_scale_square_stays_bounded() {
        for frac in (0..0x10000u32).step_by(0x400) {
            let v = interpolate(Interpolation::Spline, frac, -32767, 32767, -32767, 32767);
            assert!(v.abs() < 32767 * 2, "frac {frac:#x}: {v}");
            let v = interpolate(Interpolation::Spline, frac, -32768, -32768, 32767, 32767);
            assert!((-32768 * 2..32767 * 2).contains(&v), "frac {frac:#x}: {v}");
        }
    }

    #[test]
    fn spline_passes_through_frames() {
        assert_eq!(interpolate(Interpolation::Spline, 0, 50, 100, 200, 300), 100);
        let mid = interpolate(Interpolation::Spline, 0x8000, 0, 100, 200, 300);
        assert!((mid - 150).abs() <= 1, "mid = {mid}");
    }
}
