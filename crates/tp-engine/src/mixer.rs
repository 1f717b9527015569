//! Software mixer: renders the voice pool into PCM, one tick at a time.
//!
//! Voices accumulate into an interleaved stereo `i32` buffer at 16-bit
//! scale. The downmix clamps each frame to the 16-bit range, applies the
//! amplification shift and writes the configured output format.

use alloc::vec::Vec;
use tp_ir::Module;

use crate::config::{OutputChannels, OutputFormat, PlayerConfig, SampleBits};
use crate::frequency::period_to_step;
use crate::interpolation::Interpolation;
use crate::voice_pool::VoicePool;

/// Frames over which volume changes and retriggers are ramped.
pub const RAMP_FRAMES: usize = 8;

/// Accumulator headroom: amplify 1 is unity gain.
const DOWNMIX_SHIFT: u32 = 1;

pub struct Mixer {
    /// Interleaved stereo accumulator
    accum: Vec<i32>,
    /// PCM of the last tick, sized for the longest tick
    buffer: Vec<u8>,
    /// Frames rendered by the last tick
    frames: usize,
    max_frames: usize,
    /// Fractional frames carried into the next tick
    remainder: f64,
    sample_rate: u32,
    format: OutputFormat,
    interpolation: Interpolation,
    amplify: u8,
}

impl Mixer {
    /// Mixer producing at most `max_frames` frames per tick.
    pub fn new(config: &PlayerConfig, max_frames: usize) -> Self {
        let max_frames = max_frames.max(1);
        Self {
            accum: alloc::vec![0; max_frames * 2],
            buffer: alloc::vec![0; max_frames * config.format.frame_bytes()],
            frames: 0,
            max_frames,
            remainder: 0.0,
            sample_rate: config.sample_rate,
            format: config.format,
            interpolation: config.interpolation,
            amplify: config.amplify,
        }
    }

    /// Frames in a tick of `frame_time` ms at `sample_rate`.
    pub fn frames_for(sample_rate: u32, frame_time: f64) -> usize {
        libm::ceil(sample_rate as f64 * frame_time / 1000.0) as usize
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    /// Drop the carried fraction, after a reposition.
    pub fn reset(&mut self) {
        self.remainder = 0.0;
        self.frames = 0;
    }

    /// PCM bytes of the last rendered tick.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer[..self.frames * self.format.frame_bytes()]
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Largest tick the mixer can hold, in bytes.
    pub fn capacity_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Length of the next tick; fractional frames carry over so that long
    /// renders keep the exact tempo.
    fn next_tick_frames(&mut self, frame_time: f64) -> usize {
        let exact = self.sample_rate as f64 * frame_time / 1000.0 + self.remainder;
        let frames = libm::floor(exact).max(0.0);
        self.remainder = exact - frames;
        (frames as usize).min(self.max_frames)
    }

    /// Render one tick of every voice in the pool.
    pub fn mix_tick(&mut self, module: &Module, voices: &mut VoicePool, bidir_adjust: i64, frame_time: f64) {
        let frames = self.next_tick_frames(frame_time);
        self.frames = frames;
        let out = &mut self.accum[..frames * 2];
        out.fill(0);

        for voice in voices.iter_mut() {
            let Some(sample) = voice.smp.and_then(|s| module.samples.get(s)) else { continue };
            if sample.is_empty() {
                continue;
            }
            // Zero or runaway steps skip the voice for this tick
            let Some(step) = period_to_step(voice.period, module.c4_rate, self.sample_rate) else { continue };
            voice.render(sample, step, self.interpolation, bidir_adjust, out, RAMP_FRAMES);
        }

        self.downmix(frames);
    }

    fn downmix(&mut self, frames: usize) {
        let amplify = self.amplify as u32;
        let format = self.format;
        let width = match format.bits {
            SampleBits::Eight => 1,
            SampleBits::Sixteen => 2,
        };
        let mut dst = self.buffer.chunks_exact_mut(width);
        for frame in self.accum[..frames * 2].chunks_exact(2) {
            let l = scale(frame[0], amplify);
            let r = scale(frame[1], amplify);
            let (first, second) = match format.channels {
                OutputChannels::Stereo => (l, Some(r)),
                OutputChannels::Mono => ((l + r) / 2, None),
            };
            for s in core::iter::once(first).chain(second) {
                if let Some(d) = dst.next() {
                    write_sample(d, s, format);
                }
            }
        }
    }
}

/// Clamp an accumulated sample to 16 bits and apply the amplification.
#[inline]
fn scale(acc: i32, amplify: u32) -> i32 {
    let v = ((acc as i64) << amplify) >> DOWNMIX_SHIFT;
    v.clamp(i16::MIN as i64, i16::MAX as i64) as i32
}

#[inline]
fn write_sample(dst: &mut [u8], s: i32, format: OutputFormat) {
    match format.bits {
        SampleBits::Sixteen => {
            let mut v = s as i16 as u16;
            if format.unsigned {
                v ^= 0x8000;
            }
            dst.copy_from_slice(&v.to_le_bytes());
        }
        SampleBits::Eight => {
            let mut v = (s >> 8) as i8 as u8;
            if format.unsigned {
                v ^= 0x80;
            }
            dst[0] = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice_pool::Patch;
    use tp_ir::{DuplicateAction, DuplicateCheck, NewNoteAction, Sample, SampleData};

    fn config(bits: SampleBits, channels: OutputChannels, unsigned: bool) -> PlayerConfig {
        PlayerConfig {
            format: OutputFormat { bits, channels, unsigned },
            interpolation: Interpolation::Nearest,
            ..PlayerConfig::default()
        }
    }

    fn module_with(data: Vec<i8>) -> Module {
        let mut m = Module::with_channels("mix", 1);
        m.samples.push(Sample::with_data("s", SampleData::Mono8(data)));
        m
    }

    /// Pool with one centered voice at C-4 and full volume.
    fn pool() -> VoicePool {
        let mut pool = VoicePool::new(1, 4, false);
        pool.set_patch(
            0,
            Patch {
                ins: Some(0),
                smp: Some(0),
                note: 60,
                key: 60,
                nna: NewNoteAction::Cut,
                dct: DuplicateCheck::Off,
                dca: DuplicateAction::Cut,
            },
        );
        pool.set_volume(0, 1024, &[false]);
        pool.set_period(0, crate::frequency::C4_PERIOD);
        pool
    }

    #[test]
    fn tick_length_carries_fraction() {
        let mut mixer = Mixer::new(&PlayerConfig::default(), 4096);
        // 125 BPM: 20 ms ticks, 882 frames at 44.1 kHz
        assert_eq!(mixer.next_tick_frames(20.0), 882);
        let a = mixer.next_tick_frames(10.01);
        let b = mixer.next_tick_frames(10.01);
        assert_eq!(a + b, 882);
    }

    #[test]
    fn silence_in_every_format() {
        let m = module_with(alloc::vec![0; 4]);
        for (bits, unsigned, expect) in [
            (SampleBits::Sixteen, false, [0u8, 0]),
            (SampleBits::Sixteen, true, [0, 0x80]),
            (SampleBits::Eight, true, [0x80, 0x80]),
        ] {
            let mut mixer = Mixer::new(&config(bits, OutputChannels::Stereo, unsigned), 64);
            mixer.mix_tick(&m, &mut VoicePool::new(1, 4, false), 0, 1.0);
            assert_eq!(&mixer.buffer()[..2], &expect);
        }
    }

    #[test]
    fn renders_and_clamps() {
        let m = module_with(alloc::vec![127; 20000]);
        let mut cfg = config(SampleBits::Sixteen, OutputChannels::Stereo, false);
        cfg.amplify = 3;
        let mut mixer = Mixer::new(&cfg, 2048);
        let mut voices = pool();
        mixer.mix_tick(&m, &mut voices, 0, 20.0);
        let pcm = mixer.buffer();
        assert_eq!(pcm.len(), 882 * 4);
        // Past the ramp the signal saturates
        let last = i16::from_le_bytes([pcm[pcm.len() - 4], pcm[pcm.len() - 3]]);
        assert_eq!(last, i16::MAX);
    }

    #[test]
    fn full_scale_square_clamps_in_every_kernel() {
        let wave: Vec<i16> = (0..20000).map(|i| if i % 3 == 0 { -i16::MAX } else { i16::MAX }).collect();
        let mut m = Module::with_channels("mix", 1);
        m.samples.push(Sample::with_data("sq", SampleData::Mono16(wave)));
        for kind in [Interpolation::Nearest, Interpolation::Linear, Interpolation::Spline] {
            let mut cfg = config(SampleBits::Sixteen, OutputChannels::Stereo, false);
            cfg.interpolation = kind;
            let mut mixer = Mixer::new(&cfg, 2048);
            let mut voices = pool();
            mixer.mix_tick(&m, &mut voices, 0, 20.0);
            let pcm: Vec<i16> = mixer.buffer().chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
            assert_eq!(pcm.len(), 882 * 2);
            // Both polarities survive; a wrapped product would flip the sign
            let tail = &pcm[RAMP_FRAMES * 2..];
            assert!(tail.iter().any(|&x| x >= 20000), "{kind:?}");
            assert!(tail.iter().any(|&x| x <= -20000), "{kind:?}");
        }
    }

    #[test]
    fn mono_averages_sides() {
        let m = module_with(alloc::vec![64; 20000]);
        let mut mixer = Mixer::new(&config(SampleBits::Sixteen, OutputChannels::Mono, false), 2048);
        let mut voices = pool();
        voices.set_pan(0, -64, false);
        mixer.mix_tick(&m, &mut voices, 0, 20.0);
        let pcm = mixer.buffer();
        assert_eq!(pcm.len(), 882 * 2);
        let last = i16::from_le_bytes([pcm[pcm.len() - 2], pcm[pcm.len() - 1]]);
        // Uneven sides average back to the centered level
        assert_eq!(last, 64 * 256);
    }

    #[test]
    fn voice_without_period_is_skipped() {
        let m = module_with(alloc::vec![64; 100]);
        let mut mixer = Mixer::new(&PlayerConfig::default(), 2048);
        let mut voices = pool();
        voices.set_period(0, 0.0);
        mixer.mix_tick(&m, &mut voices, 0, 20.0);
        assert!(mixer.buffer().iter().all(|&b| b == 0));
        assert_eq!(voices.position(0), Some(0));
    }
}
