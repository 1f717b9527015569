//! Voice: mixer-side playback of one sample.

use tp_ir::{LoopType, NewNoteAction, Sample, SampleData};

use crate::filter::VoiceFilter;
use crate::frequency::note_to_period_mix;
use crate::interpolation::{interpolate, Interpolation};

/// Shift applied to `sample * gain` (gain is volume 0-1024 times pan 0-256).
const GAIN_SHIFT: u32 = 17;

/// Loop region currently governing playback, in frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LoopBounds {
    start: i64,
    end: i64,
    kind: LoopType,
}

/// Per-frame output shaping: volume ramp and retrigger declick.
#[derive(Clone, Copy, Debug, Default)]
struct Ramp {
    /// Gains applied at the end of the previous tick
    gain_l: i32,
    gain_r: i32,
    /// Tail of the previous note, faded out after a retrigger
    declick_l: i32,
    declick_r: i32,
    declick: bool,
    /// Last contribution written to the mix
    last_l: i32,
    last_r: i32,
}

/// A single voice producing audio from a sample.
#[derive(Clone, Debug)]
pub struct Voice {
    /// Virtual channel currently driving this voice
    pub chn: usize,
    /// Channel that triggered the note
    pub root: usize,
    pub ins: Option<usize>,
    pub smp: Option<usize>,
    pub key: i32,
    pub note: i32,
    /// Action applied when the next note arrives on the root channel
    pub act: NewNoteAction,
    /// Position in the sample (16.16 fixed point)
    pub pos: i64,
    /// Mixer period
    pub period: f64,
    /// Volume, 0-1024
    pub vol: i32,
    /// Pan, -128 (left) to 127 (right)
    pub pan: i32,
    pub surround: bool,
    /// Playing towards the sample start
    pub backward: bool,
    /// Sustain loop released
    pub release: bool,
    /// Ran off the end of a non-looping sample
    pub ended: bool,
    pub filter: VoiceFilter,
    ramp: Ramp,
}

impl Voice {
    pub fn new(chn: usize) -> Self {
        Self {
            chn,
            root: chn,
            ins: None,
            smp: None,
            key: -1,
            note: 0,
            act: NewNoteAction::Cut,
            pos: 0,
            period: 0.0,
            vol: 0,
            pan: 0,
            surround: false,
            backward: false,
            release: false,
            ended: false,
            filter: VoiceFilter::default(),
            ramp: Ramp::default(),
        }
    }

    /// Bind a new sample and restart it from the beginning.
    pub fn set_patch(&mut self, smp: usize) {
        self.smp = Some(smp);
        self.vol = 0;
        self.pan = 0;
        self.backward = false;
        self.release = false;
        self.ended = false;
        self.filter.clear_history();
        self.pos = 0;
        self.anticlick();
    }

    pub fn set_note(&mut self, note: i32) {
        self.note = note;
        self.period = note_to_period_mix(note, 0);
        self.anticlick();
    }

    /// Jump to frame `pos`. Offsets past the end of the governing region
    /// restart a forward loop or park the voice at the end.
    pub fn set_position(&mut self, sample: &Sample, pos: u32) {
        let len = sample.len() as i64;
        let lp = self.active_loop(sample);
        let end = lp.map_or(len, |l| l.end);
        let mut pos = pos as i64;
        if pos >= end {
            pos = match lp {
                Some(l) if !self.backward => l.start,
                _ => end,
            };
        }
        self.pos = pos << 16;
        self.ended = false;
        self.anticlick();
    }

    /// Whole frames played so far.
    pub fn position(&self) -> i32 {
        (self.pos >> 16) as i32
    }

    pub fn set_volume(&mut self, vol: i32) {
        if vol == 0 && self.vol != 0 {
            self.anticlick();
        }
        self.vol = vol;
    }

    fn anticlick(&mut self) {
        self.ramp.declick_l = self.ramp.last_l;
        self.ramp.declick_r = self.ramp.last_r;
        self.ramp.declick = self.ramp.last_l != 0 || self.ramp.last_r != 0;
        self.ramp.gain_l = 0;
        self.ramp.gain_r = 0;
    }

    fn active_loop(&self, sample: &Sample) -> Option<LoopBounds> {
        if sample.has_sustain_loop() && !self.release {
            Some(LoopBounds {
                start: sample.sustain_start as i64,
                end: sample.sustain_end as i64,
                kind: sample.sustain_type,
            })
        } else if sample.has_loop() {
            Some(LoopBounds {
                start: sample.loop_start as i64,
                end: sample.loop_end as i64,
                kind: sample.loop_type,
            })
        } else {
            None
        }
    }

    /// Target gains for the current volume and pan.
    fn gains(&self) -> (i32, i32) {
        if self.surround {
            (self.vol * 128, -self.vol * 128)
        } else {
            let pan = self.pan.clamp(-128, 127);
            (self.vol * (128 - pan), self.vol * (128 + pan))
        }
    }

    /// Apply loop and end-of-sample rules after the position moved.
    fn wrap(&mut self, lp: Option<LoopBounds>, len: i64, bidir_adjust: i64) {
        let Some(lp) = lp else {
            if self.pos < 0 || self.pos >= len << 16 {
                self.ended = true;
            }
            return;
        };
        let start = lp.start << 16;
        let end = lp.end << 16;
        let span = end - start;
        if !self.backward && self.pos >= end {
            match lp.kind {
                LoopType::PingPong => {
                    self.backward = true;
                    self.pos = (2 * end - self.pos - (bidir_adjust << 16)).clamp(start, end - 1);
                }
                _ => self.pos = start + (self.pos - end) % span,
            }
        } else if self.backward && self.pos < start {
            match lp.kind {
                LoopType::PingPong => {
                    self.backward = false;
                    self.pos = (2 * start - self.pos).clamp(start, end - 1);
                }
                _ => self.pos = end - 1 - (start - self.pos - 1) % span,
            }
        }
    }

    /// Mix `frames` output frames into the interleaved stereo accumulator.
    ///
    /// `step` is the 16.16 source increment per output frame. Volume
    /// changes ramp in over `ramp_len` frames.
    pub fn render(
        &mut self,
        sample: &Sample,
        step: u32,
        kind: Interpolation,
        bidir_adjust: i64,
        out: &mut [i32],
        ramp_len: usize,
    ) {
        let frames = out.len() / 2;
        let len = sample.len() as i64;
        let lp = self.active_loop(sample);
        let (target_l, target_r) = self.gains();
        let ramp_len = ramp_len.max(1).min(frames.max(1));
        let (from_l, from_r) = (self.ramp.gain_l, self.ramp.gain_r);
        let stereo = sample.data.is_stereo();
        let filtered = self.filter.is_enabled();

        self.wrap(lp, len, bidir_adjust);

        for (i, frame) in out.chunks_exact_mut(2).enumerate() {
            if self.ramp.declick && i < ramp_len {
                let k = (ramp_len - i) as i32;
                frame[0] += self.ramp.declick_l * k / ramp_len as i32;
                frame[1] += self.ramp.declick_r * k / ramp_len as i32;
            }
            if self.ended {
                continue;
            }

            let (gl, gr) = if i < ramp_len {
                let k = (i + 1) as i32;
                let n = ramp_len as i32;
                (from_l + (target_l - from_l) * k / n, from_r + (target_r - from_r) * k / n)
            } else {
                (target_l, target_r)
            };

            let idx = self.pos >> 16;
            let frac = (self.pos & 0xffff) as u32;
            let mut l = fetch(&sample.data, kind, idx, frac, lp, len, false);
            let mut r = if stereo { fetch(&sample.data, kind, idx, frac, lp, len, true) } else { l };
            if filtered {
                l = self.filter.process_left(l);
                r = if stereo { self.filter.process_right(r) } else { l };
            }

            let ol = ((l as i64 * gl as i64) >> GAIN_SHIFT) as i32;
            let or = ((r as i64 * gr as i64) >> GAIN_SHIFT) as i32;
            frame[0] += ol;
            frame[1] += or;
            self.ramp.last_l = ol;
            self.ramp.last_r = or;

            if self.backward {
                self.pos -= step as i64;
            } else {
                self.pos += step as i64;
            }
            self.wrap(lp, len, bidir_adjust);
        }

        if self.ended {
            self.ramp.last_l = 0;
            self.ramp.last_r = 0;
        }
        self.ramp.declick = false;
        self.ramp.gain_l = target_l;
        self.ramp.gain_r = target_r;
    }
}

/// Source frame at `idx`, following the loop for look-ahead taps.
#[inline]
fn frame_at(data: &SampleData, idx: i64, lp: Option<LoopBounds>, len: i64, right: bool) -> i32 {
    let idx = match lp {
        Some(l) if idx >= l.end => match l.kind {
            LoopType::PingPong => (2 * l.end - 1 - idx).max(l.start),
            _ => l.start + (idx - l.end) % (l.end - l.start),
        },
        _ => idx,
    };
    if idx < 0 || idx >= len {
        return 0;
    }
    let v = if right { data.get_right(idx as usize) } else { data.get_mono(idx as usize) };
    v as i32
}

#[inline]
fn fetch(
    data: &SampleData,
    kind: Interpolation,
    idx: i64,
    frac: u32,
    lp: Option<LoopBounds>,
    len: i64,
    right: bool,
) -> i32 {
    let s0 = frame_at(data, idx, lp, len, right);
    match kind {
        Interpolation::Nearest if frac < 0x8000 => s0,
        Interpolation::Nearest | Interpolation::Linear => {
            let s1 = frame_at(data, idx + 1, lp, len, right);
            interpolate(kind, frac, 0, s0, s1, 0)
        }
        Interpolation::Spline => {
            let sm1 = frame_at(data, idx - 1, lp, len, right);
            let s1 = frame_at(data, idx + 1, lp, len, right);
            let s2 = frame_at(data, idx + 2, lp, len, right);
            interpolate(kind, frac, sm1, s0, s1, s2)
        }
    }
}
