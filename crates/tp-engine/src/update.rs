//! Per-tick channel update.
//!
//! Every tick each virtual channel runs its armed slides, then feeds the
//! result through envelopes and oscillators into its voice. Slides come
//! first, envelopes next, modulation last; the order is audible.

use tp_ir::{Module, NewNoteAction, PeriodType, Quirks};

use crate::channel::{lsn, ChannelState, FxFlags, NoteFlags, PersistentFlags};
use crate::dialect::{ArpeggioPolicy, Dialect, TremorPolicy};
use crate::envelope_state::EnvelopeFade;
use crate::filter::filter_setup;
use crate::flow::RowDelay;
use crate::frequency::{
    note_to_period, note_to_period_mix, period_limits, period_to_bend, BEND_PER_SEMITONE, MAX_NOTE_MOD,
    MIN_NOTE_MOD,
};
use crate::read_event::valid_instrument;
use crate::sequencer::Sequencer;
use crate::voice_pool::ChannelStatus;

/// Multi-retrig volume change per type as (add, multiply, divide). The
/// last entry is the note cut.
const RETRIG_TABLE: [(i32, i32, i32); 17] = [
    (0, 1, 1),
    (-1, 1, 1),
    (-2, 1, 1),
    (-4, 1, 1),
    (-8, 1, 1),
    (-16, 1, 1),
    (0, 2, 3),
    (0, 1, 2),
    (0, 1, 1),
    (1, 1, 1),
    (2, 1, 1),
    (4, 1, 1),
    (8, 1, 1),
    (16, 1, 1),
    (0, 3, 2),
    (0, 2, 1),
    (0, 0, 1),
];

/// ST3 never plays above A-6 (its period 64, scaled to ours).
const ST3_MIN_PERIOD: f64 = 16.239270;

/// Tempo range reachable by IT tempo slides.
const TEMPO_SLIDE_RANGE: (i32, i32) = (0x20, 0xff);

/// FT2 arpeggio, emulating its 16-entry tick table read backwards from
/// the row end. Past 16 ticks the lookup runs into the vibrato table,
/// whose entries all select the second offset.
fn ft2_arpeggio(xc: &ChannelState, frame: i32, speed: i32) -> i32 {
    let a = &xc.arpeggio;
    if (a.val[1] == 0 && a.val[2] == 0) || frame == 0 {
        return 0;
    }
    let i = speed - frame % speed;
    match i {
        16 => 0,
        17.. => a.val[2] as i32,
        _ => a.val[(i % 3) as usize] as i32,
    }
}

fn arpeggio(dialect: &Dialect, xc: &mut ChannelState, frame: i32, speed: i32) -> i32 {
    let arp = match dialect.arpeggio {
        ArpeggioPolicy::Ft2Table => ft2_arpeggio(xc, frame, speed),
        ArpeggioPolicy::Cyclic => xc.arpeggio.current(),
    };
    xc.arpeggio.step();
    arp
}

/// FT2 tremor: bit 7 marks the counter as armed, bit 6 the "on" window.
fn tremor_ft2(xc: &mut ChannelState, frame: i32, finalvol: i32) -> i32 {
    let t = &mut xc.tremor;
    if t.count & 0x80 == 0 {
        return finalvol;
    }
    if xc.flags.contains(FxFlags::TREMOR) && frame != 0 {
        t.count &= !0x20;
        if t.count == 0x80 {
            t.count = t.up | 0xc0;
        } else if t.count == 0xc0 {
            t.count = t.down | 0x80;
        } else {
            t.count -= 1;
        }
    }
    if t.count & 0xe0 == 0x80 {
        0
    } else {
        finalvol
    }
}

fn tremor_s3m(xc: &mut ChannelState, finalvol: i32) -> i32 {
    if !xc.flags.contains(FxFlags::TREMOR) {
        return finalvol;
    }
    let t = &mut xc.tremor;
    if t.count == 0 {
        t.count = t.up | 0x80;
    } else if t.count == 0x80 {
        t.count = t.down;
    }
    t.count -= 1;
    if t.count & 0x80 == 0 {
        0
    } else {
        finalvol
    }
}

impl Sequencer {
    /// Volume percentage of the track that owns `chn`.
    fn channel_volume(&self, chn: usize) -> i32 {
        let num_tracks = self.voices.num_tracks();
        let root = if chn < num_tracks { Some(chn) } else { self.voices.root_of(chn) };
        root.and_then(|r| self.channel_volume.get(r)).copied().unwrap_or(0)
    }

    /// Run one tick of channel `chn`.
    pub(crate) fn play_channel(&mut self, module: &Module, chn: usize) {
        let dialect = self.dialect;
        let first = dialect.is_first_frame(self.clock.frame, self.clock.speed);

        let xc = &mut self.channels[chn];
        xc.report.finalvol = 0;

        if !first && xc.flags.contains(FxFlags::TEMPO_SLIDE) {
            let (lo, hi) = TEMPO_SLIDE_RANGE;
            self.clock.bpm = (self.clock.bpm as i32 + xc.tempo_slide).clamp(lo, hi) as u32;
        }

        if xc.delay > 0 {
            xc.delay -= 1;
            if xc.delay == 0 {
                let ev = xc.delayed_event;
                self.read_event(module, &ev, chn);
            }
        }

        // Macros run whatever the voice is doing
        self.update_midi_macro(module, chn);

        if let Some(ended) = self.voices.voice(chn).map(|v| v.ended) {
            self.channels[chn].note_flags.set(NoteFlags::SAMPLE_END, ended);
        }

        let status = self.voices.status(chn);
        if status == ChannelStatus::Invalid {
            // Keeps global volume slides running
            self.update_volume(module, chn);
            return;
        }

        let ins_valid = valid_instrument(module, self.channels[chn].ins).is_some();
        if self.clock.frame == 0 && status != ChannelStatus::Active {
            if !ins_valid || status == ChannelStatus::Background(NewNoteAction::Cut) {
                self.voices.reset_channel(chn);
                return;
            }
        }
        if !ins_valid {
            return;
        }
        let act = match status {
            ChannelStatus::Background(a) => Some(a),
            _ => None,
        };

        self.retrig(module, chn);

        let xc = &mut self.channels[chn];
        if xc.keyoff > 0 {
            xc.keyoff -= 1;
            if xc.keyoff == 0 {
                xc.note_flags.insert(NoteFlags::RELEASE);
            }
        }
        let sample_release = xc.note_flags.contains(NoteFlags::SAMPLE_RELEASE);
        self.voices.release(chn, sample_release);

        self.update_volume(module, chn);
        self.update_frequency(module, chn);
        self.update_pan(chn);

        self.process_volume(module, chn, act);
        self.process_frequency(module, chn, act);
        self.process_pan(module, chn, act);

        let xc = &mut self.channels[chn];
        if xc.note_flags.contains(NoteFlags::SUSEXIT) {
            xc.note_flags.insert(NoteFlags::ENV_RELEASE);
        }
        xc.report.position = self.voices.position(chn).unwrap_or(0);
    }

    /// Note cut and retrigger countdowns.
    fn retrig(&mut self, module: &Module, chn: usize) {
        let s3m = self.dialect.has(Quirks::S3MRTG);
        let xc = &mut self.channels[chn];
        if !xc.flags.contains(FxFlags::RETRIG) {
            return;
        }
        xc.retrig.count -= 1;
        let fire = if s3m { xc.retrig.count <= 0 } else { xc.retrig.count == 0 };
        if !fire {
            return;
        }

        let kind = xc.retrig.kind as usize;
        if kind < 0x10 {
            self.voices.set_position(chn, 0, &module.samples);
        } else {
            xc.note_flags.insert(NoteFlags::END);
        }
        let (add, mul, div) = RETRIG_TABLE.get(kind).copied().unwrap_or(RETRIG_TABLE[16]);
        xc.volume = (xc.volume + add) * mul / div;
        xc.retrig.count = lsn(xc.retrig.val) as i32;

        if xc.retrig.limit > 0 {
            xc.retrig.limit -= 1;
            if xc.retrig.limit == 0 {
                xc.flags.remove(FxFlags::RETRIG);
            }
        }
    }

    fn update_volume(&mut self, module: &Module, chn: usize) {
        let speed = self.clock.speed.max(1) as i32;
        let frame = self.clock.frame;
        let vsall = self.dialect.has(Quirks::VSALL);
        let rowdelay = self.flow.rowdelay_set;
        let xc = &mut self.channels[chn];
        let gvol = &mut self.clock.gvol;

        if frame % speed != 0 || vsall {
            if xc.flags.contains(FxFlags::GVOL_SLIDE) {
                *gvol += xc.gvol.slide;
            }
            if xc.flags.contains(FxFlags::VOL_SLIDE) {
                xc.volume += xc.vol.slide;
            }
            if xc.flags.contains(FxFlags::VOL_SLIDE_2) {
                xc.volume += xc.vol.slide2;
            }
            if xc.flags.contains(FxFlags::TRK_VSLIDE) {
                xc.mastervol += xc.trackvol.slide;
            }
        }

        if frame % speed == 0 {
            if xc.flags.contains(FxFlags::FINE_VOLS) {
                xc.volume += xc.vol.fslide;
            }
            // Volume column fine slides skip the repeats of a delayed row
            if xc.flags.contains(FxFlags::FINE_VOLS_2)
                && (rowdelay.is_empty() || rowdelay.contains(RowDelay::FIRST_FRAME))
            {
                xc.volume += xc.vol.fslide2;
            }
            if xc.flags.contains(FxFlags::TRK_FVSLIDE) {
                xc.mastervol += xc.trackvol.fslide;
            }
            if xc.flags.contains(FxFlags::GVOL_SLIDE) {
                *gvol += xc.gvol.fslide;
            }
        }

        let volbase = module.volume_base as i32;
        xc.volume = xc.volume.clamp(0, volbase);
        xc.mastervol = xc.mastervol.clamp(0, volbase);
        *gvol = (*gvol).clamp(0, module.global_volume_base as i32);
    }

    fn update_frequency(&mut self, module: &Module, chn: usize) {
        let dialect = self.dialect;
        let first = dialect.is_first_frame(self.clock.frame, self.clock.speed);
        let protrack = dialect.has(Quirks::PROTRACK);
        let xc = &mut self.channels[chn];

        if !first || dialect.has(Quirks::PBALL) {
            if xc.flags.contains(FxFlags::PITCHBEND) {
                xc.period += xc.freq.slide;
                if protrack {
                    xc.porta.target = xc.period;
                }
            }

            if xc.flags.contains(FxFlags::TONEPORTA) && xc.porta.target > 0.0 {
                let slide = xc.porta.slide as f64;
                let reached = if xc.porta.dir > 0 {
                    xc.period += slide;
                    xc.period >= xc.porta.target
                } else {
                    xc.period -= slide;
                    xc.period <= xc.porta.target
                };
                if reached {
                    xc.period = xc.porta.target;
                    xc.porta.dir = 0;
                    xc.flags.remove(FxFlags::TONEPORTA);
                    if protrack {
                        xc.porta.target = -1.0;
                    }
                }
            }
        }

        if first && xc.flags.contains(FxFlags::FINE_BEND) {
            xc.period += xc.freq.fslide;
        }

        if let Some((lo, hi)) = period_limits(module.period_type, xc.finetune) {
            xc.period = xc.period.clamp(lo, hi);
        }

        // Negative or tiny periods come from runaway slides
        if xc.period < 0.25 {
            self.voices.set_volume(chn, 0, &self.muted);
        }
    }

    fn update_pan(&mut self, chn: usize) {
        let first = self.dialect.is_first_frame(self.clock.frame, self.clock.speed);
        let xc = &mut self.channels[chn];
        if xc.flags.contains(FxFlags::PAN_SLIDE) {
            xc.pan.val += if first { xc.pan.fslide } else { xc.pan.slide };
            xc.pan.val = xc.pan.val.clamp(0, 0xff);
        }
    }

    fn process_volume(&mut self, module: &Module, chn: usize, act: Option<NewNoteAction>) {
        let dialect = self.dialect;
        let Some(instrument) = valid_instrument(module, self.channels[chn].ins) else { return };
        let env = &instrument.volume_envelope;
        let first = dialect.is_first_frame(self.clock.frame, self.clock.speed);
        let channel_volume = self.channel_volume(chn);
        let xc = &mut self.channels[chn];

        let release = xc.note_flags.contains(NoteFlags::ENV_RELEASE) || act == Some(NewNoteAction::Off);
        let mut fade = false;
        if dialect.has(Quirks::KEYOFF) {
            // IT fades a released note only without an envelope or with a
            // looping one
            if release && (!env.enabled || env.loop_range.is_some()) {
                fade = true;
            }
        } else {
            if !env.enabled && xc.note_flags.contains(NoteFlags::ENV_RELEASE) {
                xc.fadeout = 0;
            }
            fade = release;
        }

        if !xc.per_flags.contains(PersistentFlags::VENV_PAUSE) {
            let key_off = xc.flags.contains(FxFlags::KEY_OFF);
            xc.v_env.advance(env, dialect.envelope, release, key_off);
        }
        let vol_envelope = xc.v_env.value(env, 64);
        if xc.v_env.ended(env) {
            if vol_envelope == 0 {
                xc.note_flags.insert(NoteFlags::END);
            }
            xc.note_flags.insert(NoteFlags::ENV_END);
        }
        match xc.v_env.fade(env) {
            // Not reset here, a tone portamento may still pick it up
            EnvelopeFade::Cut => xc.note_flags.insert(NoteFlags::END),
            EnvelopeFade::Fade if dialect.has(Quirks::ENVFADE) => xc.note_flags.insert(NoteFlags::FADEOUT),
            EnvelopeFade::Fade | EnvelopeFade::None => {}
        }

        if xc.note_flags.contains(NoteFlags::FADEOUT) || act == Some(NewNoteAction::Fade) {
            fade = true;
        }
        if fade {
            if xc.fadeout > xc.ins_fade {
                xc.fadeout -= xc.ins_fade;
            } else {
                xc.fadeout = 0;
                xc.note_flags.insert(NoteFlags::END);
            }
        }

        if xc.note_flags.contains(NoteFlags::END) && chn >= self.voices.num_tracks() {
            self.voices.reset_channel(chn);
            return;
        }

        let volbase = module.volume_base.max(1) as i64;
        let mut finalvol = if dialect.is_it() { xc.volume * (100 - xc.rvv) / 100 } else { xc.volume };

        if xc.flags.contains(FxFlags::TREMOLO) {
            if !first || !dialect.has(Quirks::PROTRACK) {
                finalvol += xc.tremolo.lfo.value(dialect.lfo_flavor(false), &mut self.rng) / (1 << 6);
            }
            if !first || dialect.has(Quirks::VIBALL) {
                xc.tremolo.lfo.update();
            }
        }

        let finalvol = (finalvol.clamp(0, volbase as i32) as i64 * xc.fadeout as i64) >> 6;
        let scaled = vol_envelope.max(0) as i64 * self.clock.gvol.max(0) as i64 * xc.mastervol as i64
            / module.global_volume_base.max(1) as i64
            * (finalvol * 0x40 / volbase);
        let mut finalvol = (scaled >> 18) as i32;

        finalvol = finalvol * channel_volume / 100;

        if dialect.has(Quirks::INSVOL) {
            finalvol = (finalvol * instrument.volume as i32 * xc.gvl) >> 12;
        }

        finalvol = match dialect.tremor {
            TremorPolicy::Ft2 => tremor_ft2(xc, self.clock.frame, finalvol),
            TremorPolicy::S3m => tremor_s3m(xc, finalvol),
        };
        xc.macro_state.finalvol = finalvol;

        finalvol = finalvol * self.settings.master_volume / 100;
        xc.report.finalvol = if xc.note_flags.contains(NoteFlags::SAMPLE_END) { 0 } else { finalvol };
        self.voices.set_volume(chn, finalvol, &self.muted);
    }

    fn process_frequency(&mut self, module: &Module, chn: usize, act: Option<NewNoteAction>) {
        let dialect = self.dialect;
        let Some(instrument) = valid_instrument(module, self.channels[chn].ins) else { return };
        let env = &instrument.pitch_envelope;
        let first = dialect.is_first_frame(self.clock.frame, self.clock.speed);
        let (frame, speed) = (self.clock.frame, self.clock.speed.max(1) as i32);
        let xc = &mut self.channels[chn];

        let release = xc.note_flags.contains(NoteFlags::ENV_RELEASE) || act == Some(NewNoteAction::Off);
        if !xc.per_flags.contains(PersistentFlags::FENV_PAUSE) {
            let key_off = xc.flags.contains(FxFlags::KEY_OFF);
            xc.f_env.advance(env, dialect.envelope, release, key_off);
        }
        let frq_envelope = xc.f_env.value(env, 0);

        let insvib = &mut xc.insvib;
        let mut vibrato = insvib.lfo.value(dialect.lfo_flavor(true), &mut self.rng) as f64
            / (4096.0 * (1 + insvib.sweep) as f64);
        insvib.lfo.update();
        insvib.sweep = if insvib.sweep > 1 { insvib.sweep - 2 } else { 0 };

        if xc.flags.contains(FxFlags::VIBRATO) {
            if !first || !dialect.has(Quirks::PROTRACK) {
                let shift = if dialect.has(Quirks::VIBHALF) { 10 } else { 9 };
                let vib = xc.vibrato.lfo.value(dialect.lfo_flavor(true), &mut self.rng) / (1 << shift);
                if dialect.has(Quirks::VIBINV) {
                    vibrato -= vib as f64;
                } else {
                    vibrato += vib as f64;
                }
            }
            if !first || dialect.has(Quirks::VIBALL) {
                xc.vibrato.lfo.update();
            }
        }

        let mut period = xc.period;
        if dialect.has(Quirks::ST3BUGS) && period < 0.25 {
            self.voices.reset_channel(chn);
        }
        period = period.max(0.1);

        let mut arp = arpeggio(&dialect, xc, frame, speed);
        let mut bend = period_to_bend(dialect.period_type, period + vibrato, xc.note);

        if xc.note_flags.contains(NoteFlags::GLISSANDO) && xc.flags.contains(FxFlags::TONEPORTA) {
            let half = BEND_PER_SEMITONE / 2;
            if bend > 0 {
                bend = (bend + half) / BEND_PER_SEMITONE * BEND_PER_SEMITONE;
            } else if bend < 0 {
                bend = (bend - half) / BEND_PER_SEMITONE * BEND_PER_SEMITONE;
            }
        }

        if dialect.has(Quirks::FT2BUGS) && arp != 0 {
            // Arpeggio drops the slide fraction and clamps at B-7
            bend = bend / BEND_PER_SEMITONE * BEND_PER_SEMITONE + xc.finetune * 100;
            if xc.note + arp > 107 && speed - frame % speed > 0 {
                arp = 108 - xc.note;
            }
        }

        // Pitch envelopes are linear in 1/25 semitone in every period mode
        if xc.f_env.position() >= 0 && !env.filter {
            bend += frq_envelope << 7;
        }

        if arp != 0 {
            bend += (100 << 7) * arp;
            if dialect.has(Quirks::PROTRACK) {
                if xc.note + arp > MAX_NOTE_MOD + 1 {
                    bend -= BEND_PER_SEMITONE * 36;
                } else if xc.note + arp > MAX_NOTE_MOD {
                    self.voices.set_volume(chn, 0, &self.muted);
                }
            }
        }

        let mut final_period = note_to_period_mix(xc.note, bend);
        if dialect.has(Quirks::ST3BUGS) {
            final_period = final_period.max(ST3_MIN_PERIOD);
        }
        self.voices.set_period(chn, final_period);

        xc.report.pitchbend = bend >> 7;
        let mut reported = (final_period * 4096.0).min(i32::MAX as f64);
        if dialect.period_type == PeriodType::ModRange {
            let lo = note_to_period(dialect.period_type, MAX_NOTE_MOD, xc.finetune) * 4096.0;
            let hi = note_to_period(dialect.period_type, MIN_NOTE_MOD, xc.finetune) * 4096.0;
            reported = reported.clamp(lo, hi);
        } else if reported < 4096.0 {
            reported = 4096.0;
        }
        xc.report.period = reported as i32;

        if !dialect.has(Quirks::FILTER) {
            return;
        }
        let cutoff = if xc.f_env.position() >= 0 && env.filter {
            if frq_envelope < 0xfe {
                xc.filter.envelope = frq_envelope;
            }
            xc.filter.cutoff * xc.filter.envelope >> 8
        } else {
            xc.filter.cutoff
        };
        let cutoff = cutoff.min(0xff);
        let resonance = xc.filter.resonance;

        // Cutoff 127 with no resonance only switches the filter off on a
        // fresh note
        if cutoff < 0xfe || resonance > 0 || xc.filter.can_disable {
            let coef = filter_setup(self.settings.sample_rate, cutoff, resonance);
            self.voices.set_filter(chn, cutoff, resonance, coef);
            xc.filter.can_disable = false;
        }
    }

    fn process_pan(&mut self, module: &Module, chn: usize, act: Option<NewNoteAction>) {
        let dialect = self.dialect;
        let Some(instrument) = valid_instrument(module, self.channels[chn].ins) else { return };
        let env = &instrument.pan_envelope;
        let first = dialect.is_first_frame(self.clock.frame, self.clock.speed);
        let xc = &mut self.channels[chn];

        let release = xc.note_flags.contains(NoteFlags::ENV_RELEASE) || act == Some(NewNoteAction::Off);
        if !xc.per_flags.contains(PersistentFlags::PENV_PAUSE) {
            let key_off = xc.flags.contains(FxFlags::KEY_OFF);
            xc.p_env.advance(env, dialect.envelope, release, key_off);
        }
        let pan_envelope = xc.p_env.value(env, 32);

        let mut panbrello = 0;
        if xc.flags.contains(FxFlags::PANBRELLO) {
            panbrello = xc.panbrello.lfo.value(dialect.lfo_flavor(false), &mut self.rng) / 512;
            if first {
                xc.panbrello.lfo.update();
            }
        }
        xc.macro_state.notepan = xc.pan.val + panbrello + 0x80;

        let pan = xc.pan.val;
        let mut finalpan = pan + panbrello + (pan_envelope - 32) * (128 - (pan - 128).abs()) / 32;
        if dialect.is_it() {
            finalpan += xc.rpv * 4;
        }
        let finalpan = finalpan.clamp(0, 255);

        let surround = xc.pan.surround;
        let finalpan = if self.settings.mono || surround {
            0
        } else {
            (finalpan - 0x80) * self.settings.separation / 100
        };
        xc.report.finalpan = finalpan + 0x80;
        self.voices.set_pan(chn, finalpan, surround);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::flow::NullTracer;
    use alloc::vec::Vec;
    use tp_ir::{Effect, Envelope, Event, Instrument, Pattern, ReadEventType, Sample, SampleData};

    fn module(events: ReadEventType, quirks: Quirks) -> Module {
        let mut m = Module::with_channels("upd", 1);
        m.read_event_type = events;
        m.quirks = quirks;
        m.samples.push(Sample::with_data("s", SampleData::Mono8(alloc::vec![64; 20000])));
        m.instruments.push(Instrument::with_sample("i", 0));
        m.patterns.push(Pattern::new(16, 1));
        m.orders.push(0);
        m
    }

    fn sequencer(m: &Module) -> Sequencer {
        let mut seq = Sequencer::new(m, Dialect::from_module(m), &PlayerConfig::default(), Vec::new(), 0, 0, true);
        seq.start(m, &mut NullTracer);
        seq
    }

    /// Read `ev` on tick 0, then run ticks 1.. and collect `probe` after each.
    fn run_ticks<T>(m: &Module, ev: Event, ticks: usize, probe: impl Fn(&Sequencer) -> T) -> Vec<T> {
        let mut seq = sequencer(m);
        seq.clock.frame = 0;
        seq.read_event(m, &ev, 0);
        seq.play_channel(m, 0);
        let mut out = Vec::new();
        for frame in 1..=ticks {
            seq.clock.frame = frame as i32;
            seq.play_channel(m, 0);
            out.push(probe(&seq));
        }
        out
    }

    #[test]
    fn arpeggio_cycles_after_first_tick() {
        let m = module(ReadEventType::Mod, Quirks::empty());
        let ev = Event::note(60, 1).with_effect(Effect::Arpeggio(0x47));
        let bends = run_ticks(&m, ev, 5, |s| s.channels[0].report.pitchbend / 100);
        assert_eq!(bends, [4, 7, 0, 4, 7]);
    }

    #[test]
    fn ft2_arpeggio_reads_table_backwards() {
        let mut xc = ChannelState::default();
        xc.arpeggio.set(4, 7);
        let seen: Vec<i32> = (1..6).map(|f| ft2_arpeggio(&xc, f, 6)).collect();
        assert_eq!(seen, [7, 4, 0, 7, 4]);
        assert_eq!(ft2_arpeggio(&xc, 1, 17), 0);
        assert_eq!(ft2_arpeggio(&xc, 1, 20), 7);
    }

    #[test]
    fn toneporta_converges_without_overshoot() {
        let m = module(ReadEventType::Mod, Quirks::empty());
        let mut seq = sequencer(&m);
        seq.clock.frame = 0;
        seq.read_event(&m, &Event::note(60, 1), 0);
        let xc = &mut seq.channels[0];
        xc.period = 1000.0;
        xc.porta.target = 800.0;
        xc.porta.dir = -1;
        xc.porta.slide = 50;
        xc.flags.insert(FxFlags::TONEPORTA);
        let mut periods = Vec::new();
        for frame in 1..=6 {
            seq.clock.frame = frame;
            seq.update_frequency(&m, 0);
            periods.push(seq.channels[0].period);
        }
        assert_eq!(periods, [950.0, 900.0, 850.0, 800.0, 800.0, 800.0]);
        assert!(!seq.channels[0].flags.contains(FxFlags::TONEPORTA));
        assert_eq!(seq.channels[0].porta.dir, 0);
    }

    #[test]
    fn volume_slide_skips_first_tick() {
        let m = module(ReadEventType::Mod, Quirks::empty());
        let ev = Event::note(60, 1).with_volume(32).with_effect(Effect::VolumeSlide(0x20));
        let vols = run_ticks(&m, ev, 3, |s| s.channels[0].volume);
        assert_eq!(vols, [34, 36, 38]);
    }

    #[test]
    fn fine_slide_only_on_first_tick() {
        let m = module(ReadEventType::Mod, Quirks::empty());
        let mut seq = sequencer(&m);
        seq.clock.frame = 0;
        let ev = Event::note(60, 1).with_volume(32).with_effect(Effect::Extended(0xa4));
        seq.read_event(&m, &ev, 0);
        seq.play_channel(&m, 0);
        assert_eq!(seq.channels[0].volume, 36);
        seq.clock.frame = 1;
        seq.play_channel(&m, 0);
        assert_eq!(seq.channels[0].volume, 36);
    }

    #[test]
    fn note_cut_silences_on_its_tick() {
        let m = module(ReadEventType::Mod, Quirks::empty());
        let ev = Event::note(60, 1).with_effect(Effect::Extended(0xc2));
        let vols = run_ticks(&m, ev, 3, |s| s.channels[0].volume);
        assert_eq!(vols, [64, 0, 0]);
    }

    #[test]
    fn retrig_table_applies_volume_change() {
        let m = module(ReadEventType::St3, Quirks::ST3);
        let ev = Event::note(60, 1).with_volume(32).with_effect(Effect::MultiRetrig(0x21));
        let vols = run_ticks(&m, ev, 2, |s| s.channels[0].volume);
        assert_eq!(vols, [30, 28]);
    }

    #[test]
    fn s3m_tremor_alternates() {
        let m = module(ReadEventType::St3, Quirks::ST3);
        let ev = Event::note(60, 1).with_effect(Effect::Tremor(0x11));
        let on: Vec<bool> = run_ticks(&m, ev, 4, |s| s.channels[0].report.finalvol > 0);
        assert_eq!(on, [false, true, false, true]);
    }

    #[test]
    fn key_off_countdown_releases() {
        let m = module(ReadEventType::Ft2, Quirks::FT2);
        let ev = Event::note(60, 1).with_effect(Effect::KeyOff(2));
        let released = run_ticks(&m, ev, 3, |s| s.channels[0].note_flags.contains(NoteFlags::ENV_RELEASE));
        assert_eq!(released, [false, true, true]);
    }

    #[test]
    fn volume_envelope_scales_output() {
        let mut m = module(ReadEventType::Ft2, Quirks::FT2);
        m.instruments[0].volume_envelope = Envelope::from_points(&[(0, 64), (4, 0)]);
        let ev = Event::note(60, 1);
        let vols = run_ticks(&m, ev, 4, |s| s.channels[0].report.finalvol);
        assert!(vols.windows(2).all(|w| w[0] > w[1]), "{vols:?}");
        assert_eq!(vols[3], 0);
    }

    #[test]
    fn pan_slide_clamps() {
        let m = module(ReadEventType::Ft2, Quirks::FT2);
        let ev = Event::note(60, 1).with_effect(Effect::PanSlide(0x0f));
        let pans = run_ticks(&m, ev, 24, |s| s.channels[0].pan.val);
        assert_eq!(*pans.last().unwrap_or(&0), 0xff);
    }

    #[test]
    fn tempo_slide_is_clamped() {
        let m = module(ReadEventType::It, Quirks::IT);
        let ev = Event::note(60, 1).with_effect(Effect::ItTempo(0x1f));
        let mut seq = sequencer(&m);
        seq.clock.bpm = 250;
        seq.clock.frame = 0;
        seq.read_event(&m, &ev, 0);
        for frame in 1..4 {
            seq.clock.frame = frame;
            seq.play_channel(&m, 0);
        }
        assert_eq!(seq.clock.bpm, 0xff);
    }

    #[test]
    fn mono_output_centers_pan() {
        let m = module(ReadEventType::Mod, Quirks::empty());
        let mut seq = sequencer(&m);
        seq.settings.mono = true;
        seq.clock.frame = 0;
        seq.read_event(&m, &Event::note(60, 1), 0);
        seq.play_channel(&m, 0);
        assert_eq!(seq.voices.voice(0).map(|v| v.pan), Some(0));
    }

    #[test]
    fn global_volume_slide_runs_without_voice() {
        let mut m = module(ReadEventType::It, Quirks::IT);
        m.global_volume_base = 128;
        let mut seq = sequencer(&m);
        seq.clock.gvol = 64;
        seq.clock.frame = 0;
        seq.process_fx(&m, 0, &Event::empty().with_effect(Effect::GlobalVolumeSlide(0x20)), false);
        seq.clock.frame = 1;
        seq.play_channel(&m, 0);
        assert_eq!(seq.clock.gvol, 66);
    }
}
