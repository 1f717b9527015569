//! Event readers: apply one pattern cell to a channel.
//!
//! The note and instrument columns mean different things to each tracker
//! family, so [`Sequencer::read_event`] dispatches on the module's event
//! type. All readers share the same tail: effect defaults, volume column,
//! effect columns, period, then the sample position.

use rand::RngCore;
use tp_ir::{
    DuplicateAction, DuplicateCheck, Effect, Envelope, Event, Instrument, Module, NewNoteAction,
    Note, Quirks, ReadEventType, SubInstrument,
};

use crate::channel::{valid_key, ChannelState, FxFlags, NoteFlags, PersistentFlags, FADEOUT_MAX};
use crate::dialect::Dialect;
use crate::frequency::note_to_period;
use crate::config::PlayerFlags;
use crate::sequencer::Sequencer;
use crate::voice_pool::{ChannelStatus, Patch};

/// Instrument at a 0-based index, if it exists and has subinstruments.
pub(crate) fn valid_instrument(module: &Module, ins: Option<usize>) -> Option<&Instrument> {
    module.instruments.get(ins?).filter(|i| !i.subinstruments.is_empty())
}

/// Subinstrument played by `key` on `ins`; the first one without a key.
pub(crate) fn subinstrument(module: &Module, ins: Option<usize>, key: Option<usize>) -> Option<&SubInstrument> {
    valid_instrument(module, ins)?.subinstrument_for(key)
}

/// Key-map transpose of `key` on `ins`.
pub(crate) fn map_transpose(module: &Module, ins: Option<usize>, key: Option<usize>) -> i32 {
    ins.and_then(|i| module.instruments.get(i))
        .zip(key)
        .and_then(|(i, k)| i.key_map.get(k))
        .map_or(0, |m| m.transpose as i32)
}

fn valid_sample(module: &Module, smp: Option<usize>) -> Option<usize> {
    smp.filter(|&s| s < module.samples.len())
}

fn fadeout_of(module: &Module, ins: Option<usize>) -> i32 {
    ins.and_then(|i| module.instruments.get(i)).map_or(0, |i| i.fadeout as i32)
}

/// Playable key of a note column.
fn note_key(note: Note) -> Option<usize> {
    note.key().and_then(|k| valid_key(k as i32))
}

fn is_toneporta(fx: Effect) -> bool {
    matches!(fx, Effect::TonePorta(_) | Effect::TonePortaVolSlide(_))
}

fn has_toneporta(ev: &Event) -> bool {
    is_toneporta(ev.effect) || is_toneporta(ev.effect2)
}

/// Voice setup for trackers without new-note actions.
fn plain_patch(ins: Option<usize>, smp: usize, note: i32, key: i32) -> Patch {
    Patch {
        ins,
        smp: Some(smp),
        note,
        key,
        nna: NewNoteAction::Cut,
        dct: DuplicateCheck::Off,
        dca: DuplicateAction::Cut,
    }
}

fn reset_envelopes(module: &Module, xc: &mut ChannelState) {
    if valid_instrument(module, xc.ins).is_some() {
        xc.reset_envelopes();
    }
}

fn reset_envelope_volume(module: &Module, xc: &mut ChannelState) {
    if valid_instrument(module, xc.ins).is_some() {
        xc.note_flags.remove(NoteFlags::ENV_END);
        xc.v_env.reset();
    }
}

/// Rewind the envelopes that do not carry over between notes.
fn reset_envelopes_carry(module: &Module, xc: &mut ChannelState) {
    let Some(ins) = valid_instrument(module, xc.ins) else { return };
    xc.note_flags.remove(NoteFlags::ENV_END);
    if !ins.volume_envelope.carry {
        xc.v_env.reset();
    }
    if !ins.pan_envelope.carry {
        xc.p_env.reset();
    }
    if !ins.pitch_envelope.carry {
        xc.f_env.reset();
    }
}

/// True if the volume envelope sits exactly on its sustain point.
fn sustain_check(env: Option<&Envelope>, idx: i32) -> bool {
    let Some(env) = env else { return false };
    match env.sustain {
        Some(sus) if env.enabled && env.loop_range.is_none() => idx == env.tick_of(sus.start),
        _ => false,
    }
}

/// True if `key` on instrument `ins` plays no sample.
fn invalid_sample(module: &Module, ins: usize, key: usize) -> bool {
    let Some(instrument) = module.instruments.get(ins) else { return false };
    instrument
        .subinstrument_for(Some(key))
        .and_then(|s| valid_sample(module, s.sample))
        .is_none()
}

/// True if `key` on `ins` plays the sample the channel is playing.
fn is_same_sid(module: &Module, xc: &ChannelState, ins: Option<usize>, key: Option<usize>) -> bool {
    let s1 = subinstrument(module, ins, key);
    let s2 = subinstrument(module, xc.ins, xc.key_index());
    matches!((s1, s2), (Some(a), Some(b)) if a.sample == b.sample)
}

/// True if a new instrument may rewind a finished volume envelope.
fn check_fadeout(module: &Module, xc: &ChannelState, ins: Option<usize>) -> bool {
    let Some(instrument) = ins.and_then(|i| module.instruments.get(i)) else { return true };
    let env = &instrument.volume_envelope;
    !env.enabled || !env.carry || xc.ins_fade == 0 || xc.fadeout <= xc.ins_fade
}

/// Per-note defaults taken from the subinstrument.
fn set_effect_defaults(
    dialect: &Dialect,
    xc: &mut ChannelState,
    note: Option<i32>,
    sub: Option<&SubInstrument>,
    toneporta: bool,
) {
    if let (Some(sub), Some(_)) = (sub, note) {
        if !dialect.has(Quirks::PROTRACK) {
            xc.finetune = sub.finetune as i32;
        }
        xc.gvl = sub.global_volume as i32;

        if let Some(cutoff) = sub.cutoff {
            xc.filter.cutoff = cutoff as i32 * 2;
        }
        xc.filter.envelope = 0x100;
        if let Some(res) = sub.resonance {
            xc.filter.resonance = res as i32 * 2;
        }
        // A fresh note may switch the filter off; a slide keeps it
        xc.filter.can_disable = !toneporta;

        xc.insvib.lfo.set_depth(sub.vibrato.depth as i32);
        xc.insvib.lfo.set_rate(((sub.vibrato.speed as u16 + 2) >> 2) as u8);
        xc.insvib.lfo.set_waveform(sub.vibrato.waveform);
        xc.insvib.sweep = sub.vibrato.sweep as i32;

        xc.vibrato.lfo.set_phase(0);
        xc.tremolo.lfo.set_phase(0);
    }

    xc.delay = 0;
    xc.tremor.up = 0;
    xc.tremor.down = 0;
    xc.arpeggio.reset();
}

/// A new note without portamento sets the period; portamento only
/// moves the target.
fn set_period(
    dialect: &Dialect,
    xc: &mut ChannelState,
    note: Option<i32>,
    sub: Option<&SubInstrument>,
    toneporta: bool,
) {
    let (Some(_), Some(note)) = (sub, note) else { return };
    let per = note_to_period(dialect.period_type, note, xc.finetune);
    if !dialect.has(Quirks::PROTRACK) || (note > 0 && toneporta) {
        xc.porta.target = per;
    }
    if xc.period < 1.0 || !toneporta {
        xc.period = per;
    }
}

/// FT2 variant: an instrument number alone never resets the target.
fn set_period_ft2(
    dialect: &Dialect,
    xc: &mut ChannelState,
    note: Option<i32>,
    sub: Option<&SubInstrument>,
    toneporta: bool,
) {
    let Some(note) = note else { return };
    let per = note_to_period(dialect.period_type, note, xc.finetune);
    if note > 0 && toneporta {
        xc.porta.target = per;
    }
    if sub.is_some() && (xc.period < 1.0 || !toneporta) {
        xc.period = per;
    }
}

/// FT2 instrument pan applied around the channel pan.
fn ft2_pan(chpan: i32, sub: &SubInstrument) -> i32 {
    let pan = chpan - 128;
    let subpan = sub.pan.map_or(0x80, |p| p as i32);
    pan + ((subpan - 128) * (128 - pan.abs())) / 128 + 128
}

impl Sequencer {
    /// Apply pattern cell `ev` to track `chn`.
    pub(crate) fn read_event(&mut self, module: &Module, ev: &Event, chn: usize) {
        let xc = &mut self.channels[chn];
        if ev.instrument != 0 {
            xc.old_ins = ev.instrument;
        }
        if xc.note_flags.contains(NoteFlags::SAMPLE_END) {
            xc.note_flags.insert(NoteFlags::END);
        }

        match self.dialect.events {
            ReadEventType::Mod => self.read_event_mod(module, ev, chn),
            ReadEventType::Ft2 => self.read_event_ft2(module, ev, chn),
            ReadEventType::St3 => self.read_event_st3(module, ev, chn),
            ReadEventType::It => self.read_event_it(module, ev, chn),
            ReadEventType::Med => self.read_event_med(module, ev, chn),
        }
    }

    fn read_event_mod(&mut self, module: &Module, ev: &Event, chn: usize) {
        let protrack = self.dialect.has(Quirks::PROTRACK);
        let toneporta = has_toneporta(ev);
        let mut note = None;
        let mut new_invalid_ins = false;
        let mut use_ins_vol = false;

        let xc = &mut self.channels[chn];
        xc.flags = FxFlags::empty();

        if ev.instrument != 0 {
            let ins = ev.instrument as usize - 1;
            use_ins_vol = true;
            xc.flags.insert(FxFlags::NEW_INS);
            xc.fadeout = FADEOUT_MAX;
            xc.per_flags = PersistentFlags::empty();
            xc.offset.val = 0;
            xc.note_flags.remove(NoteFlags::RELEASE | NoteFlags::FADEOUT);

            if let Some(instrument) = valid_instrument(module, Some(ins)) {
                let sub = instrument.subinstrument_for(note_key(ev.note));
                if toneporta {
                    if let Some(sub) = sub {
                        xc.volume = sub.volume as i32;
                        use_ins_vol = false;
                    }
                } else {
                    xc.ins = Some(ins);
                    xc.ins_fade = instrument.fadeout as i32;
                    if let (Some(sub), true) = (sub, protrack) {
                        xc.finetune = sub.finetune as i32;
                    }
                }
            } else {
                new_invalid_ins = true;
                self.voices.reset_channel(chn);
            }
        }

        if ev.note != Note::None {
            xc.flags.insert(FxFlags::NEW_NOTE);
            match ev.note {
                Note::Off => {
                    xc.note_flags.insert(NoteFlags::RELEASE);
                    use_ins_vol = false;
                }
                Note::On(k) if !toneporta && valid_key(k as i32).is_some() => {
                    xc.key = k as i32;
                    xc.note_flags.remove(NoteFlags::END);
                    let key = Some(k as usize);
                    match subinstrument(module, xc.ins, key) {
                        Some(sub) if !new_invalid_ins => {
                            let n = xc.key + sub.transpose as i32 + map_transpose(module, xc.ins, key);
                            note = Some(n);
                            if let Some(smp) = valid_sample(module, sub.sample) {
                                self.voices.set_patch(chn, plain_patch(xc.ins, smp, n, xc.key));
                                xc.smp = Some(smp);
                            }
                        }
                        _ => {
                            xc.flags = FxFlags::empty();
                            use_ins_vol = false;
                        }
                    }
                }
                _ => {}
            }
        }

        let sub = subinstrument(module, xc.ins, xc.key_index());
        set_effect_defaults(&self.dialect, xc, note, sub, toneporta);
        if ev.instrument != 0 && sub.is_some() {
            reset_envelopes(module, xc);
        }

        if ev.volume != 0 {
            xc.volume = ev.volume as i32 - 1;
            xc.flags.insert(FxFlags::NEW_VOL);
        }

        self.process_fx(module, chn, ev, true);
        self.process_fx(module, chn, ev, false);
        let xc = &mut self.channels[chn];
        set_period(&self.dialect, xc, note, sub, toneporta);

        let Some(sub) = sub else { return };
        if let Some(n) = note {
            xc.note = n;
            self.voices.set_position(chn, xc.offset.val, &module.samples);
        }
        if xc.flags.contains(FxFlags::OFFSET) {
            if protrack || self.settings.flags.contains(PlayerFlags::FX9BUG) {
                xc.offset.val = xc.offset.val.wrapping_add(xc.offset.val2);
            }
            xc.flags.remove(FxFlags::OFFSET);
        }
        if use_ins_vol && !xc.flags.contains(FxFlags::NEW_VOL) {
            xc.volume = sub.volume as i32;
        }
    }

    fn read_event_ft2(&mut self, module: &Module, e: &Event, chn: usize) {
        // Notes next to an out-of-range note delay are dropped
        if self.clock.frame >= self.clock.speed as i32 {
            return;
        }
        let ftmod = self.dialect.has(Quirks::FTMOD);
        let chpan = module.channels.get(chn).map_or(0x80, |c| c.pan as i32);
        let mut ev = *e;
        let mut note = None;
        let mut key = ev.note;
        let mut ins = ev.instrument;
        let mut new_invalid_ins = false;
        let mut use_ins_vol = false;
        let mut k00 = false;

        let xc = &mut self.channels[chn];
        if ev.volume != 0 {
            xc.tremor.count &= !0x80;
        }
        xc.flags = FxFlags::empty();

        // K00 swallows the note; with no volume envelope it fades instead
        if ev.effect == Effect::KeyOff(0) {
            k00 = true;
            key = Note::None;
            if (ins != 0 || ev.volume != 0 || ev.effect2 != Effect::None)
                && valid_instrument(module, xc.ins).is_some_and(|i| !i.volume_envelope.enabled)
            {
                xc.note_flags.insert(NoteFlags::FADEOUT);
                ev.effect = Effect::None;
            }
        }

        let toneporta = has_toneporta(&ev);

        if ins != 0 && valid_instrument(module, Some(ins as usize - 1)).is_none() {
            ins = 0;
        }

        // Instrument without a note: restore the old instrument volume
        if ins != 0 && !matches!(key, Note::On(_)) {
            if let Some(sub) = subinstrument(module, xc.ins, xc.key_index()) {
                xc.volume = sub.volume as i32;
                if !ftmod {
                    xc.pan.val = ft2_pan(chpan, sub);
                }
                xc.ins_fade = fadeout_of(module, xc.ins);
                xc.flags.insert(FxFlags::NEW_VOL);
            }
        }

        if ev.instrument != 0 && key != Note::Fade {
            xc.flags.insert(FxFlags::NEW_INS);
            use_ins_vol = true;
            xc.per_flags = PersistentFlags::empty();
            xc.note_flags.remove(NoteFlags::RELEASE | NoteFlags::SUSEXIT);
            if !k00 {
                xc.note_flags.remove(NoteFlags::FADEOUT);
            }
            xc.fadeout = FADEOUT_MAX;

            if ins != 0 {
                if !toneporta {
                    xc.ins = Some(ins as usize - 1);
                }
            } else {
                new_invalid_ins = true;
                xc.flags = FxFlags::empty();
                if toneporta {
                    key = Note::None;
                }
            }
            xc.tremor.count = 0x20;
        }

        if ins != 0 {
            if let Note::On(k) = key {
                match subinstrument(module, xc.ins, valid_key(k as i32)) {
                    Some(sub) => {
                        xc.volume = sub.volume as i32;
                        if !ftmod {
                            xc.pan.val = ft2_pan(chpan, sub);
                        }
                        xc.ins_fade = fadeout_of(module, xc.ins);
                    }
                    None => xc.volume = 0,
                }
                xc.flags.insert(FxFlags::NEW_VOL);
            }
        }

        if key != Note::None {
            xc.flags.insert(FxFlags::NEW_NOTE);
            match key {
                Note::Off => {
                    let env = valid_instrument(module, xc.ins).map(|i| &i.volume_envelope);
                    let env_on = env.is_some_and(|e| e.enabled);
                    let vol_set = ev.volume != 0 || matches!(ev.effect, Effect::SetVolume(_));
                    let delay_fx = ev.effect == Effect::Extended(0xd0);

                    // No volume envelope: key off cuts unless a volume is set
                    if env_on || (!vol_set && (ev.instrument == 0 || !delay_fx)) {
                        if sustain_check(env, xc.v_env.position()) {
                            xc.note_flags.insert(NoteFlags::SUSEXIT);
                        } else {
                            xc.note_flags.insert(NoteFlags::RELEASE);
                        }
                        use_ins_vol = false;
                    } else {
                        xc.note_flags.insert(NoteFlags::FADEOUT);
                    }

                    if env_on {
                        if let Effect::Extended(p) = ev.effect {
                            if p >> 4 == 0xd && p & 0x0f != 0 {
                                xc.note_flags.remove(NoteFlags::RELEASE | NoteFlags::SUSEXIT);
                            }
                        }
                    }
                }
                Note::Fade => xc.note_flags.insert(NoteFlags::FADEOUT),
                // Portamento slides from the playing note
                _ if toneporta => key = Note::None,
                _ => {}
            }

            let old_ins = (xc.old_ins as usize).checked_sub(1);
            if ev.instrument == 0 && valid_instrument(module, old_ins).is_none() {
                new_invalid_ins = true;
            }
            if new_invalid_ins {
                self.voices.reset_channel(chn);
            }
        }

        // Notes whose transposed pitch leaves 12..=130 are ignored
        let mut sub = None;
        if let Some(k) = note_key(key) {
            sub = subinstrument(module, xc.ins, Some(k));
            if let (false, Some(s)) = (new_invalid_ins, sub) {
                let real = k as i32 + s.transpose as i32 + map_transpose(module, xc.ins, Some(k));
                if !(12..=130).contains(&real) {
                    key = Note::None;
                    xc.flags.remove(FxFlags::NEW_NOTE);
                }
            }
        }

        if let Some(k) = note_key(key) {
            xc.key = k as i32;
            xc.fadeout = FADEOUT_MAX;
            xc.note_flags.remove(NoteFlags::END);
            let env_on = valid_instrument(module, xc.ins).is_some_and(|i| i.volume_envelope.enabled);
            if sub.is_some() && !env_on {
                xc.note_flags.remove(NoteFlags::RELEASE | NoteFlags::FADEOUT);
            }
            match sub {
                Some(s) if !new_invalid_ins => {
                    let n = xc.key + s.transpose as i32 + map_transpose(module, xc.ins, Some(k));
                    note = Some(n);
                    if let Some(smp) = valid_sample(module, s.sample) {
                        self.voices.set_patch(chn, plain_patch(xc.ins, smp, n, xc.key));
                        xc.smp = Some(smp);
                    }
                }
                _ => {
                    xc.flags = FxFlags::empty();
                    use_ins_vol = false;
                }
            }
        }

        let sub = subinstrument(module, xc.ins, xc.key_index());
        set_effect_defaults(&self.dialect, xc, note, sub, toneporta);
        if ins != 0 && sub.is_some() && !k00 {
            reset_envelopes(module, xc);
        }

        if ev.volume != 0 {
            xc.volume = ev.volume as i32 - 1;
            xc.flags.insert(FxFlags::NEW_VOL);
            if xc.note_flags.contains(NoteFlags::END) {
                xc.fadeout = FADEOUT_MAX;
                xc.note_flags.remove(NoteFlags::RELEASE | NoteFlags::FADEOUT);
            }
        }

        xc.offset.val = 0;

        self.process_fx(module, chn, &ev, true);
        self.process_fx(module, chn, &ev, false);
        let xc = &mut self.channels[chn];
        set_period_ft2(&self.dialect, xc, note, sub, toneporta);

        let Some(sub) = sub else { return };
        if let Some(n) = note {
            xc.note = n;
            let len = sub.sample.and_then(|s| module.samples.get(s)).map_or(0, |s| s.len());
            // An offset past the sample end stops the channel
            if self.dialect.has(Quirks::FT2BUGS) && xc.offset.val as usize >= len {
                self.voices.reset_channel(chn);
            } else {
                self.voices.set_position(chn, xc.offset.val, &module.samples);
            }
        }
        if use_ins_vol && !xc.flags.contains(FxFlags::NEW_VOL) {
            xc.volume = sub.volume as i32;
        }
    }

    fn read_event_st3(&mut self, module: &Module, ev: &Event, chn: usize) {
        let ev_ins = (ev.instrument as usize).checked_sub(1);
        let mut toneporta = has_toneporta(ev);
        let mut note = None;
        let mut not_same_ins = false;
        let mut use_ins_vol = false;

        if self.voices.status(chn) == ChannelStatus::Invalid && self.channels[chn].ins != ev_ins {
            toneporta = false;
        }

        let xc = &mut self.channels[chn];
        xc.flags = FxFlags::empty();

        if let Some(ins) = ev_ins {
            xc.flags.insert(FxFlags::NEW_INS);
            use_ins_vol = true;
            xc.fadeout = FADEOUT_MAX;
            xc.per_flags = PersistentFlags::empty();
            xc.offset.val = 0;
            xc.note_flags.remove(NoteFlags::RELEASE | NoteFlags::FADEOUT);

            if let Some(instrument) = valid_instrument(module, Some(ins)) {
                if xc.ins != Some(ins) {
                    not_same_ins = true;
                    if !toneporta {
                        xc.ins = Some(ins);
                        xc.ins_fade = instrument.fadeout as i32;
                    } else if let Some(sub) = instrument.subinstrument_for(note_key(ev.note)) {
                        // Portamento keeps the sample but takes the new volume
                        xc.volume = sub.volume as i32;
                        use_ins_vol = false;
                    }
                }
            } else {
                xc.flags = FxFlags::empty();
                use_ins_vol = false;
            }
        }

        if ev.note != Note::None {
            xc.flags.insert(FxFlags::NEW_NOTE);
            match ev.note {
                Note::Off => {
                    xc.note_flags.insert(NoteFlags::RELEASE);
                    use_ins_vol = false;
                }
                _ if toneporta => {
                    if not_same_ins {
                        xc.offset.val = 0;
                    }
                }
                Note::On(k) if valid_key(k as i32).is_some() => {
                    xc.key = k as i32;
                    xc.note_flags.remove(NoteFlags::END);
                    let key = Some(k as usize);
                    match subinstrument(module, xc.ins, key) {
                        Some(sub) => {
                            let n = xc.key + sub.transpose as i32 + map_transpose(module, xc.ins, key);
                            note = Some(n);
                            if let Some(smp) = valid_sample(module, sub.sample) {
                                self.voices.set_patch(chn, plain_patch(xc.ins, smp, n, xc.key));
                                xc.smp = Some(smp);
                            }
                        }
                        None => {
                            xc.flags = FxFlags::empty();
                            use_ins_vol = false;
                        }
                    }
                }
                _ => {}
            }
        }

        let sub = subinstrument(module, xc.ins, xc.key_index());
        set_effect_defaults(&self.dialect, xc, note, sub, toneporta);
        if ev.instrument != 0 && sub.is_some() {
            reset_envelopes(module, xc);
        }

        if ev.volume != 0 {
            xc.volume = ev.volume as i32 - 1;
            xc.flags.insert(FxFlags::NEW_VOL);
        }

        self.process_fx(module, chn, ev, true);
        self.process_fx(module, chn, ev, false);
        let xc = &mut self.channels[chn];
        set_period(&self.dialect, xc, note, sub, toneporta);

        let Some(sub) = sub else { return };
        if let Some(n) = note {
            xc.note = n;
            self.voices.set_position(chn, xc.offset.val, &module.samples);
        }
        if use_ins_vol && !xc.flags.contains(FxFlags::NEW_VOL) {
            xc.volume = sub.volume as i32;
        }
        if self.dialect.has(Quirks::ST3BUGS) && xc.flags.contains(FxFlags::NEW_VOL) {
            xc.volume = xc.volume * self.clock.gvol / module.volume_base.max(1) as i32;
        }
    }

    fn read_event_it(&mut self, module: &Module, e: &Event, chn: usize) {
        let prenv = self.dialect.has(Quirks::PRENV);
        let sample_mode = !self.dialect.has(Quirks::VIRTUAL);
        let mut ev = *e;

        let xc = &mut self.channels[chn];

        // Impulse Tracker reads the instrument of a delayed note late
        if ev.instrument != 0 {
            xc.delayed_ins = 0;
        } else if ev.note != Note::None && xc.delayed_ins != 0 {
            ev.instrument = xc.delayed_ins;
            xc.delayed_ins = 0;
        }

        xc.flags = FxFlags::empty();
        let mut note: Option<i32> = None;
        let mut key = ev.note;
        let mut not_same_ins = false;
        let mut not_same_smp = false;
        let mut new_invalid_ins = false;
        let mut reset_env = false;
        let mut reset_susloop = false;
        let mut use_ins_vol = false;
        let mut candidate_ins = xc.ins;
        let mut toneporta_offset = false;

        let ev_ins = (ev.instrument as usize).checked_sub(1);
        let retrig_ins = self.dialect.has(Quirks::ITOLDFX)
            && ev.note == Note::Off
            && valid_instrument(module, ev_ins).is_some();

        // Notes mapped to no sample are ignored
        if let Note::On(k) = ev.note {
            match ev_ins {
                Some(ins) => {
                    if ins < module.instruments.len() && invalid_sample(module, ins, k as usize) {
                        candidate_ins = Some(ins);
                        ev = Event::empty();
                    }
                }
                None => {
                    let old = (xc.old_ins as usize).checked_sub(1);
                    match old {
                        Some(o) if valid_instrument(module, old).is_some() => {
                            if invalid_sample(module, o, k as usize) {
                                ev = Event::empty();
                            }
                        }
                        _ => new_invalid_ins = true,
                    }
                }
            }
        }

        let mut toneporta = has_toneporta(&ev);
        let is_release = xc.note_flags.intersects(NoteFlags::ENV_RELEASE | NoteFlags::FADEOUT);
        if xc.period <= 0.0 || xc.note_flags.contains(NoteFlags::END) {
            toneporta = false;
        }
        if toneporta && matches!(ev.effect, Effect::SampleOffset(_)) {
            toneporta_offset = true;
            if !prenv {
                xc.note_flags.remove(NoteFlags::ENV_END);
            }
        }

        if ev.instrument != 0 {
            let ins = ev.instrument as usize - 1;
            let mut set_new_ins = true;

            if is_release && key == Note::None {
                if toneporta {
                    if prenv || xc.note_flags.contains(NoteFlags::SET) {
                        toneporta = false;
                        reset_envelopes_carry(module, xc);
                    }
                } else {
                    reset_envelopes_carry(module, xc);
                }
            }

            if toneporta && xc.ins == Some(ins) && !prenv {
                if is_same_sid(module, xc, Some(ins), note_key(key)) {
                    set_new_ins = !is_release;
                } else {
                    not_same_ins = true;
                    not_same_smp = true;
                }
            }

            if set_new_ins {
                xc.flags.insert(FxFlags::NEW_INS);
                reset_env = true;
            }
            // A valid sample always brings its default volume
            use_ins_vol = true;
            xc.per_flags = PersistentFlags::empty();

            if valid_instrument(module, Some(ins)).is_some() {
                if key == Note::None && !xc.note_flags.contains(NoteFlags::KEY_CUT) {
                    if sample_mode && xc.note_flags.contains(NoteFlags::END) {
                        self.voices.set_position(chn, 0, &module.samples);
                    }
                    if xc.ins == Some(ins) {
                        xc.flags.insert(FxFlags::NEW_INS);
                        use_ins_vol = true;
                    } else {
                        key = xc.key_index().map_or(Note::None, |k| Note::On(k as u8));
                    }
                    xc.note_flags.remove(NoteFlags::SET);
                }

                if xc.ins != Some(ins) && (!toneporta || !prenv) {
                    candidate_ins = Some(ins);
                    if !is_same_sid(module, xc, Some(ins), note_key(key)) {
                        not_same_ins = true;
                        if toneporta {
                            if let Some(sub) = subinstrument(module, Some(ins), note_key(key)) {
                                xc.volume = sub.volume as i32;
                                use_ins_vol = false;
                            }
                        }
                    }
                }
            } else {
                // Sample mode cuts the note on an invalid instrument
                if sample_mode {
                    xc.volume = 0;
                }
                new_invalid_ins = true;
                xc.flags = FxFlags::empty();
                use_ins_vol = false;
            }
        }

        if key != Note::None {
            xc.flags.insert(FxFlags::NEW_NOTE);
            xc.note_flags.insert(NoteFlags::SET);
            match key {
                Note::Fade => {
                    xc.note_flags.insert(NoteFlags::FADEOUT);
                    reset_env = false;
                    reset_susloop = false;
                    use_ins_vol = false;
                }
                Note::Cut => {
                    xc.note_flags.insert(NoteFlags::END | NoteFlags::CUT | NoteFlags::KEY_CUT);
                    xc.period = 0.0;
                    self.voices.reset_channel(chn);
                }
                Note::Off => {
                    let env = valid_instrument(module, xc.ins).map(|i| &i.volume_envelope);
                    if sustain_check(env, xc.v_env.position()) {
                        xc.note_flags.insert(NoteFlags::SUSEXIT);
                    } else {
                        xc.note_flags.insert(NoteFlags::RELEASE);
                    }
                    xc.flags.insert(FxFlags::KEY_OFF);
                    // Never rewinds the envelope, but an explicit
                    // instrument still restores its volume
                    reset_env = false;
                    reset_susloop = false;
                    if ev.instrument == 0 {
                        use_ins_vol = false;
                    }
                }
                Note::On(k) if !new_invalid_ins => {
                    if !toneporta {
                        reset_env = true;
                        reset_susloop = true;
                    } else if not_same_ins || xc.note_flags.contains(NoteFlags::END) {
                        xc.flags.insert(FxFlags::NEW_INS);
                        xc.note_flags
                            .remove(NoteFlags::ENV_RELEASE | NoteFlags::SUSEXIT | NoteFlags::FADEOUT);
                    } else {
                        if valid_key(k as i32).is_some() {
                            xc.key_porta = k as i32;
                        }
                        key = Note::None;
                    }
                }
                _ => {}
            }
        }

        if let (Some(k), false) = (note_key(key), new_invalid_ins) {
            if xc.note_flags.contains(NoteFlags::CUT) {
                use_ins_vol = true;
            }
            xc.key = k as i32;
            xc.note_flags.remove(NoteFlags::END);

            match subinstrument(module, candidate_ins, Some(k)) {
                Some(sub) => {
                    // Clear the note delay before the channel is duplicated
                    xc.delay = 0;

                    let n = k as i32 + sub.transpose as i32 + map_transpose(module, candidate_ins, Some(k));
                    note = Some(n);
                    let smp = valid_sample(module, sub.sample);
                    let mut dct = sub.dct;

                    if not_same_smp {
                        // Portamento to another sample disables the
                        // new-note action of the current note
                        if sub.nna == NewNoteAction::Continue {
                            let porta = valid_key(xc.key_porta);
                            let transp = map_transpose(module, xc.ins, porta);
                            xc.period = note_to_period(
                                self.dialect.period_type,
                                xc.key + sub.transpose as i32 + transp,
                                xc.finetune,
                            );
                        }
                        self.voices.set_nna(chn, NewNoteAction::Cut);
                        dct = DuplicateCheck::Off;
                    }

                    let to = self.voices.set_patch(
                        chn,
                        Patch {
                            ins: candidate_ins,
                            smp,
                            note: n,
                            key: k as i32,
                            nna: sub.nna,
                            dct,
                            dca: sub.dca,
                        },
                    );

                    let vol_swing = sub.volume_swing.min(100) as u32;
                    xc.rvv = if vol_swing != 0 {
                        (self.rng.next_u32() % (vol_swing + 1)) as i32
                    } else {
                        0
                    };
                    let pan_swing = sub.pan_swing.min(64) as u32;
                    xc.rpv = if pan_swing != 0 {
                        (self.rng.next_u32() % (pan_swing + 1)) as i32 - (pan_swing / 2) as i32
                    } else {
                        0
                    };

                    let Some(to) = to else { return };
                    if to != chn {
                        self.copy_channel(to, chn);
                    }
                    if smp.is_some() {
                        self.channels[chn].smp = smp;
                    }
                }
                None => {
                    xc.flags = FxFlags::empty();
                    use_ins_vol = false;
                }
            }
        }

        let xc = &mut self.channels[chn];

        if (toneporta || retrig_ins) && prenv && ev.instrument != 0 {
            reset_envelopes_carry(module, xc);
        }

        if let Some(instrument) = valid_instrument(module, candidate_ins) {
            if xc.ins != candidate_ins {
                reset_envelopes(module, xc);
            }
            xc.ins = candidate_ins;
            xc.ins_fade = instrument.fadeout as i32;
        }

        // A new instrument rewinds a finished volume envelope unless it
        // carries and is still fading
        if ev.instrument != 0 && xc.note_flags.contains(NoteFlags::ENV_END) {
            if check_fadeout(module, xc, candidate_ins) {
                reset_envelope_volume(module, xc);
            } else {
                reset_env = false;
            }
        }

        if reset_env {
            if ev.note != Note::None {
                xc.note_flags.remove(NoteFlags::ENV_RELEASE | NoteFlags::SUSEXIT | NoteFlags::FADEOUT);
            }
            xc.fadeout = FADEOUT_MAX;
        }
        if reset_susloop && ev.note != Note::None {
            xc.note_flags.remove(NoteFlags::SAMPLE_RELEASE);
        }

        if retrig_ins && not_same_ins {
            xc.flags.insert(FxFlags::NEW_INS);
            self.voices.set_position(chn, 0, &module.samples);
            xc.fadeout = FADEOUT_MAX;
            xc.note_flags.remove(NoteFlags::RELEASE | NoteFlags::SUSEXIT | NoteFlags::FADEOUT);
        }

        let sub = subinstrument(module, xc.ins, xc.key_index());
        set_effect_defaults(&self.dialect, xc, note, sub, toneporta);
        if let (Some(sub), Some(_)) = (sub, note) {
            if let Some(pan) = sub.pan {
                xc.pan.val = pan as i32;
                xc.pan.surround = false;
            }
            if xc.note_flags.contains(NoteFlags::CUT) {
                reset_envelopes(module, xc);
            } else if !toneporta_offset || prenv {
                reset_envelopes_carry(module, xc);
            }
            xc.note_flags.remove(NoteFlags::CUT);
        }

        if ev.volume != 0 && (!xc.note_flags.contains(NoteFlags::CUT) || ev.instrument != 0) {
            xc.volume = ev.volume as i32 - 1;
            xc.flags.insert(FxFlags::NEW_VOL);
        }

        xc.offset.val &= !0xffff;

        // The volume column runs after the effect column
        self.process_fx(module, chn, &ev, false);
        self.process_fx(module, chn, &ev, true);
        let xc = &mut self.channels[chn];
        set_period(&self.dialect, xc, note, sub, toneporta);

        let Some(sub) = sub else { return };
        if let Some(n) = note {
            xc.note = n;
        }
        if note.is_some() || toneporta_offset {
            self.voices.set_position(chn, xc.offset.val, &module.samples);
        }
        if use_ins_vol && !xc.flags.contains(FxFlags::NEW_VOL) {
            xc.volume = sub.volume as i32;
        }
    }

    fn read_event_med(&mut self, module: &Module, ev: &Event, chn: usize) {
        let toneporta = is_toneporta(ev.effect);
        let mut note = None;
        let mut new_invalid_ins = false;
        let mut use_ins_vol = false;

        let xc = &mut self.channels[chn];
        xc.flags = FxFlags::empty();

        if ev.instrument != 0 && ev.note != Note::None {
            let ins = ev.instrument as usize - 1;
            use_ins_vol = true;
            xc.flags.insert(FxFlags::NEW_INS);
            xc.fadeout = FADEOUT_MAX;
            xc.offset.val = 0;
            xc.note_flags.remove(NoteFlags::RELEASE | NoteFlags::FADEOUT);

            if let Some(instrument) = valid_instrument(module, Some(ins)) {
                if toneporta {
                    if let Some(sub) = instrument.subinstrument_for(note_key(ev.note)) {
                        xc.volume = sub.volume as i32;
                        use_ins_vol = false;
                    }
                } else {
                    xc.ins = Some(ins);
                    xc.ins_fade = instrument.fadeout as i32;
                }
            } else {
                new_invalid_ins = true;
                self.voices.reset_channel(chn);
            }
        } else if ev.instrument != 0 {
            // Instrument without a note holds the note at the default volume
            use_ins_vol = true;
        }

        if ev.note != Note::None {
            xc.flags.insert(FxFlags::NEW_NOTE);
            match ev.note {
                Note::Off => {
                    xc.note_flags.insert(NoteFlags::RELEASE);
                    use_ins_vol = false;
                }
                Note::Cut => {
                    xc.note_flags.insert(NoteFlags::END);
                    xc.period = 0.0;
                    self.voices.reset_channel(chn);
                }
                Note::On(k)
                    if !toneporta
                        && valid_instrument(module, xc.ins).is_some()
                        && valid_key(k as i32).is_some() =>
                {
                    xc.key = k as i32;
                    xc.note_flags.remove(NoteFlags::END);
                    let key = Some(k as usize);
                    match subinstrument(module, xc.ins, key) {
                        Some(sub) if !new_invalid_ins => {
                            let n = xc.key + sub.transpose as i32 + map_transpose(module, xc.ins, key);
                            note = Some(n);
                            if let Some(smp) = valid_sample(module, sub.sample) {
                                self.voices.set_patch(chn, plain_patch(xc.ins, smp, n, xc.key));
                                xc.smp = Some(smp);
                            }
                        }
                        _ => {
                            xc.flags = FxFlags::empty();
                            use_ins_vol = false;
                        }
                    }
                }
                _ => {}
            }
        }

        let sub = subinstrument(module, xc.ins, xc.key_index());
        // Finetune set by an effect survives a note without instrument
        let finetune = xc.finetune;
        set_effect_defaults(&self.dialect, xc, note, sub, toneporta);
        if ev.instrument == 0 {
            xc.finetune = finetune;
        }
        if ev.instrument != 0 && sub.is_some() {
            reset_envelopes(module, xc);
        }

        if ev.volume != 0 {
            xc.volume = ev.volume as i32 - 1;
            xc.flags.insert(FxFlags::NEW_VOL);
        }

        self.process_fx(module, chn, ev, true);
        self.process_fx(module, chn, ev, false);
        let xc = &mut self.channels[chn];
        set_period(&self.dialect, xc, note, sub, toneporta);

        let Some(sub) = sub else { return };
        if let Some(n) = note {
            xc.note = n;
            self.voices.set_position(chn, xc.offset.val, &module.samples);
        }
        if use_ins_vol && !xc.flags.contains(FxFlags::NEW_VOL) {
            xc.volume = sub.volume as i32;
        }
    }

    /// Duplicate channel `from` onto background channel `to`, where the
    /// displaced note keeps playing.
    fn copy_channel(&mut self, to: usize, from: usize) {
        if to == from || to >= self.channels.len() {
            return;
        }
        let state = self.channels[from].clone();
        let dst = &mut self.channels[to];
        *dst = state;
        dst.flags = FxFlags::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::flow::NullTracer;
    use alloc::vec::Vec;
    use tp_ir::{Pattern, Sample, SampleData};

    fn module(events: ReadEventType, quirks: Quirks) -> Module {
        let mut m = Module::with_channels("read", 2);
        m.read_event_type = events;
        m.quirks = quirks;
        m.samples.push(Sample::with_data("s", SampleData::Mono8(alloc::vec![0; 1000])));
        m.instruments.push(Instrument::with_sample("i", 0));
        m.patterns.push(Pattern::new(4, 2));
        m.orders.push(0);
        m
    }

    fn sequencer(m: &Module) -> Sequencer {
        let dialect = Dialect::from_module(m);
        let mut seq = Sequencer::new(m, dialect, &PlayerConfig::default(), Vec::new(), 0, 0, true);
        seq.start(m, &mut NullTracer);
        seq
    }

    #[test]
    fn mod_note_starts_voice_at_instrument_volume() {
        let m = module(ReadEventType::Mod, Quirks::PROTRACKER);
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(60, 1), 0);
        let xc = &seq.channels[0];
        assert_eq!(xc.ins, Some(0));
        assert_eq!(xc.key, 60);
        assert_eq!(xc.volume, 64);
        assert!(xc.flags.contains(FxFlags::NEW_NOTE | FxFlags::NEW_INS));
        assert_eq!(seq.voices.status(0), ChannelStatus::Active);
        assert!((xc.period - 428.0).abs() < 1e-6);
    }

    #[test]
    fn volume_column_overrides_instrument_volume() {
        let m = module(ReadEventType::Mod, Quirks::PROTRACKER);
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(60, 1).with_volume(20), 0);
        assert_eq!(seq.channels[0].volume, 20);
    }

    #[test]
    fn toneporta_keeps_period_and_sets_target() {
        let m = module(ReadEventType::Mod, Quirks::empty());
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(60, 1), 0);
        let before = seq.channels[0].period;
        seq.read_event(&m, &Event::note(72, 0).with_effect(Effect::TonePorta(4)), 0);
        let xc = &seq.channels[0];
        assert_eq!(xc.period, before);
        assert_eq!(xc.key, 60);
    }

    #[test]
    fn invalid_instrument_resets_mod_channel() {
        let m = module(ReadEventType::Mod, Quirks::empty());
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(60, 1), 0);
        seq.read_event(&m, &Event::note(60, 9), 0);
        assert_eq!(seq.voices.status(0), ChannelStatus::Invalid);
    }

    #[test]
    fn ft2_key_off_without_envelope_fades_with_volume() {
        let m = module(ReadEventType::Ft2, Quirks::FT2);
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(60, 1), 0);
        let mut off = Event::empty();
        off.note = Note::Off;
        seq.read_event(&m, &off, 0);
        assert!(seq.channels[0].note_flags.contains(NoteFlags::ENV_RELEASE));

        seq.read_event(&m, &Event::note(60, 1), 0);
        off.volume = 33;
        off.instrument = 1;
        off.effect = Effect::Extended(0xd0);
        seq.read_event(&m, &off, 0);
        assert!(seq.channels[0].note_flags.contains(NoteFlags::FADEOUT));
    }

    #[test]
    fn ft2_note_out_of_range_is_ignored() {
        let mut m = module(ReadEventType::Ft2, Quirks::FT2);
        m.instruments[0].subinstruments[0].transpose = -60;
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(65, 1), 0);
        let xc = &seq.channels[0];
        assert_eq!(xc.key, -1);
        assert!(!xc.flags.contains(FxFlags::NEW_NOTE));
    }

    #[test]
    fn ft2_offset_past_end_cuts() {
        let m = module(ReadEventType::Ft2, Quirks::FT2);
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(60, 1).with_effect(Effect::SampleOffset(0x10)), 0);
        assert_eq!(seq.voices.status(0), ChannelStatus::Invalid);
        seq.read_event(&m, &Event::note(60, 1).with_effect(Effect::SampleOffset(0x02)), 0);
        assert_eq!(seq.voices.position(0), Some(0x200));
    }

    #[test]
    fn st3bugs_scales_new_volume_by_global_volume() {
        let m = module(ReadEventType::St3, Quirks::ST3);
        let mut seq = sequencer(&m);
        seq.clock.gvol = 32;
        seq.read_event(&m, &Event::note(60, 1).with_volume(40), 0);
        assert_eq!(seq.channels[0].volume, 20);
    }

    #[test]
    fn it_continue_moves_note_to_background() {
        let mut m = module(ReadEventType::It, Quirks::IT);
        m.instruments[0].subinstruments[0].nna = NewNoteAction::Continue;
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(60, 1), 0);
        seq.read_event(&m, &Event::note(64, 1), 0);
        let bg = seq.voices.background_of(0).next().expect("background channel");
        assert_eq!(seq.voices.voice(bg).map(|v| v.key), Some(60));
        assert_eq!(seq.voices.voice(0).map(|v| v.key), Some(64));
        assert_eq!(seq.channels[0].key, 64);
        assert_eq!(seq.voices.used(), 2);
    }

    #[test]
    fn it_unmapped_key_is_ignored() {
        let mut m = module(ReadEventType::It, Quirks::IT);
        m.instruments[0].key_map[70].sub = None;
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(60, 1), 0);
        seq.read_event(&m, &Event::note(70, 1), 0);
        assert_eq!(seq.channels[0].note, 60);
    }

    #[test]
    fn it_note_cut_stops_voice() {
        let m = module(ReadEventType::It, Quirks::IT);
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(60, 1), 0);
        let mut cut = Event::empty();
        cut.note = Note::Cut;
        seq.read_event(&m, &cut, 0);
        assert_eq!(seq.voices.status(0), ChannelStatus::Invalid);
        assert_eq!(seq.channels[0].period, 0.0);
    }

    #[test]
    fn it_volume_swing_stays_in_range() {
        let mut m = module(ReadEventType::It, Quirks::IT);
        m.instruments[0].subinstruments[0].volume_swing = 25;
        m.instruments[0].subinstruments[0].pan_swing = 16;
        let mut seq = sequencer(&m);
        for _ in 0..50 {
            seq.read_event(&m, &Event::note(60, 1), 0);
            let xc = &seq.channels[0];
            assert!((0..=25).contains(&xc.rvv));
            assert!((-8..=8).contains(&xc.rpv));
        }
    }

    #[test]
    fn med_keeps_effect_finetune_without_instrument() {
        let m = module(ReadEventType::Med, Quirks::empty());
        let mut seq = sequencer(&m);
        seq.read_event(&m, &Event::note(60, 1), 0);
        seq.channels[0].finetune = 48;
        seq.read_event(&m, &Event::note(62, 0), 0);
        assert_eq!(seq.channels[0].finetune, 48);
    }

    #[test]
    fn sustain_check_needs_exact_point() {
        let mut env = Envelope::from_points(&[(0, 64), (8, 32), (16, 0)]);
        env.sustain = Some(tp_ir::LoopRange { start: 1, end: 1 });
        assert!(sustain_check(Some(&env), 8));
        assert!(!sustain_check(Some(&env), 7));
        env.loop_range = Some(tp_ir::LoopRange { start: 0, end: 1 });
        assert!(!sustain_check(Some(&env), 8));
        assert!(!sustain_check(None, 8));
    }
}
