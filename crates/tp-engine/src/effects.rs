//! Effect processor: one effect column applied to a channel.
//!
//! Effects either act immediately (volume, jumps, speed) or arm a slide
//! or modulation that [`crate::update`] runs every tick. A zero parameter
//! usually recalls the family's last nonzero value; which register each
//! family uses is decided here, through [`ChannelState::recall`] and
//! friends.

use tp_ir::{Effect, Event, ExtendedCommand, Module, NewNoteAction, Note, Quirks};

use crate::channel::{lsn, msn, valid_key, ChannelState, EffectMemory, FxFlags, NoteFlags, PersistentFlags};
use crate::config::{PlayerFlags, MAX_VOICES};
use crate::dialect::{Dialect, TremorPolicy};
use crate::flow::RowDelay;
use crate::frequency::note_to_period;
use crate::lfo::Lfo;
use crate::read_event::valid_instrument;
use crate::sequencer::Sequencer;

/// Slowest tempo reachable through tempo commands.
pub const MIN_BPM: u32 = 20;

/// Slowest tempo a BPM command can set. Lower time factors allow
/// slower tempos.
pub(crate) fn min_bpm(module: &Module) -> u32 {
    ((0.5 + module.time_factor * MIN_BPM as f64 / 10.0) as u32).max(1)
}

/// Past-note action of IT `S70`-`S72`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PastNote {
    Cut,
    Off,
    Fade,
}

/// Set LFO depth and rate, leaving zero values untouched.
fn set_lfo_nonzero(lfo: &mut Lfo, depth: i32, rate: u8) {
    if depth != 0 {
        lfo.set_depth(depth);
    }
    if rate != 0 {
        lfo.set_rate(rate);
    }
}

/// Aim the tone portamento at `note`, or keep the old target without a
/// note, and pick the slide direction.
fn do_toneporta(module: &Module, dialect: &Dialect, xc: &mut ChannelState, note: Note) {
    let Some(instrument) = valid_instrument(module, xc.ins) else { return };
    let mapped = xc
        .key_index()
        .and_then(|k| instrument.key_map.get(k))
        .and_then(|m| m.sub)
        .map(|s| s as usize)
        .filter(|&s| s < instrument.subinstruments.len())
        .unwrap_or(0);

    if let (Some(k), Some(sub)) = (note.key().and_then(|k| valid_key(k as i32)), instrument.subinstruments.get(mapped)) {
        let transpose = valid_key(xc.key_porta)
            .and_then(|kp| instrument.key_map.get(kp))
            .map_or(0, |m| m.transpose as i32);
        xc.porta.target = note_to_period(
            dialect.period_type,
            k as i32 + sub.transpose as i32 + transpose,
            xc.finetune,
        );
    }
    xc.porta.dir = if xc.period < xc.porta.target { 1 } else { -1 };
}

fn fine_volume_slide(xc: &mut ChannelState, amount: i32) {
    xc.flags.insert(FxFlags::FINE_VOLS);
    xc.vol.fslide = amount;
}

fn fine_porta(xc: &mut ChannelState, amount: i32) {
    if amount != 0 {
        xc.flags.insert(FxFlags::FINE_BEND);
        xc.freq.fslide = amount as f64;
    }
}

/// Extra-fine portamento: `1y` up, `2y` down, in quarter steps.
fn extra_fine_porta(xc: &mut ChannelState, p: u8) {
    xc.flags.insert(FxFlags::FINE_BEND);
    match msn(p) {
        1 => xc.freq.fslide = -0.25 * lsn(p) as f64,
        2 => xc.freq.fslide = 0.25 * lsn(p) as f64,
        _ => {}
    }
}

/// Up/down volume slide shared by `Axy`, `5xy` and `6xy`.
fn volume_slide(dialect: &Dialect, xc: &mut ChannelState, mut p: u8) {
    let finefx = dialect.has(Quirks::FINEFX);
    loop {
        if finefx {
            let (h, l) = (msn(p), lsn(p));
            if l == 0xf && h != 0 {
                xc.vol.memory = p;
                fine_volume_slide(xc, h as i32);
                return;
            } else if h == 0xf && l != 0 {
                xc.vol.memory = p;
                fine_volume_slide(xc, -(l as i32));
                return;
            }
        }
        if p == 0 && xc.vol.memory != 0 {
            p = xc.vol.memory;
            continue;
        }
        break;
    }

    xc.flags.insert(FxFlags::VOL_SLIDE);
    // A zero parameter keeps the old slide and the memory
    if p != 0 {
        xc.vol.memory = p;
        let (h, l) = (msn(p) as i32, lsn(p) as i32);
        xc.vol.slide = if dialect.has(Quirks::VOLPDN) {
            if l != 0 { -l } else { h }
        } else if h != 0 {
            h
        } else {
            -l
        };
    }

    // D0F and DF0 slide on every tick including the first
    if finefx && (msn(xc.vol.memory) == 0xf || lsn(xc.vol.memory) == 0xf) {
        xc.flags.insert(FxFlags::FINE_VOLS);
        xc.vol.fslide = xc.vol.slide;
    }
}

fn global_volume_slide(dialect: &Dialect, xc: &mut ChannelState, mut p: u8) {
    if p == 0 {
        p = xc.gvol.memory;
        if p == 0 {
            return;
        }
    }
    xc.flags.insert(FxFlags::GVOL_SLIDE);
    xc.gvol.memory = p;
    let (h, l) = (msn(p) as i32, lsn(p) as i32);
    if dialect.has(Quirks::FINEFX) && l == 0xf && h != 0 {
        xc.gvol.slide = 0;
        xc.gvol.fslide = h;
    } else if dialect.has(Quirks::FINEFX) && h == 0xf && l != 0 {
        xc.gvol.slide = 0;
        xc.gvol.fslide = -l;
    } else {
        xc.gvol.slide = if h != 0 { h } else { -l };
        xc.gvol.fslide = 0;
    }
}

fn track_volume_slide(dialect: &Dialect, xc: &mut ChannelState, mut p: u8) {
    if p == 0 {
        p = xc.trackvol.memory;
        if p == 0 {
            return;
        }
    }
    let (h, l) = (msn(p), lsn(p));
    if dialect.has(Quirks::FINEFX) {
        if h == 0xf && l != 0 {
            xc.trackvol.memory = p;
            track_fine_volume_slide(xc, p & 0x0f);
            return;
        } else if l == 0xf && h != 0 {
            xc.trackvol.memory = p;
            track_fine_volume_slide(xc, p & 0xf0);
            return;
        }
    }

    xc.flags.insert(FxFlags::TRK_VSLIDE);
    xc.trackvol.memory = p;
    let (h, l) = (h as i32, l as i32);
    xc.trackvol.slide = if dialect.has(Quirks::VOLPDN) {
        if l != 0 { -l } else { h }
    } else if h != 0 {
        h
    } else {
        -l
    };
}

fn track_fine_volume_slide(xc: &mut ChannelState, p: u8) {
    xc.flags.insert(FxFlags::TRK_FVSLIDE);
    if p != 0 {
        xc.trackvol.fslide = msn(p) as i32 - lsn(p) as i32;
    }
}

impl Sequencer {
    /// Apply the primary or the `secondary` (volume column) effect of
    /// `ev` to channel `chn`.
    pub(crate) fn process_fx(&mut self, module: &Module, chn: usize, ev: &Event, secondary: bool) {
        let dialect = self.dialect;
        let policy = dialect.memory;
        let note = ev.note;
        let fx = if secondary { ev.effect2 } else { ev.effect };

        let xc = &mut self.channels[chn];
        if !dialect.is_it() {
            xc.key_porta = xc.key;
        }

        match fx {
            Effect::None => {}

            Effect::Arpeggio(p) => {
                if !dialect.has(Quirks::ARPMEM) || p != 0 {
                    xc.arpeggio.set(msn(p), lsn(p));
                }
            }
            Effect::S3mArpeggio(p) => {
                let p = xc.recall(policy, EffectMemory::Arpeggio, p);
                if !dialect.has(Quirks::ARPMEM) || p != 0 {
                    xc.arpeggio.set(msn(p), lsn(p));
                }
            }

            Effect::PortaUp(p) => {
                let p = xc.recall(policy, EffectMemory::Pitch, p);
                if dialect.has(Quirks::FINEFX) && (!secondary || !dialect.has(Quirks::ITVPOR)) {
                    match msn(p) {
                        0xf => return fine_porta(xc, -(lsn(p) as i32)),
                        0xe => return extra_fine_porta(xc, lsn(p) | 0x10),
                        _ => {}
                    }
                }
                xc.flags.insert(FxFlags::PITCHBEND);
                if p != 0 {
                    xc.freq.slide = -(p as f64);
                    if dialect.has(Quirks::UNISLD) {
                        xc.porta.memory = p;
                    }
                } else if xc.freq.slide > 0.0 {
                    xc.freq.slide = -xc.freq.slide;
                }
            }
            Effect::PortaDown(p) => {
                let p = xc.recall(policy, EffectMemory::Pitch, p);
                if dialect.has(Quirks::FINEFX) && (!secondary || !dialect.has(Quirks::ITVPOR)) {
                    match msn(p) {
                        0xf => return fine_porta(xc, lsn(p) as i32),
                        0xe => return extra_fine_porta(xc, lsn(p) | 0x20),
                        _ => {}
                    }
                }
                xc.flags.insert(FxFlags::PITCHBEND);
                if p != 0 {
                    xc.freq.slide = p as f64;
                    if dialect.has(Quirks::UNISLD) {
                        xc.porta.memory = p;
                    }
                } else if xc.freq.slide < 0.0 {
                    xc.freq.slide = -xc.freq.slide;
                }
            }
            Effect::TonePorta(p) => {
                let p = xc.recall_keep(policy, EffectMemory::TonePorta, p);
                if p != 0 {
                    // Gxx and Exx/Fxx share memory in IT compatible mode
                    if dialect.has(Quirks::UNISLD) {
                        xc.freq.memory = p;
                    }
                    xc.porta.slide = p as i32;
                }
                if dialect.has(Quirks::IGSTPOR) && note == Note::None && xc.porta.dir == 0 {
                    return;
                }
                if valid_instrument(module, xc.ins).is_none() {
                    return;
                }
                do_toneporta(module, &dialect, xc, note);
                xc.flags.insert(FxFlags::TONEPORTA);
            }

            Effect::Vibrato(p) => {
                let p = xc.recall_keep(policy, EffectMemory::Vibrato, p);
                xc.flags.insert(FxFlags::VIBRATO);
                set_lfo_nonzero(&mut xc.vibrato.lfo, (lsn(p) as i32) << 2, msn(p));
            }
            Effect::FineVibrato(p) => {
                let p = xc.recall_keep(policy, EffectMemory::Vibrato, p);
                xc.flags.insert(FxFlags::VIBRATO);
                set_lfo_nonzero(&mut xc.vibrato.lfo, lsn(p) as i32, msn(p));
            }
            Effect::TonePortaVolSlide(p) => {
                if valid_instrument(module, xc.ins).is_none() {
                    return;
                }
                do_toneporta(module, &dialect, xc, note);
                xc.flags.insert(FxFlags::TONEPORTA);
                volume_slide(&dialect, xc, p);
            }
            Effect::VibratoVolSlide(p) => {
                xc.flags.insert(FxFlags::VIBRATO);
                volume_slide(&dialect, xc, p);
            }
            Effect::Tremolo(p) => {
                let p = xc.recall(policy, EffectMemory::Tremolo, p);
                xc.flags.insert(FxFlags::TREMOLO);
                set_lfo_nonzero(&mut xc.tremolo.lfo, lsn(p) as i32, msn(p));
            }

            Effect::SetPan(p) => {
                if !dialect.has(Quirks::PROTRACK) {
                    set_pan(&dialect, xc, ev, secondary, p);
                }
            }
            Effect::SampleOffset(p) => {
                let p = xc.recall(policy, EffectMemory::Offset, p) as u32;
                xc.flags.insert(FxFlags::OFFSET);
                if note != Note::None {
                    xc.offset.val = (xc.offset.val & !0xffff) | (p << 8);
                    xc.offset.val2 = p << 8;
                }
                if ev.instrument != 0 {
                    xc.offset.val2 = p << 8;
                }
            }
            Effect::HighOffset(p) => {
                xc.offset.val = (xc.offset.val & 0xffff) | ((p as u32) << 16);
            }

            Effect::VolumeSlide(p) => volume_slide(&dialect, xc, p),
            Effect::VolumeSlide2(p) => {
                xc.flags.insert(FxFlags::VOL_SLIDE_2);
                if p != 0 {
                    let (h, l) = (msn(p) as i32, lsn(p) as i32);
                    xc.vol.slide2 = if h != 0 { h } else { -l };
                }
            }
            // The volume column slides share one register, apart from Dxy
            Effect::VolumeSlideUp2(p) => {
                let p = xc.recall(policy, EffectMemory::VolumeColumn, p);
                xc.flags.insert(FxFlags::VOL_SLIDE_2);
                xc.vol.slide2 = p as i32;
            }
            Effect::VolumeSlideDown2(p) => {
                let p = xc.recall(policy, EffectMemory::VolumeColumn, p);
                xc.flags.insert(FxFlags::VOL_SLIDE_2);
                xc.vol.slide2 = -(p as i32);
            }
            Effect::FineVolumeSlideUp2(p) => {
                let p = xc.recall(policy, EffectMemory::VolumeColumn, p);
                xc.flags.insert(FxFlags::FINE_VOLS_2);
                xc.vol.fslide2 = p as i32;
            }
            Effect::FineVolumeSlideDown2(p) => {
                let p = xc.recall(policy, EffectMemory::VolumeColumn, p);
                xc.flags.insert(FxFlags::FINE_VOLS_2);
                xc.vol.fslide2 = -(p as i32);
            }
            Effect::FineVolumeSlideUp(p) => {
                let p = xc.recall(policy, EffectMemory::FineVolumeUp, p);
                fine_volume_slide(xc, p as i32);
            }
            Effect::FineVolumeSlideDown(p) => {
                // Shares the up register
                let p = xc.recall(policy, EffectMemory::FineVolumeUp, p);
                fine_volume_slide(xc, -(p as i32));
            }
            Effect::SetVolume(p) => {
                xc.flags.insert(FxFlags::NEW_VOL);
                xc.volume = p as i32;
            }

            Effect::FinePortaUp(p) => fine_porta(xc, -(p as i32)),
            Effect::FinePortaDown(p) => fine_porta(xc, p as i32),
            Effect::ExtraFinePorta(p) => extra_fine_porta(xc, p),
            Effect::SetFinetune(p) => xc.finetune = p as i32 - 0x80,

            Effect::PositionJump(p) => {
                self.flow.pbreak = true;
                self.flow.jump = Some(p as usize);
                // Overrides a break of a lower channel
                self.flow.jumpline = 0;
            }
            Effect::PatternBreak(p) => {
                self.flow.pbreak = true;
                self.flow.jumpline = 10 * msn(p) as usize + lsn(p) as usize;
            }
            Effect::ItPatternBreak(p) => {
                if self.flow.loop_chn == 0 {
                    self.flow.pbreak = true;
                    self.flow.jumpline = p as usize;
                }
            }
            Effect::PatternDelay(p) => self.pattern_delay(p),

            Effect::SetSpeed(p) => {
                if dialect.has(Quirks::NOBPM)
                    || self.settings.flags.contains(PlayerFlags::VBLANK)
                    || p < 0x20
                {
                    self.set_speed(p);
                } else {
                    self.set_bpm(module, p);
                }
            }
            Effect::S3mSpeed(p) => {
                let p = xc.recall_st3(policy, p);
                self.set_speed(p);
            }
            Effect::S3mTempo(p) => self.set_bpm(module, p),
            Effect::ItTempo(p) => {
                match msn(p) {
                    0 => {
                        // T00 repeats the previous slide
                        xc.flags.insert(FxFlags::TEMPO_SLIDE);
                        if lsn(p) != 0 {
                            xc.tempo_slide = -(lsn(p) as i32);
                        }
                    }
                    1 => {
                        xc.flags.insert(FxFlags::TEMPO_SLIDE);
                        xc.tempo_slide = lsn(p) as i32;
                    }
                    _ => self.clock.bpm = (p as u32).max(MIN_BPM),
                }
                self.clock.update_frame_time(module);
            }
            Effect::ItRowDelay(p) => {
                if self.flow.rowdelay_set.is_empty() {
                    self.flow.rowdelay = p as u32;
                    self.flow.rowdelay_set = RowDelay::ON | RowDelay::FIRST_FRAME;
                }
            }

            Effect::Extended(p) => {
                let p = xc.recall_st3(policy, p);
                self.process_extended(chn, ev, secondary, ExtendedCommand::decode(p));
            }

            Effect::SetGlobalVolume(p) => {
                self.clock.gvol = (p as i32).min(module.global_volume_base as i32);
            }
            Effect::GlobalVolumeSlide(p) => global_volume_slide(&dialect, xc, p),
            Effect::KeyOff(p) => xc.keyoff = p as u32 + 1,
            Effect::EnvelopePosition(p) => {
                let pos = p as i32;
                let instrument = xc.ins.and_then(|i| module.instruments.get(i));
                // FT2 only moves the pan envelope when the volume
                // envelope has a sustain point
                let pan = !dialect.has(Quirks::FT2BUGS)
                    || instrument.is_some_and(|i| i.volume_envelope.sustain.is_some());
                if pan {
                    xc.p_env.set(pos);
                }
                xc.v_env.set(pos);
                xc.f_env.set(pos);
            }

            Effect::PanSlide(p) => {
                let p = xc.recall(policy, EffectMemory::PanSlide, p);
                xc.flags.insert(FxFlags::PAN_SLIDE);
                xc.pan.slide = lsn(p) as i32 - msn(p) as i32;
            }
            Effect::PanSlideNoMemory(p) => {
                xc.flags.insert(FxFlags::PAN_SLIDE);
                xc.pan.slide = lsn(p) as i32 - msn(p) as i32;
            }
            Effect::ItPanSlide(p) => {
                xc.flags.insert(FxFlags::PAN_SLIDE);
                if p != 0 {
                    if msn(p) == 0xf {
                        xc.pan.slide = 0;
                        xc.pan.fslide = lsn(p) as i32;
                    } else if lsn(p) == 0xf {
                        xc.pan.slide = 0;
                        xc.pan.fslide = -(msn(p) as i32);
                    } else {
                        xc.pan.slide = lsn(p) as i32 - msn(p) as i32;
                        xc.pan.fslide = 0;
                    }
                }
            }
            Effect::Panbrello(p) => {
                xc.flags.insert(FxFlags::PANBRELLO);
                set_lfo_nonzero(&mut xc.panbrello.lfo, (lsn(p) as i32) << 4, msn(p));
            }
            Effect::PanbrelloWaveform(p) => xc.panbrello.lfo.set_waveform(p & 3),
            Effect::Surround(p) => xc.pan.surround = p != 0,

            Effect::MultiRetrig(p) => {
                let p = xc.recall_st3(policy, p);
                if p != 0 {
                    xc.retrig.val = p;
                    xc.retrig.kind = msn(p);
                }
                if note != Note::None {
                    xc.retrig.count = lsn(xc.retrig.val) as i32 + 1;
                }
                xc.retrig.limit = 0;
                xc.flags.insert(FxFlags::RETRIG);
            }
            Effect::Tremor(p) => {
                let p = xc.recall(policy, EffectMemory::Tremor, p);
                xc.tremor.up = msn(p) as i32;
                xc.tremor.down = lsn(p) as i32;
                match dialect.tremor {
                    TremorPolicy::Ft2 => xc.tremor.count |= 0x80,
                    TremorPolicy::S3m => {
                        xc.tremor.up = xc.tremor.up.max(1);
                        xc.tremor.down = xc.tremor.down.max(1);
                    }
                }
                xc.flags.insert(FxFlags::TREMOR);
            }

            Effect::Reverse(p) => self.voices.reverse(chn, p != 0),
            Effect::TrackVolume(p) => {
                if p <= module.volume_base {
                    xc.mastervol = p as i32;
                }
            }
            Effect::TrackVolumeSlide(p) => track_volume_slide(&dialect, xc, p),
            Effect::TrackFineVolumeSlide(p) => track_fine_volume_slide(xc, p),

            Effect::InstrumentFunction(p) => match p {
                0 => self.past_note(chn, PastNote::Cut),
                1 => self.past_note(chn, PastNote::Off),
                2 => self.past_note(chn, PastNote::Fade),
                3 => self.voices.set_nna(chn, NewNoteAction::Cut),
                4 => self.voices.set_nna(chn, NewNoteAction::Continue),
                5 => self.voices.set_nna(chn, NewNoteAction::Off),
                6 => self.voices.set_nna(chn, NewNoteAction::Fade),
                7 => xc.per_flags.insert(PersistentFlags::VENV_PAUSE),
                8 => xc.per_flags.remove(PersistentFlags::VENV_PAUSE),
                9 => xc.per_flags.insert(PersistentFlags::PENV_PAUSE),
                0xa => xc.per_flags.remove(PersistentFlags::PENV_PAUSE),
                0xb => xc.per_flags.insert(PersistentFlags::FENV_PAUSE),
                0xc => xc.per_flags.remove(PersistentFlags::FENV_PAUSE),
                _ => {}
            },
            Effect::FilterCutoff(p) => xc.filter.cutoff = p as i32,
            Effect::FilterResonance(p) => xc.filter.resonance = p as i32,

            Effect::MacroSelect(p) => xc.macro_state.active = lsn(p),
            Effect::Macro(p) => {
                xc.flags.insert(FxFlags::MIDI_MACRO);
                xc.macro_state.val = p as f32;
                xc.macro_state.slide = 0.0;
            }
            Effect::SmoothMacro(p) => {
                let speed = self.clock.speed;
                if speed != 0 && xc.macro_state.val < 128.0 {
                    xc.flags.insert(FxFlags::MIDI_MACRO);
                    xc.macro_state.target = p as f32;
                    xc.macro_state.slide = (p as f32 - xc.macro_state.val) / speed as f32;
                }
            }
        }
    }

    /// `Exy` / `Sxy` sub-commands.
    fn process_extended(&mut self, chn: usize, ev: &Event, secondary: bool, cmd: ExtendedCommand) {
        let dialect = self.dialect;
        let policy = dialect.memory;
        let row = self.clock.row;
        let xc = &mut self.channels[chn];

        match cmd {
            // Amiga LED filter and invert loop act on hardware or sample
            // memory that playback never touches
            ExtendedCommand::Filter(_) | ExtendedCommand::InvertLoop(_) => {}
            ExtendedCommand::FinePortaUp(p) => {
                let p = xc.recall(policy, EffectMemory::FinePortaUp, p);
                fine_porta(xc, -(p as i32));
            }
            ExtendedCommand::FinePortaDown(p) => {
                let p = xc.recall(policy, EffectMemory::FinePortaDown, p);
                fine_porta(xc, p as i32);
            }
            ExtendedCommand::Glissando(p) => xc.note_flags.set(NoteFlags::GLISSANDO, p != 0),
            ExtendedCommand::VibratoWaveform(p) => xc.vibrato.lfo.set_waveform(p & 3),
            ExtendedCommand::Finetune(p) => {
                if !dialect.has(Quirks::FT2BUGS) || ev.note != Note::None {
                    xc.finetune = (p << 4) as i8 as i32;
                }
            }
            ExtendedCommand::PatternLoop(p) => {
                let Some(lp) = self.flow.loops.get_mut(chn) else { return };
                if p == 0 {
                    lp.start = row;
                    // FT2 also breaks to the loop start in the next pattern
                    if dialect.has(Quirks::FT2BUGS) {
                        self.flow.jumpline = row;
                    }
                } else if lp.count != 0 {
                    lp.count -= 1;
                    if lp.count != 0 {
                        self.flow.loop_chn = chn + 1;
                    } else if dialect.has(Quirks::S3MLOOP) {
                        lp.start = row + 1;
                    }
                } else {
                    lp.count = p as u32;
                    self.flow.loop_chn = chn + 1;
                }
            }
            ExtendedCommand::TremoloWaveform(p) => xc.tremolo.lfo.set_waveform(p & 3),
            ExtendedCommand::SetPan(p) => set_pan(&dialect, xc, ev, secondary, p << 4),
            ExtendedCommand::Retrig(p) => {
                xc.flags.insert(FxFlags::RETRIG);
                xc.retrig.val = p;
                xc.retrig.count = lsn(p) as i32 + 1;
                xc.retrig.kind = 0;
                xc.retrig.limit = 0;
            }
            ExtendedCommand::FineVolumeUp(p) => {
                let p = xc.recall(policy, EffectMemory::FineVolumeUp, p);
                fine_volume_slide(xc, p as i32);
            }
            ExtendedCommand::FineVolumeDown(p) => {
                let p = xc.recall(policy, EffectMemory::FineVolumeDown, p);
                fine_volume_slide(xc, -(p as i32));
            }
            ExtendedCommand::NoteCut(p) => {
                xc.flags.insert(FxFlags::RETRIG);
                // Remembered for IT cut carry
                xc.note_flags.insert(NoteFlags::CUT);
                xc.retrig.val = p + 1;
                xc.retrig.count = xc.retrig.val as i32;
                xc.retrig.kind = 0x10;
            }
            // Handled when the row is read
            ExtendedCommand::NoteDelay(_) => {}
            ExtendedCommand::PatternDelay(p) => self.pattern_delay(p),
        }
    }

    /// ST3 keeps the first pattern delay of a row.
    fn pattern_delay(&mut self, p: u8) {
        if !self.dialect.is_st3() || self.flow.delay == 0 {
            self.flow.delay = p as u32;
        }
    }

    fn set_speed(&mut self, p: u8) {
        if p != 0 {
            self.clock.speed = p as u32;
        }
    }

    fn set_bpm(&mut self, module: &Module, p: u8) {
        self.clock.bpm = (p as u32).max(min_bpm(module));
        self.clock.update_frame_time(module);
    }

    /// Cut, release or fade the background notes triggered by `chn`.
    fn past_note(&mut self, chn: usize, action: PastNote) {
        let background: heapless::Vec<usize, MAX_VOICES> = self.voices.background_of(chn).collect();
        for c in background {
            match action {
                PastNote::Cut => self.voices.reset_channel(c),
                PastNote::Off => {
                    if let Some(xc) = self.channels.get_mut(c) {
                        xc.note_flags.insert(NoteFlags::RELEASE);
                    }
                }
                PastNote::Fade => {
                    if let Some(xc) = self.channels.get_mut(c) {
                        xc.note_flags.insert(NoteFlags::FADEOUT);
                    }
                }
            }
        }
    }
}

/// Set pan, except that FT2 ignores volume column panning on a delayed
/// key off.
fn set_pan(dialect: &Dialect, xc: &mut ChannelState, ev: &Event, secondary: bool, p: u8) {
    let delayed_off = dialect.has(Quirks::FT2BUGS)
        && secondary
        && ev.note == Note::Off
        && matches!(ev.effect, Effect::Extended(e) if msn(e) == 0xd);
    if !delayed_off {
        xc.pan.val = p as i32;
    }
    // Explicit pan overrides the random pan swing
    xc.rpv = 0;
    xc.pan.surround = false;
}
