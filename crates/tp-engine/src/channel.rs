//! Channel state for tracker playback.
//!
//! One [`ChannelState`] exists per virtual channel: the first
//! `num_channels` are the module's tracks, the rest are background
//! channels holding notes displaced by a new-note action.

use bitflags::bitflags;
use tp_ir::{Event, MAX_KEY};

use crate::dialect::EffectMemoryPolicy;
use crate::envelope_state::EnvelopeCursor;
use crate::lfo::Lfo;

bitflags! {
    /// Effects armed by the current row. Cleared whenever a new event is
    /// read on the channel.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FxFlags: u32 {
        const VOL_SLIDE   = 1 << 0;
        const PAN_SLIDE   = 1 << 1;
        const TONEPORTA   = 1 << 2;
        const PITCHBEND   = 1 << 3;
        const VIBRATO     = 1 << 4;
        const TREMOLO     = 1 << 5;
        const FINE_VOLS   = 1 << 6;
        const FINE_BEND   = 1 << 7;
        const OFFSET      = 1 << 8;
        const TRK_VSLIDE  = 1 << 9;
        const TRK_FVSLIDE = 1 << 10;
        const NEW_INS     = 1 << 11;
        const NEW_VOL     = 1 << 12;
        const VOL_SLIDE_2 = 1 << 13;
        const NEW_NOTE    = 1 << 16;
        const FINE_VOLS_2 = 1 << 17;
        const KEY_OFF     = 1 << 18;
        const TREMOR      = 1 << 19;
        const MIDI_MACRO  = 1 << 20;
        const RETRIG      = 1 << 21;
        const PANBRELLO   = 1 << 22;
        const GVOL_SLIDE  = 1 << 23;
        const TEMPO_SLIDE = 1 << 24;
    }
}

bitflags! {
    /// Flags that survive across rows until an instrument resets them.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PersistentFlags: u8 {
        /// Volume envelope paused (S77)
        const VENV_PAUSE = 1 << 0;
        /// Pan envelope paused (S79)
        const PENV_PAUSE = 1 << 1;
        /// Pitch/filter envelope paused (S7B)
        const FENV_PAUSE = 1 << 2;
    }
}

bitflags! {
    /// Lifecycle of the note playing on a channel.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct NoteFlags: u16 {
        const FADEOUT        = 1 << 0;
        const ENV_RELEASE    = 1 << 1;
        const END            = 1 << 2;
        const CUT            = 1 << 3;
        const ENV_END        = 1 << 4;
        const SAMPLE_END     = 1 << 5;
        /// A note or key command was seen since the last instrument change
        const SET            = 1 << 6;
        /// Released on the sustain point; becomes a release next frame
        const SUSEXIT        = 1 << 7;
        const KEY_CUT        = 1 << 8;
        const GLISSANDO      = 1 << 9;
        const SAMPLE_RELEASE = 1 << 10;
        const RELEASE = Self::ENV_RELEASE.bits() | Self::SAMPLE_RELEASE.bits();
    }
}

/// Full fadeout level.
pub const FADEOUT_MAX: i32 = 0x10000;

/// Effect parameter memory registers.
///
/// Each variant names one register. Which effects share a register is
/// decided by the effect processor; under [`EffectMemoryPolicy::St3Shared`]
/// most of them collapse onto [`EffectMemory::Volume`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectMemory {
    /// Volume slide; also the ST3 shared register
    Volume,
    /// Volume column slides (IT), never shared with the effect column
    VolumeColumn,
    /// Portamento up/down
    Pitch,
    /// Tone portamento
    TonePorta,
    Vibrato,
    Tremolo,
    Offset,
    /// S3M/IT arpeggio (Jxy)
    Arpeggio,
    FinePortaUp,
    FinePortaDown,
    FineVolumeUp,
    FineVolumeDown,
    Tremor,
    PanSlide,
}

/// Apply "zero recalls, nonzero stores" to one register.
#[inline]
fn remember(param: u8, register: &mut u8) -> u8 {
    if param == 0 {
        *register
    } else {
        *register = param;
        param
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VolumeSlide {
    pub slide: i32,
    pub fslide: i32,
    pub slide2: i32,
    pub fslide2: i32,
    pub memory: u8,
    pub memory2: u8,
}

/// Slide pair used by track and global volume.
#[derive(Clone, Copy, Debug, Default)]
pub struct Slide {
    pub slide: i32,
    pub fslide: i32,
    pub memory: u8,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PitchSlide {
    /// Period delta per tick
    pub slide: f64,
    /// Period delta on the first tick
    pub fslide: f64,
    pub memory: u8,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UpDownMemory {
    pub up: u8,
    pub down: u8,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Portamento {
    /// Target period, or negative for none
    pub target: f64,
    /// +1 sliding up in period, -1 down, 0 idle
    pub dir: i32,
    pub slide: i32,
    pub memory: u8,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Panning {
    /// Pan position 0-255
    pub val: i32,
    pub slide: i32,
    pub fslide: i32,
    pub memory: u8,
    pub surround: bool,
}

/// An effect-driven oscillator with its parameter memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct Modulator {
    pub lfo: Lfo,
    pub memory: u8,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AutoVibratoState {
    pub lfo: Lfo,
    pub sweep: i32,
}

/// Maximum arpeggio table length.
pub const ARPEGGIO_SIZE: usize = 16;

#[derive(Clone, Copy, Debug)]
pub struct Arpeggio {
    pub val: [i8; ARPEGGIO_SIZE],
    pub size: u8,
    pub count: u8,
    pub memory: u8,
}

impl Default for Arpeggio {
    fn default() -> Self {
        Self { val: [0; ARPEGGIO_SIZE], size: 1, count: 0, memory: 0 }
    }
}

impl Arpeggio {
    /// Load a three-step table (0, x, y).
    pub fn set(&mut self, x: u8, y: u8) {
        self.val[0] = 0;
        self.val[1] = x as i8;
        self.val[2] = y as i8;
        self.size = 3;
    }

    /// Back to the single-entry table, restarted.
    pub fn reset(&mut self) {
        self.val[0] = 0;
        self.count = 0;
        self.size = 1;
    }

    /// Current offset in semitones.
    pub fn current(&self) -> i32 {
        self.val[self.count as usize % ARPEGGIO_SIZE] as i32
    }

    pub fn step(&mut self) {
        self.count = (self.count + 1) % self.size.max(1);
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Retrig {
    pub val: u8,
    pub count: i32,
    /// Volume change selector; 0x10 means "cut"
    pub kind: u8,
    pub limit: i32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Tremor {
    pub up: i32,
    pub down: i32,
    pub count: i32,
    pub memory: u8,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SampleOffset {
    pub val: u32,
    pub val2: u32,
    pub memory: u8,
}

#[derive(Clone, Copy, Debug)]
pub struct FilterSettings {
    pub cutoff: i32,
    pub resonance: i32,
    /// Filter envelope scale, 0x100 = unity
    pub envelope: i32,
    /// A fresh note may switch the filter off entirely
    pub can_disable: bool,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self { cutoff: 0xff, resonance: 0, envelope: 0x100, can_disable: false }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MacroState {
    pub val: f32,
    pub target: f32,
    pub slide: f32,
    pub active: u8,
    pub finalvol: i32,
    pub notepan: i32,
}

/// Values reported through the frame snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChannelReport {
    pub period: i32,
    pub pitchbend: i32,
    pub position: i32,
    pub finalvol: i32,
    pub finalpan: i32,
}

/// Playback state of one virtual channel.
#[derive(Clone, Debug)]
pub struct ChannelState {
    pub flags: FxFlags,
    pub per_flags: PersistentFlags,
    pub note_flags: NoteFlags,

    /// Mapped note (key plus transposes)
    pub note: i32,
    /// Key as written in the pattern, -1 for none
    pub key: i32,
    /// Key used for the tone portamento transpose lookup
    pub key_porta: i32,
    /// Current period
    pub period: f64,
    /// Finetune in 1/128 semitone
    pub finetune: i32,

    /// Current instrument
    pub ins: Option<usize>,
    /// Last instrument number seen in the pattern (1-based)
    pub old_ins: u8,
    /// Instrument latched for the IT "always read instrument" emulation
    pub delayed_ins: u8,
    /// Current sample
    pub smp: Option<usize>,

    // === Volume ===
    /// Note volume (0..volume base)
    pub volume: i32,
    /// Track (channel) volume
    pub mastervol: i32,
    /// Subinstrument global volume
    pub gvl: i32,
    /// Fadeout level, 0..=FADEOUT_MAX
    pub fadeout: i32,
    /// Fadeout decrement per tick
    pub ins_fade: i32,
    /// Random volume swing in percent
    pub rvv: i32,
    /// Random pan swing
    pub rpv: i32,

    /// Ticks until the delayed event is read, 0 when idle
    pub delay: u32,
    pub delayed_event: Event,
    /// Ticks until a Kxx key-off fires
    pub keyoff: u32,

    pub v_env: EnvelopeCursor,
    pub p_env: EnvelopeCursor,
    pub f_env: EnvelopeCursor,

    pub vol: VolumeSlide,
    pub trackvol: Slide,
    pub gvol: Slide,
    pub freq: PitchSlide,
    pub fine_porta: UpDownMemory,
    pub fine_vol: UpDownMemory,
    pub porta: Portamento,
    pub pan: Panning,
    pub vibrato: Modulator,
    pub tremolo: Modulator,
    pub panbrello: Modulator,
    pub insvib: AutoVibratoState,
    pub arpeggio: Arpeggio,
    pub retrig: Retrig,
    pub tremor: Tremor,
    pub offset: SampleOffset,
    /// IT tempo slide per tick
    pub tempo_slide: i32,
    pub filter: FilterSettings,
    pub macro_state: MacroState,

    pub report: ChannelReport,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            flags: FxFlags::empty(),
            per_flags: PersistentFlags::empty(),
            note_flags: NoteFlags::empty(),
            note: 0,
            key: -1,
            key_porta: 0,
            period: 0.0,
            finetune: 0,
            ins: None,
            old_ins: 1,
            delayed_ins: 0,
            smp: None,
            volume: 0,
            mastervol: 0,
            gvl: 0,
            fadeout: 0,
            ins_fade: 0,
            rvv: 0,
            rpv: 0,
            delay: 0,
            delayed_event: Event::empty(),
            keyoff: 0,
            v_env: EnvelopeCursor::default(),
            p_env: EnvelopeCursor::default(),
            f_env: EnvelopeCursor::default(),
            vol: VolumeSlide::default(),
            trackvol: Slide::default(),
            gvol: Slide::default(),
            freq: PitchSlide::default(),
            fine_porta: UpDownMemory::default(),
            fine_vol: UpDownMemory::default(),
            porta: Portamento::default(),
            pan: Panning::default(),
            vibrato: Modulator::default(),
            tremolo: Modulator::default(),
            panbrello: Modulator::default(),
            insvib: AutoVibratoState::default(),
            arpeggio: Arpeggio::default(),
            retrig: Retrig::default(),
            tremor: Tremor::default(),
            offset: SampleOffset::default(),
            tempo_slide: 0,
            filter: FilterSettings { cutoff: 0, ..FilterSettings::default() },
            macro_state: MacroState::default(),
            report: ChannelReport::default(),
        }
    }
}

impl ChannelState {
    /// A freshly reset channel at the given note volume.
    pub fn new(volume: i32) -> Self {
        Self { volume, ..Self::default() }
    }

    /// Key as an index into an instrument key map.
    #[inline]
    pub fn key_index(&self) -> Option<usize> {
        valid_key(self.key)
    }

    fn register(&mut self, mem: EffectMemory) -> &mut u8 {
        match mem {
            EffectMemory::Volume => &mut self.vol.memory,
            EffectMemory::VolumeColumn => &mut self.vol.memory2,
            EffectMemory::Pitch => &mut self.freq.memory,
            EffectMemory::TonePorta => &mut self.porta.memory,
            EffectMemory::Vibrato => &mut self.vibrato.memory,
            EffectMemory::Tremolo => &mut self.tremolo.memory,
            EffectMemory::Offset => &mut self.offset.memory,
            EffectMemory::Arpeggio => &mut self.arpeggio.memory,
            EffectMemory::FinePortaUp => &mut self.fine_porta.up,
            EffectMemory::FinePortaDown => &mut self.fine_porta.down,
            EffectMemory::FineVolumeUp => &mut self.fine_vol.up,
            EffectMemory::FineVolumeDown => &mut self.fine_vol.down,
            EffectMemory::Tremor => &mut self.tremor.memory,
            EffectMemory::PanSlide => &mut self.pan.memory,
        }
    }

    /// Parameter recall for effects whose memory is replaced by the shared
    /// register in ST3 mode.
    pub fn recall(&mut self, policy: EffectMemoryPolicy, mem: EffectMemory, param: u8) -> u8 {
        match policy {
            EffectMemoryPolicy::St3Shared if mem != EffectMemory::VolumeColumn => {
                remember(param, &mut self.vol.memory)
            }
            _ => remember(param, self.register(mem)),
        }
    }

    /// Parameter recall for effects that keep their own register in every
    /// dialect; ST3 mode additionally mirrors nonzero values into the
    /// shared register.
    pub fn recall_keep(&mut self, policy: EffectMemoryPolicy, mem: EffectMemory, param: u8) -> u8 {
        let p = remember(param, self.register(mem));
        if policy == EffectMemoryPolicy::St3Shared && p != 0 {
            self.vol.memory = p;
        }
        p
    }

    /// Parameter recall for effects that only have memory in ST3 mode.
    pub fn recall_st3(&mut self, policy: EffectMemoryPolicy, param: u8) -> u8 {
        match policy {
            EffectMemoryPolicy::St3Shared => remember(param, &mut self.vol.memory),
            EffectMemoryPolicy::PerFamily => param,
        }
    }

    /// Rewind all three envelopes and clear the envelope-end state.
    pub fn reset_envelopes(&mut self) {
        self.note_flags.remove(NoteFlags::ENV_END);
        self.v_env.reset();
        self.p_env.reset();
        self.f_env.reset();
    }
}

/// Key as a key-map index, if it is a playable key.
#[inline]
pub fn valid_key(key: i32) -> Option<usize> {
    if (0..=MAX_KEY as i32).contains(&key) {
        Some(key as usize)
    } else {
        None
    }
}

#[inline]
pub fn msn(p: u8) -> u8 {
    p >> 4
}

#[inline]
pub fn lsn(p: u8) -> u8 {
    p & 0x0f
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_recalls_last_value() {
        let mut c = ChannelState::default();
        let policy = EffectMemoryPolicy::PerFamily;
        assert_eq!(c.recall(policy, EffectMemory::Volume, 0x20), 0x20);
        assert_eq!(c.recall(policy, EffectMemory::Volume, 0), 0x20);
        assert_eq!(c.recall(policy, EffectMemory::Pitch, 0), 0);
    }

    #[test]
    fn st3_registers_are_shared() {
        let mut c = ChannelState::default();
        let policy = EffectMemoryPolicy::St3Shared;
        c.recall(policy, EffectMemory::Pitch, 0x12);
        assert_eq!(c.recall(policy, EffectMemory::Tremolo, 0), 0x12);
        assert_eq!(c.recall_st3(policy, 0), 0x12);
        assert_eq!(c.recall_st3(EffectMemoryPolicy::PerFamily, 0), 0);
    }

    #[test]
    fn keep_mirrors_into_shared_register() {
        let mut c = ChannelState::default();
        c.recall_keep(EffectMemoryPolicy::St3Shared, EffectMemory::Vibrato, 0x44);
        assert_eq!(c.vibrato.memory, 0x44);
        assert_eq!(c.vol.memory, 0x44);

        let mut c = ChannelState::default();
        c.recall_keep(EffectMemoryPolicy::PerFamily, EffectMemory::Vibrato, 0x44);
        assert_eq!(c.vol.memory, 0);
    }

    #[test]
    fn arpeggio_cycles_through_table() {
        let mut a = Arpeggio::default();
        a.set(4, 7);
        let mut seen = [0; 6];
        for s in seen.iter_mut() {
            *s = a.current();
            a.step();
        }
        assert_eq!(seen, [0, 4, 7, 0, 4, 7]);
        a.reset();
        assert_eq!(a.size, 1);
        a.step();
        assert_eq!(a.current(), 0);
    }

    #[test]
    fn key_validity() {
        assert_eq!(valid_key(-1), None);
        assert_eq!(valid_key(60), Some(60));
        assert_eq!(valid_key(121), None);
    }

    #[test]
    fn release_covers_both_release_flags() {
        assert!(NoteFlags::RELEASE.contains(NoteFlags::ENV_RELEASE));
        assert!(NoteFlags::RELEASE.contains(NoteFlags::SAMPLE_RELEASE));
    }
}
