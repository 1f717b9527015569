//! Effect command types for tracker patterns.
//!
//! Parameters are kept as the raw byte the tracker stored. Many effects
//! treat a zero parameter as "recall the last value", so the engine needs
//! to see the byte before any decoding.

/// Effect command.
///
/// This enum covers effects from MOD, S3M, XM, and IT formats. Format
/// loaders translate their native commands into these variants; commands
/// with a format-specific meaning get their own variant even when the
/// letter is shared (e.g. [`Effect::SetSpeed`] vs [`Effect::S3mSpeed`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Effect {
    #[default]
    None,

    // === Arpeggio & Portamento ===
    /// Arpeggio: cycle between note, note+x, note+y each tick
    Arpeggio(u8),
    /// S3M/IT arpeggio (Jxy), remembers its parameter
    S3mArpeggio(u8),
    /// Slide pitch up by amount per tick
    PortaUp(u8),
    /// Slide pitch down by amount per tick
    PortaDown(u8),
    /// Slide toward target note
    TonePorta(u8),
    /// Vibrato: speed in the high nibble, depth in the low nibble
    Vibrato(u8),
    /// Fine vibrato (S3M/IT Uxy): a quarter of the regular depth
    FineVibrato(u8),
    /// Tone portamento + volume slide
    TonePortaVolSlide(u8),
    /// Vibrato + volume slide
    VibratoVolSlide(u8),
    /// Fine portamento up (first tick only)
    FinePortaUp(u8),
    /// Fine portamento down (first tick only)
    FinePortaDown(u8),
    /// XM extra fine portamento: X1y up, X2y down
    ExtraFinePorta(u8),
    /// Set finetune (0x80 = no detune)
    SetFinetune(u8),

    // === Volume ===
    /// Tremolo (volume oscillation)
    Tremolo(u8),
    /// Set channel volume (0-64)
    SetVolume(u8),
    /// Volume slide: up in the high nibble, down in the low nibble
    VolumeSlide(u8),
    /// Secondary volume slide with its own accumulator
    VolumeSlide2(u8),
    /// Volume column slide up
    VolumeSlideUp2(u8),
    /// Volume column slide down
    VolumeSlideDown2(u8),
    /// Volume column fine slide up
    FineVolumeSlideUp2(u8),
    /// Volume column fine slide down
    FineVolumeSlideDown2(u8),
    /// Fine volume slide up (first tick only)
    FineVolumeSlideUp(u8),
    /// Fine volume slide down (first tick only)
    FineVolumeSlideDown(u8),
    /// Tremor: on ticks in the high nibble, off ticks in the low nibble
    Tremor(u8),
    /// Retrigger with volume change (Rxy / Qxy)
    MultiRetrig(u8),
    /// Set global volume
    SetGlobalVolume(u8),
    /// Global volume slide
    GlobalVolumeSlide(u8),
    /// Set track (channel) volume
    TrackVolume(u8),
    /// Track volume slide
    TrackVolumeSlide(u8),
    /// Track fine volume slide (high nibble up, low nibble down)
    TrackFineVolumeSlide(u8),

    // === Panning ===
    /// Set channel panning (0-255)
    SetPan(u8),
    /// Pan slide with memory (high nibble left... low nibble right)
    PanSlide(u8),
    /// Pan slide without memory
    PanSlideNoMemory(u8),
    /// IT pan slide (Pxy) with fine variants
    ItPanSlide(u8),
    /// Panbrello (pan oscillation)
    Panbrello(u8),
    /// Select panbrello waveform
    PanbrelloWaveform(u8),
    /// Toggle surround
    Surround(u8),

    // === Sample ===
    /// Set sample offset (in 256-frame units)
    SampleOffset(u8),
    /// IT high offset (SAx): bits 16-23 of the next offset
    HighOffset(u8),
    /// Play sample backwards (S9F) or forwards (S9E)
    Reverse(u8),
    /// Key off after the given number of ticks
    KeyOff(u8),
    /// Set envelope position
    EnvelopePosition(u8),

    // === Flow control ===
    /// Jump to order position
    PositionJump(u8),
    /// Break to row in next pattern (BCD-encoded)
    PatternBreak(u8),
    /// IT pattern break (plain row number)
    ItPatternBreak(u8),
    /// Repeat the row for extra row-lengths
    PatternDelay(u8),
    /// Set speed below 0x20, BPM otherwise
    SetSpeed(u8),
    /// S3M/IT set speed (Axx)
    S3mSpeed(u8),
    /// S3M set tempo (Txx)
    S3mTempo(u8),
    /// IT set tempo with slides (T0x/T1x)
    ItTempo(u8),
    /// IT fine pattern delay (SEx used as tick delay)
    ItRowDelay(u8),

    // === Extended ===
    /// MOD/XM Exy and S3M/IT Sxy, decoded with [`ExtendedCommand`]
    Extended(u8),

    // === IT ===
    /// Past note actions, NNA selection, envelope pause/resume (S7x)
    InstrumentFunction(u8),
    /// Set filter cutoff (0-127)
    FilterCutoff(u8),
    /// Set filter resonance (0-127)
    FilterResonance(u8),
    /// Select the active parameterized macro (SFx)
    MacroSelect(u8),
    /// Run a MIDI macro (Zxx)
    Macro(u8),
    /// Smoothly interpolate a parameterized macro (\xx)
    SmoothMacro(u8),
}

/// Decoded sub-command of [`Effect::Extended`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtendedCommand {
    Filter(u8),
    FinePortaUp(u8),
    FinePortaDown(u8),
    Glissando(u8),
    VibratoWaveform(u8),
    Finetune(u8),
    PatternLoop(u8),
    TremoloWaveform(u8),
    SetPan(u8),
    Retrig(u8),
    FineVolumeUp(u8),
    FineVolumeDown(u8),
    NoteCut(u8),
    NoteDelay(u8),
    PatternDelay(u8),
    InvertLoop(u8),
}

impl ExtendedCommand {
    /// Split an extended effect byte into its sub-command.
    pub const fn decode(param: u8) -> Self {
        let y = param & 0x0f;
        match param >> 4 {
            0x0 => ExtendedCommand::Filter(y),
            0x1 => ExtendedCommand::FinePortaUp(y),
            0x2 => ExtendedCommand::FinePortaDown(y),
            0x3 => ExtendedCommand::Glissando(y),
            0x4 => ExtendedCommand::VibratoWaveform(y),
            0x5 => ExtendedCommand::Finetune(y),
            0x6 => ExtendedCommand::PatternLoop(y),
            0x7 => ExtendedCommand::TremoloWaveform(y),
            0x8 => ExtendedCommand::SetPan(y),
            0x9 => ExtendedCommand::Retrig(y),
            0xa => ExtendedCommand::FineVolumeUp(y),
            0xb => ExtendedCommand::FineVolumeDown(y),
            0xc => ExtendedCommand::NoteCut(y),
            0xd => ExtendedCommand::NoteDelay(y),
            0xe => ExtendedCommand::PatternDelay(y),
            _ => ExtendedCommand::InvertLoop(y),
        }
    }
}

impl Effect {
    /// Raw parameter byte (0 for [`Effect::None`]).
    pub const fn param(&self) -> u8 {
        match *self {
            Effect::None => 0,
            Effect::Arpeggio(p)
            | Effect::S3mArpeggio(p)
            | Effect::PortaUp(p)
            | Effect::PortaDown(p)
            | Effect::TonePorta(p)
            | Effect::Vibrato(p)
            | Effect::FineVibrato(p)
            | Effect::TonePortaVolSlide(p)
            | Effect::VibratoVolSlide(p)
            | Effect::FinePortaUp(p)
            | Effect::FinePortaDown(p)
            | Effect::ExtraFinePorta(p)
            | Effect::SetFinetune(p)
            | Effect::Tremolo(p)
            | Effect::SetVolume(p)
            | Effect::VolumeSlide(p)
            | Effect::VolumeSlide2(p)
            | Effect::VolumeSlideUp2(p)
            | Effect::VolumeSlideDown2(p)
            | Effect::FineVolumeSlideUp2(p)
            | Effect::FineVolumeSlideDown2(p)
            | Effect::FineVolumeSlideUp(p)
            | Effect::FineVolumeSlideDown(p)
            | Effect::Tremor(p)
            | Effect::MultiRetrig(p)
            | Effect::SetGlobalVolume(p)
            | Effect::GlobalVolumeSlide(p)
            | Effect::TrackVolume(p)
            | Effect::TrackVolumeSlide(p)
            | Effect::TrackFineVolumeSlide(p)
            | Effect::SetPan(p)
            | Effect::PanSlide(p)
            | Effect::PanSlideNoMemory(p)
            | Effect::ItPanSlide(p)
            | Effect::Panbrello(p)
            | Effect::PanbrelloWaveform(p)
            | Effect::Surround(p)
            | Effect::SampleOffset(p)
            | Effect::HighOffset(p)
            | Effect::Reverse(p)
            | Effect::KeyOff(p)
            | Effect::EnvelopePosition(p)
            | Effect::PositionJump(p)
            | Effect::PatternBreak(p)
            | Effect::ItPatternBreak(p)
            | Effect::PatternDelay(p)
            | Effect::SetSpeed(p)
            | Effect::S3mSpeed(p)
            | Effect::S3mTempo(p)
            | Effect::ItTempo(p)
            | Effect::ItRowDelay(p)
            | Effect::Extended(p)
            | Effect::InstrumentFunction(p)
            | Effect::FilterCutoff(p)
            | Effect::FilterResonance(p)
            | Effect::MacroSelect(p)
            | Effect::Macro(p)
            | Effect::SmoothMacro(p) => p,
        }
    }

    /// Decoded extended sub-command, if this is an extended effect.
    pub const fn extended(&self) -> Option<ExtendedCommand> {
        match *self {
            Effect::Extended(p) => Some(ExtendedCommand::decode(p)),
            _ => None,
        }
    }

    /// Note delay ticks if this is an extended note-delay command with x > 0.
    pub const fn note_delay(&self) -> Option<u8> {
        match self.extended() {
            Some(ExtendedCommand::NoteDelay(x)) if x > 0 => Some(x),
            _ => None,
        }
    }

    /// Returns true for the effects that move the playhead between rows
    /// or orders.
    pub const fn is_flow_control(&self) -> bool {
        matches!(
            self,
            Effect::PositionJump(_)
                | Effect::PatternBreak(_)
                | Effect::ItPatternBreak(_)
                | Effect::PatternDelay(_)
                | Effect::ItRowDelay(_)
        ) || matches!(
            self.extended(),
            Some(ExtendedCommand::PatternLoop(_)) | Some(ExtendedCommand::PatternDelay(_))
        )
    }

    /// Returns the variant name as a static string (ignoring parameters).
    pub fn name(&self) -> &'static str {
        match self {
            Effect::None => "None",
            Effect::Arpeggio(_) => "Arpeggio",
            Effect::S3mArpeggio(_) => "S3mArpeggio",
            Effect::PortaUp(_) => "PortaUp",
            Effect::PortaDown(_) => "PortaDown",
            Effect::TonePorta(_) => "TonePorta",
            Effect::Vibrato(_) => "Vibrato",
            Effect::FineVibrato(_) => "FineVibrato",
            Effect::TonePortaVolSlide(_) => "TonePortaVolSlide",
            Effect::VibratoVolSlide(_) => "VibratoVolSlide",
            Effect::FinePortaUp(_) => "FinePortaUp",
            Effect::FinePortaDown(_) => "FinePortaDown",
            Effect::ExtraFinePorta(_) => "ExtraFinePorta",
            Effect::SetFinetune(_) => "SetFinetune",
            Effect::Tremolo(_) => "Tremolo",
            Effect::SetVolume(_) => "SetVolume",
            Effect::VolumeSlide(_) => "VolumeSlide",
            Effect::VolumeSlide2(_) => "VolumeSlide2",
            Effect::VolumeSlideUp2(_) => "VolumeSlideUp2",
            Effect::VolumeSlideDown2(_) => "VolumeSlideDown2",
            Effect::FineVolumeSlideUp2(_) => "FineVolumeSlideUp2",
            Effect::FineVolumeSlideDown2(_) => "FineVolumeSlideDown2",
            Effect::FineVolumeSlideUp(_) => "FineVolumeSlideUp",
            Effect::FineVolumeSlideDown(_) => "FineVolumeSlideDown",
            Effect::Tremor(_) => "Tremor",
            Effect::MultiRetrig(_) => "MultiRetrig",
            Effect::SetGlobalVolume(_) => "SetGlobalVolume",
            Effect::GlobalVolumeSlide(_) => "GlobalVolumeSlide",
            Effect::TrackVolume(_) => "TrackVolume",
            Effect::TrackVolumeSlide(_) => "TrackVolumeSlide",
            Effect::TrackFineVolumeSlide(_) => "TrackFineVolumeSlide",
            Effect::SetPan(_) => "SetPan",
            Effect::PanSlide(_) => "PanSlide",
            Effect::PanSlideNoMemory(_) => "PanSlideNoMemory",
            Effect::ItPanSlide(_) => "ItPanSlide",
            Effect::Panbrello(_) => "Panbrello",
            Effect::PanbrelloWaveform(_) => "PanbrelloWaveform",
            Effect::Surround(_) => "Surround",
            Effect::SampleOffset(_) => "SampleOffset",
            Effect::HighOffset(_) => "HighOffset",
            Effect::Reverse(_) => "Reverse",
            Effect::KeyOff(_) => "KeyOff",
            Effect::EnvelopePosition(_) => "EnvelopePosition",
            Effect::PositionJump(_) => "PositionJump",
            Effect::PatternBreak(_) => "PatternBreak",
            Effect::ItPatternBreak(_) => "ItPatternBreak",
            Effect::PatternDelay(_) => "PatternDelay",
            Effect::SetSpeed(_) => "SetSpeed",
            Effect::S3mSpeed(_) => "S3mSpeed",
            Effect::S3mTempo(_) => "S3mTempo",
            Effect::ItTempo(_) => "ItTempo",
            Effect::ItRowDelay(_) => "ItRowDelay",
            Effect::Extended(_) => "Extended",
            Effect::InstrumentFunction(_) => "InstrumentFunction",
            Effect::FilterCutoff(_) => "FilterCutoff",
            Effect::FilterResonance(_) => "FilterResonance",
            Effect::MacroSelect(_) => "MacroSelect",
            Effect::Macro(_) => "Macro",
            Effect::SmoothMacro(_) => "SmoothMacro",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_decodes_nibbles() {
        assert_eq!(ExtendedCommand::decode(0x63), ExtendedCommand::PatternLoop(3));
        assert_eq!(ExtendedCommand::decode(0xd2), ExtendedCommand::NoteDelay(2));
        assert_eq!(ExtendedCommand::decode(0xf0), ExtendedCommand::InvertLoop(0));
    }

    #[test]
    fn note_delay_requires_nonzero_ticks() {
        assert_eq!(Effect::Extended(0xd3).note_delay(), Some(3));
        assert_eq!(Effect::Extended(0xd0).note_delay(), None);
        assert_eq!(Effect::Vibrato(0xd3).note_delay(), None);
    }

    #[test]
    fn param_and_name() {
        assert_eq!(Effect::VolumeSlide(0x0f).param(), 0x0f);
        assert_eq!(Effect::None.param(), 0);
        assert_eq!(Effect::ItTempo(0x10).name(), "ItTempo");
    }

    #[test]
    fn flow_control_detection() {
        assert!(Effect::PositionJump(2).is_flow_control());
        assert!(Effect::Extended(0x61).is_flow_control());
        assert!(!Effect::Extended(0x81).is_flow_control());
        assert!(!Effect::SetVolume(10).is_flow_control());
    }
}
