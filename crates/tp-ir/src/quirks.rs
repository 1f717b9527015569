//! Per-module playback compatibility switches.

use bitflags::bitflags;

bitflags! {
    /// Tracker-specific playback behaviors.
    ///
    /// Loaders set these to make the engine reproduce the tracker that
    /// authored the module.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Quirks: u32 {
        /// S3M-style pattern loop: loop start moves past the loop end
        const S3MLOOP = 1 << 0;
        /// Envelope end fades the note out
        const ENVFADE = 1 << 1;
        /// ProTracker behaviors (toneporta target reset, note wrap)
        const PROTRACK = 1 << 2;
        /// ScreamTracker 3 bugs (shared effect memory, period cutoff)
        const ST3BUGS = 1 << 3;
        /// Fine effects encoded in slide parameters (Fx/xF)
        const FINEFX = 1 << 4;
        /// Volume slides on every tick including the first
        const VSALL = 1 << 5;
        /// Pitch bends on every tick including the first
        const PBALL = 1 << 6;
        /// Volume slide down has priority over up
        const VOLPDN = 1 << 7;
        /// Portamento and tone portamento share memory
        const UNISLD = 1 << 8;
        /// Volume column portamento has no fine variants
        const ITVPOR = 1 << 9;
        /// Vibrato depth is halved
        const VIBHALF = 1 << 10;
        /// Vibrato is inverted
        const VIBINV = 1 << 11;
        /// Vibrato and tremolo run on the first tick
        const VIBALL = 1 << 12;
        /// Arpeggio remembers its parameter
        const ARPMEM = 1 << 13;
        /// Old IT effects: retrigger instrument on toneporta
        const ITOLDFX = 1 << 14;
        /// Ignore toneporta without a note and without a running slide
        const IGSTPOR = 1 << 15;
        /// IT key-off fade rules
        const KEYOFF = 1 << 16;
        /// Background voices (new note actions)
        const VIRTUAL = 1 << 17;
        /// Resonant filter and MIDI macros
        const FILTER = 1 << 18;
        /// Apply instrument global volume
        const INSVOL = 1 << 19;
        /// Carry envelope position across notes
        const PRENV = 1 << 20;
        /// 0xFF in the order list ends the song
        const MARKER = 1 << 21;
        /// FastTracker 2 bugs
        const FT2BUGS = 1 << 22;
        /// Delayed notes retrigger the previous note and instrument
        const RTDELAY = 1 << 23;
        /// Speed effect never sets BPM
        const NOBPM = 1 << 24;
        /// FT2 MOD playback quirks
        const FTMOD = 1 << 25;
        /// Multi-retrig with S3M behavior
        const S3MRTG = 1 << 26;
    }
}

impl Quirks {
    /// Typical ProTracker module.
    pub const PROTRACKER: Quirks = Quirks::PROTRACK;
    /// Typical ScreamTracker 3 module.
    pub const ST3: Quirks = Quirks::S3MLOOP
        .union(Quirks::ST3BUGS)
        .union(Quirks::VOLPDN)
        .union(Quirks::FINEFX)
        .union(Quirks::S3MRTG)
        .union(Quirks::MARKER)
        .union(Quirks::ARPMEM)
        .union(Quirks::RTDELAY);
    /// Typical FastTracker 2 module.
    pub const FT2: Quirks = Quirks::FT2BUGS.union(Quirks::RTDELAY);
    /// Typical Impulse Tracker module.
    pub const IT: Quirks = Quirks::S3MLOOP
        .union(Quirks::FINEFX)
        .union(Quirks::VIBALL)
        .union(Quirks::ENVFADE)
        .union(Quirks::ITVPOR)
        .union(Quirks::KEYOFF)
        .union(Quirks::VIRTUAL)
        .union(Quirks::FILTER)
        .union(Quirks::IGSTPOR)
        .union(Quirks::S3MRTG)
        .union(Quirks::MARKER)
        .union(Quirks::ARPMEM)
        .union(Quirks::INSVOL)
        .union(Quirks::RTDELAY);
}

/// Which tracker's note/instrument rules apply when reading events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadEventType {
    /// ProTracker and friends
    #[default]
    Mod,
    /// FastTracker 2
    Ft2,
    /// ScreamTracker 3
    St3,
    /// Impulse Tracker
    It,
    /// MED/OctaMED
    Med,
}

/// Pitch model used for slides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PeriodType {
    /// Amiga periods, unbounded
    #[default]
    Amiga,
    /// Amiga periods clamped to the ProTracker range (C-3..B-5)
    ModRange,
    /// Linear periods (64 units per semitone)
    Linear,
}
