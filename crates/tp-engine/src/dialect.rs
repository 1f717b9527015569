//! Tracker dialect: the module's quirk set resolved into behavior policies.
//!
//! Components consult these policies instead of testing raw quirk bits,
//! so each behavioral fork has one name.

use tp_ir::{Module, PeriodType, Quirks, ReadEventType};

use crate::lfo::LfoFlavor;

/// How envelope loops and sustain points interact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeLoopPolicy {
    /// XM: single sustain point, loop skipped once released past it
    Xm,
    /// IT: sustain loop range plus an independent regular loop
    It,
}

/// Where effect memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectMemoryPolicy {
    /// One register per effect family
    PerFamily,
    /// ScreamTracker 3: families share one "last nonzero parameter" register
    St3Shared,
}

/// When the first tick of a row counts as the row start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowStartPolicy {
    /// Only tick 0 of the row
    FirstTick,
    /// Tick 0 of every repeat of the row (pattern delay counts as new rows)
    EveryRowRepeat,
}

/// Arpeggio sequencing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArpeggioPolicy {
    /// Cycle through the table one step per tick
    Cyclic,
    /// FT2's tick-indexed table
    Ft2Table,
}

/// Tremor counter behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TremorPolicy {
    Ft2,
    S3m,
}

/// Resolved behavior of one module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dialect {
    pub events: ReadEventType,
    pub period_type: PeriodType,
    pub quirks: Quirks,
    pub envelope: EnvelopeLoopPolicy,
    pub memory: EffectMemoryPolicy,
    pub row_start: RowStartPolicy,
    pub arpeggio: ArpeggioPolicy,
    pub tremor: TremorPolicy,
}

impl Dialect {
    pub fn from_module(module: &Module) -> Self {
        let events = module.read_event_type;
        let quirks = module.quirks;
        let it = events == ReadEventType::It;
        Self {
            events,
            period_type: module.period_type,
            quirks,
            envelope: if it { EnvelopeLoopPolicy::It } else { EnvelopeLoopPolicy::Xm },
            memory: if quirks.contains(Quirks::ST3BUGS) {
                EffectMemoryPolicy::St3Shared
            } else {
                EffectMemoryPolicy::PerFamily
            },
            row_start: if matches!(events, ReadEventType::It | ReadEventType::St3) {
                RowStartPolicy::EveryRowRepeat
            } else {
                RowStartPolicy::FirstTick
            },
            arpeggio: if quirks.contains(Quirks::FT2BUGS) {
                ArpeggioPolicy::Ft2Table
            } else {
                ArpeggioPolicy::Cyclic
            },
            tremor: if events == ReadEventType::Ft2 { TremorPolicy::Ft2 } else { TremorPolicy::S3m },
        }
    }

    #[inline]
    pub fn has(&self, quirk: Quirks) -> bool {
        self.quirks.contains(quirk)
    }

    #[inline]
    pub fn is_it(&self) -> bool {
        self.events == ReadEventType::It
    }

    #[inline]
    pub fn is_ft2(&self) -> bool {
        self.events == ReadEventType::Ft2
    }

    #[inline]
    pub fn is_st3(&self) -> bool {
        self.events == ReadEventType::St3
    }

    /// True on the first tick of a row (or row repeat) at `frame`.
    #[inline]
    pub fn is_first_frame(&self, frame: i32, speed: u32) -> bool {
        match self.row_start {
            RowStartPolicy::EveryRowRepeat => speed == 0 || frame % speed as i32 == 0,
            RowStartPolicy::FirstTick => frame == 0,
        }
    }

    /// Waveform flavor for a vibrato-like (`vibrato = true`) or
    /// tremolo/panbrello oscillator.
    pub fn lfo_flavor(&self, vibrato: bool) -> LfoFlavor {
        match self.events {
            ReadEventType::St3 | ReadEventType::It => LfoFlavor::St3,
            ReadEventType::Ft2 if vibrato => LfoFlavor::Ft2Vibrato,
            _ => LfoFlavor::Mod,
        }
    }

    /// Frames of the IT ping-pong loop shortening.
    pub fn bidir_adjust(&self) -> i64 {
        if self.is_it() { 1 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(events: ReadEventType, quirks: Quirks) -> Module {
        let mut m = Module::with_channels("d", 4);
        m.read_event_type = events;
        m.quirks = quirks;
        m
    }

    #[test]
    fn it_dialect() {
        let d = Dialect::from_module(&module(ReadEventType::It, Quirks::IT));
        assert_eq!(d.envelope, EnvelopeLoopPolicy::It);
        assert_eq!(d.memory, EffectMemoryPolicy::PerFamily);
        assert_eq!(d.row_start, RowStartPolicy::EveryRowRepeat);
        assert_eq!(d.bidir_adjust(), 1);
        assert!(d.is_first_frame(12, 6));
    }

    #[test]
    fn st3_shares_memory() {
        let d = Dialect::from_module(&module(ReadEventType::St3, Quirks::ST3));
        assert_eq!(d.memory, EffectMemoryPolicy::St3Shared);
        assert_eq!(d.tremor, TremorPolicy::S3m);
        assert_eq!(d.lfo_flavor(true), LfoFlavor::St3);
    }

    #[test]
    fn mod_first_frame_is_tick_zero_only() {
        let d = Dialect::from_module(&module(ReadEventType::Mod, Quirks::PROTRACKER));
        assert!(d.is_first_frame(0, 6));
        assert!(!d.is_first_frame(6, 6));
        assert_eq!(d.envelope, EnvelopeLoopPolicy::Xm);
    }

    #[test]
    fn ft2_flavors() {
        let d = Dialect::from_module(&module(ReadEventType::Ft2, Quirks::FT2));
        assert_eq!(d.arpeggio, ArpeggioPolicy::Ft2Table);
        assert_eq!(d.tremor, TremorPolicy::Ft2);
        assert_eq!(d.lfo_flavor(true), LfoFlavor::Ft2Vibrato);
        assert_eq!(d.lfo_flavor(false), LfoFlavor::Mod);
    }
}
