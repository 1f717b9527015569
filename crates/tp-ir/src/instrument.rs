//! Instrument and envelope types.

use alloc::vec::Vec;
use arrayvec::ArrayString;

use crate::pattern::MAX_KEY;

/// Number of key map entries (one per key).
pub const KEY_MAP_SIZE: usize = MAX_KEY as usize + 1;

/// Maximum number of nodes in an envelope.
pub const MAX_ENVELOPE_POINTS: usize = 32;

/// An instrument definition.
#[derive(Clone, Debug)]
pub struct Instrument {
    /// Instrument name
    pub name: ArrayString<32>,
    /// Instrument global volume (0-64), applied when the module uses
    /// instrument volume
    pub volume: u8,
    /// Fadeout decrement per tick, out of 0x10000 (0 = no fade)
    pub fadeout: u16,
    /// Volume envelope
    pub volume_envelope: Envelope,
    /// Panning envelope
    pub pan_envelope: Envelope,
    /// Pitch envelope, or filter envelope when `filter` is set
    pub pitch_envelope: Envelope,
    /// Key -> subinstrument mapping
    pub key_map: [KeyMapping; KEY_MAP_SIZE],
    /// Subinstruments (sample bindings)
    pub subinstruments: Vec<SubInstrument>,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            name: ArrayString::new(),
            volume: 64,
            fadeout: 0,
            volume_envelope: Envelope::default(),
            pan_envelope: Envelope::default(),
            pitch_envelope: Envelope::default(),
            key_map: [KeyMapping::default(); KEY_MAP_SIZE],
            subinstruments: Vec::new(),
        }
    }
}

impl Instrument {
    /// Create a new instrument with default settings.
    pub fn new(name: &str) -> Self {
        let mut inst = Self::default();
        let _ = inst.name.try_push_str(name);
        inst
    }

    /// Create an instrument with a single subinstrument bound to `sample`
    /// and every key mapped to it.
    pub fn with_sample(name: &str, sample: usize) -> Self {
        let mut inst = Self::new(name);
        inst.subinstruments.push(SubInstrument {
            sample: Some(sample),
            ..SubInstrument::default()
        });
        inst.set_single_subinstrument(0);
        inst
    }

    /// Map all keys to a single subinstrument.
    pub fn set_single_subinstrument(&mut self, sub: u8) {
        self.key_map.fill(KeyMapping { sub: Some(sub), transpose: 0 });
    }

    /// Subinstrument for `key`, or the first one when no key is given.
    pub fn subinstrument_for(&self, key: Option<usize>) -> Option<&SubInstrument> {
        match key {
            Some(k) => {
                let sub = self.key_map.get(k)?.sub?;
                self.subinstruments.get(sub as usize)
            }
            None => self.subinstruments.first(),
        }
    }
}

/// Per-key mapping entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyMapping {
    /// Subinstrument index, `None` if the key plays nothing
    pub sub: Option<u8>,
    /// Extra transpose in semitones for this key
    pub transpose: i8,
}

/// A subinstrument: one sample binding with its playback defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubInstrument {
    /// Default volume (0-64)
    pub volume: u8,
    /// Global volume (0-64)
    pub global_volume: u8,
    /// Default pan (0-255), `None` keeps the channel pan
    pub pan: Option<u8>,
    /// Transpose in semitones
    pub transpose: i8,
    /// Finetune in 1/128 semitone
    pub finetune: i8,
    /// Auto-vibrato settings
    pub vibrato: AutoVibrato,
    /// New note action
    pub nna: NewNoteAction,
    /// Duplicate check type
    pub dct: DuplicateCheck,
    /// Duplicate check action
    pub dca: DuplicateAction,
    /// Sample index, `None` for a silent mapping
    pub sample: Option<usize>,
    /// Initial filter cutoff (0-127)
    pub cutoff: Option<u8>,
    /// Initial filter resonance (0-127)
    pub resonance: Option<u8>,
    /// Random volume variation in percent
    pub volume_swing: u8,
    /// Random pan variation
    pub pan_swing: u8,
}

impl Default for SubInstrument {
    fn default() -> Self {
        Self {
            volume: 64,
            global_volume: 64,
            pan: None,
            transpose: 0,
            finetune: 0,
            vibrato: AutoVibrato::default(),
            nna: NewNoteAction::Cut,
            dct: DuplicateCheck::Off,
            dca: DuplicateAction::Cut,
            sample: None,
            cutoff: None,
            resonance: None,
            volume_swing: 0,
            pan_swing: 0,
        }
    }
}

/// Sample auto-vibrato parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AutoVibrato {
    /// Vibrato speed
    pub speed: u8,
    /// Vibrato depth
    pub depth: u8,
    /// Vibrato sweep (ramp-up time)
    pub sweep: u8,
    /// Waveform type (0=sine, 1=ramp down, 2=square, 3=random)
    pub waveform: u8,
}

/// Action when a new note triggers on a channel already playing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NewNoteAction {
    /// Cut the previous note immediately
    #[default]
    Cut,
    /// Continue the previous note (background)
    Continue,
    /// Send note-off to previous note
    Off,
    /// Fade out the previous note
    Fade,
}

/// Duplicate note checking mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicateCheck {
    /// No duplicate checking
    #[default]
    Off,
    /// Check for duplicate notes
    Note,
    /// Check for duplicate samples
    Sample,
    /// Check for duplicate instruments
    Instrument,
}

/// What to do with a voice caught by the duplicate check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicateAction {
    #[default]
    Cut,
    Off,
    Fade,
}

impl From<DuplicateAction> for NewNoteAction {
    fn from(dca: DuplicateAction) -> Self {
        match dca {
            DuplicateAction::Cut => NewNoteAction::Cut,
            DuplicateAction::Off => NewNoteAction::Off,
            DuplicateAction::Fade => NewNoteAction::Fade,
        }
    }
}

/// Node-index range used for envelope loops and sustain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopRange {
    pub start: u8,
    pub end: u8,
}

/// An envelope (volume, panning, pitch or filter).
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Envelope points, ticks non-decreasing
    pub points: Vec<EnvelopePoint>,
    /// Is the envelope enabled?
    pub enabled: bool,
    /// Sustain point range. XM-style envelopes hold on `start` only.
    pub sustain: Option<LoopRange>,
    /// Regular loop range
    pub loop_range: Option<LoopRange>,
    /// Keep the envelope position when a new note starts
    pub carry: bool,
    /// Pitch envelope drives the filter cutoff instead
    pub filter: bool,
}

impl Envelope {
    /// Create a new empty envelope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an enabled envelope from `(tick, value)` pairs.
    pub fn from_points(points: &[(u16, i16)]) -> Self {
        let mut env = Self::new();
        for &(tick, value) in points {
            env.add_point(tick, value);
        }
        env.enabled = true;
        env
    }

    /// Add a point to the envelope.
    pub fn add_point(&mut self, tick: u16, value: i16) {
        self.points.push(EnvelopePoint { tick, value });
    }

    /// Returns true if the envelope is enabled and has points.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.points.is_empty()
    }

    /// Tick of the last node.
    pub fn last_tick(&self) -> i32 {
        self.points.last().map_or(0, |p| p.tick as i32)
    }

    /// Tick of node `index`, clamped to the last node.
    pub fn tick_of(&self, index: u8) -> i32 {
        let i = (index as usize).min(self.points.len().saturating_sub(1));
        self.points.get(i).map_or(0, |p| p.tick as i32)
    }

    /// Get the interpolated value at a given tick.
    ///
    /// Returns `default` for a negative tick or an inactive envelope, and
    /// holds the last node's value past the end.
    pub fn value_at(&self, tick: i32, default: i32) -> i32 {
        if tick < 0 || !self.is_active() {
            return default;
        }
        let last = self.points.len() - 1;
        if last == 0 || tick >= self.points[last].tick as i32 {
            return self.points[last].value as i32;
        }

        let mut i = last;
        while i > 0 && self.points[i].tick as i32 > tick {
            i -= 1;
        }
        let p1 = self.points[i];
        let p2 = self.points[(i + 1).min(last)];
        let (x1, x2) = (p1.tick as i32, p2.tick as i32);
        let (y1, y2) = (p1.value as i32, p2.value as i32);

        if x2 == x1 {
            return y2;
        }
        if tick < x1 || x2 < x1 {
            return y1;
        }
        (y2 - y1) * (tick - x1) / (x2 - x1) + y1
    }

    /// True when the envelope is nodes-monotonic and within size limits.
    pub fn is_well_formed(&self) -> bool {
        self.points.len() <= MAX_ENVELOPE_POINTS
            && self.points.windows(2).all(|w| w[0].tick <= w[1].tick)
    }
}

/// A point in an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopePoint {
    /// Tick position (0-65535)
    pub tick: u16,
    /// Value: 0-64 for volume, 0-64 centered on 32 for pan, signed for pitch
    pub value: i16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_interpolation() {
        let env = Envelope::from_points(&[(0, 0), (10, 64), (20, 0)]);

        assert_eq!(env.value_at(5, 64), 32);
        assert_eq!(env.value_at(10, 64), 64);
        assert_eq!(env.value_at(15, 64), 32);
        assert_eq!(env.value_at(25, 64), 0); // Past end
    }

    #[test]
    fn envelope_default_when_inactive() {
        let mut env = Envelope::from_points(&[(0, 10), (4, 20)]);
        assert_eq!(env.value_at(-1, 64), 64);
        env.enabled = false;
        assert_eq!(env.value_at(2, 64), 64);
        assert_eq!(Envelope::new().value_at(0, 32), 32);
    }

    #[test]
    fn single_node_holds_value() {
        let env = Envelope::from_points(&[(0, 48)]);
        assert_eq!(env.value_at(0, 64), 48);
        assert_eq!(env.value_at(100, 64), 48);
    }

    #[test]
    fn coincident_nodes_take_later_value() {
        let env = Envelope::from_points(&[(0, 0), (5, 10), (5, 40), (10, 40)]);
        assert_eq!(env.value_at(5, 64), 40);
    }

    #[test]
    fn well_formed_rejects_backwards_ticks() {
        let env = Envelope::from_points(&[(0, 0), (10, 1), (5, 2)]);
        assert!(!env.is_well_formed());
        assert!(Envelope::from_points(&[(0, 0), (10, 1)]).is_well_formed());
    }

    #[test]
    fn key_map_lookup() {
        let inst = Instrument::with_sample("lead", 3);
        assert_eq!(inst.subinstrument_for(Some(60)).and_then(|s| s.sample), Some(3));
        assert_eq!(inst.subinstrument_for(None).and_then(|s| s.sample), Some(3));

        let mut sparse = Instrument::new("sparse");
        sparse.subinstruments.push(SubInstrument::default());
        assert!(sparse.subinstrument_for(Some(60)).is_none());
    }
}
