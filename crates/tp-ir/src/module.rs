//! Module structure: the read-only input of the player.

use alloc::vec::Vec;
use arrayvec::ArrayString;

use crate::error::ModuleError;
use crate::instrument::Instrument;
use crate::macros::MidiMacros;
use crate::pattern::Pattern;
use crate::quirks::{PeriodType, Quirks, ReadEventType};
use crate::sample::Sample;
use crate::MAX_CHANNELS;

/// Order list value that ends the song (with [`Quirks::MARKER`]).
pub const ORDER_END: u8 = 0xff;
/// Order list value that is skipped during playback.
pub const ORDER_SKIP: u8 = 0xfe;
/// Maximum number of order list entries.
pub const MAX_ORDERS: usize = 256;

/// A complete module, as produced by a format loader.
#[derive(Clone, Debug)]
pub struct Module {
    /// Module title
    pub title: ArrayString<64>,
    /// Per-channel settings
    pub channels: Vec<ChannelSettings>,
    /// Order list: pattern indices plus [`ORDER_END`] / [`ORDER_SKIP`]
    pub orders: Vec<u8>,
    /// Order to continue from when the order list runs out
    pub restart: usize,
    /// Patterns
    pub patterns: Vec<Pattern>,
    /// Instruments
    pub instruments: Vec<Instrument>,
    /// Samples
    pub samples: Vec<Sample>,
    /// Initial speed (ticks per row)
    pub initial_speed: u8,
    /// Initial tempo in BPM
    pub initial_bpm: u8,
    /// Initial global volume
    pub global_volume: u8,
    /// Maximum channel volume (64 for most formats)
    pub volume_base: u8,
    /// Maximum global volume (64, or 128 for IT)
    pub global_volume_base: u8,
    /// Playback rate of key 60 in Hz
    pub c4_rate: u32,
    /// Timing multiplier: frame time in ms is `time_factor * refresh_rate / bpm`
    pub time_factor: f64,
    /// Base refresh rate used with `time_factor`
    pub refresh_rate: f64,
    /// Compatibility switches
    pub quirks: Quirks,
    /// Event interpretation rules
    pub read_event_type: ReadEventType,
    /// Pitch model
    pub period_type: PeriodType,
    /// MIDI macros (IT)
    pub midi_macros: Option<MidiMacros>,
}

impl Default for Module {
    fn default() -> Self {
        Self {
            title: ArrayString::new(),
            channels: Vec::new(),
            orders: Vec::new(),
            restart: 0,
            patterns: Vec::new(),
            instruments: Vec::new(),
            samples: Vec::new(),
            initial_speed: 6,
            initial_bpm: 125,
            global_volume: 64,
            volume_base: 64,
            global_volume_base: 64,
            c4_rate: 8363,
            time_factor: 10.0,
            refresh_rate: 250.0,
            quirks: Quirks::empty(),
            read_event_type: ReadEventType::Mod,
            period_type: PeriodType::Amiga,
            midi_macros: None,
        }
    }
}

impl Module {
    /// Create a new empty module.
    pub fn new(title: &str) -> Self {
        let mut module = Self::default();
        let _ = module.title.try_push_str(title);
        module
    }

    /// Create a module with a given number of channels, panned Amiga-style
    /// (L R R L ...).
    pub fn with_channels(title: &str, num_channels: u8) -> Self {
        let mut module = Self::new(title);
        for i in 0..num_channels {
            let pan = if matches!(i % 4, 0 | 3) { 0x40 } else { 0xc0 };
            module.channels.push(ChannelSettings { pan, ..ChannelSettings::default() });
        }
        module
    }

    /// Number of module channels.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Pattern at order position `ord`, if the entry names a valid pattern.
    pub fn pattern_at(&self, ord: usize) -> Option<&Pattern> {
        let pat = *self.orders.get(ord)?;
        self.patterns.get(pat as usize)
    }

    /// Returns true if the order entry is a playable pattern.
    pub fn is_playable_order(&self, ord: usize) -> bool {
        self.pattern_at(ord).is_some()
    }

    /// Returns true if `ord` holds the end marker and markers are honored.
    pub fn is_end_marker(&self, ord: usize) -> bool {
        self.quirks.contains(Quirks::MARKER) && self.orders.get(ord) == Some(&ORDER_END)
    }

    /// Check the structural invariants the player relies on.
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.channels.is_empty() {
            return Err(ModuleError::NoChannels);
        }
        if self.channels.len() > MAX_CHANNELS {
            return Err(ModuleError::TooManyChannels(self.channels.len()));
        }
        if self.orders.len() > MAX_ORDERS {
            return Err(ModuleError::TooManyOrders(self.orders.len()));
        }
        if self.volume_base == 0 || self.global_volume_base == 0 {
            return Err(ModuleError::ZeroVolumeBase);
        }
        for (i, pat) in self.patterns.iter().enumerate() {
            if pat.channels as usize != self.channels.len() {
                return Err(ModuleError::PatternChannelMismatch {
                    pattern: i,
                    found: pat.channels as usize,
                    expected: self.channels.len(),
                });
            }
        }
        for (i, ins) in self.instruments.iter().enumerate() {
            for sub in &ins.subinstruments {
                if let Some(smp) = sub.sample {
                    if smp >= self.samples.len() {
                        return Err(ModuleError::BadSampleIndex { instrument: i, sample: smp });
                    }
                }
            }
            for map in ins.key_map.iter() {
                if let Some(sub) = map.sub {
                    if sub as usize >= ins.subinstruments.len() {
                        return Err(ModuleError::BadKeyMap { instrument: i, sub: sub as usize });
                    }
                }
            }
            // Loop and sustain indexes past the last node clamp to it
            let envs = [&ins.volume_envelope, &ins.pan_envelope, &ins.pitch_envelope];
            if envs.iter().any(|env| !env.is_well_formed()) {
                return Err(ModuleError::BadEnvelope(i));
            }
        }
        Ok(())
    }
}

/// Per-channel initial settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Initial pan (0-255, 0x80 = center)
    pub pan: u8,
    /// Initial channel volume (0-64)
    pub volume: u8,
    /// Muted
    pub muted: bool,
    /// Start in surround mode
    pub surround: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            pan: 0x80,
            volume: 64,
            muted: false,
            surround: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{Envelope, LoopRange};
    use crate::sample::SampleData;

    fn two_channel() -> Module {
        let mut m = Module::with_channels("t", 2);
        m.patterns.push(Pattern::new(64, 2));
        m.orders.push(0);
        m
    }

    #[test]
    fn amiga_panning() {
        let m = Module::with_channels("t", 4);
        let pans: Vec<u8> = m.channels.iter().map(|c| c.pan).collect();
        assert_eq!(pans, [0x40, 0xc0, 0xc0, 0x40]);
    }

    #[test]
    fn valid_module_passes() {
        assert_eq!(two_channel().validate(), Ok(()));
    }

    #[test]
    fn rejects_channel_mismatch() {
        let mut m = two_channel();
        m.patterns.push(Pattern::new(64, 3));
        assert!(matches!(
            m.validate(),
            Err(ModuleError::PatternChannelMismatch { pattern: 1, found: 3, expected: 2 })
        ));
    }

    #[test]
    fn rejects_dangling_sample() {
        let mut m = two_channel();
        m.instruments.push(Instrument::with_sample("i", 4));
        assert_eq!(
            m.validate(),
            Err(ModuleError::BadSampleIndex { instrument: 0, sample: 4 })
        );
        m.samples = alloc::vec![Sample::with_data("s", SampleData::Mono8(alloc::vec![0; 4])); 5];
        assert_eq!(m.validate(), Ok(()));
    }

    #[test]
    fn accepts_envelope_loop_past_nodes() {
        let mut m = two_channel();
        let mut ins = Instrument::new("i");
        ins.volume_envelope = Envelope::from_points(&[(0, 64), (10, 0)]);
        ins.volume_envelope.loop_range = Some(LoopRange { start: 0, end: 7 });
        ins.volume_envelope.sustain = Some(LoopRange { start: 5, end: 3 });
        m.instruments.push(ins);
        assert_eq!(m.validate(), Ok(()));
        assert_eq!(m.instruments[0].volume_envelope.tick_of(7), 10);
    }

    #[test]
    fn rejects_unordered_envelope() {
        let mut m = two_channel();
        let mut ins = Instrument::new("i");
        ins.pan_envelope = Envelope::from_points(&[(0, 32), (10, 0), (4, 64)]);
        m.instruments.push(ins);
        assert_eq!(m.validate(), Err(ModuleError::BadEnvelope(0)));
    }

    #[test]
    fn accepts_empty_pattern() {
        let mut m = two_channel();
        m.patterns.push(Pattern::new(0, 2));
        m.orders.push(1);
        assert_eq!(m.validate(), Ok(()));
        assert!(m.is_playable_order(m.orders.len() - 1));
    }

    #[test]
    fn order_helpers() {
        let mut m = two_channel();
        m.orders = alloc::vec![0, ORDER_SKIP, 7, ORDER_END];
        assert!(m.is_playable_order(0));
        assert!(!m.is_playable_order(1));
        assert!(!m.is_playable_order(2));
        assert!(!m.is_end_marker(3));
        m.quirks |= Quirks::MARKER;
        assert!(m.is_end_marker(3));
    }
}
