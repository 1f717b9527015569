//! Pattern and event types for tracker sequences.

use alloc::vec::Vec;
use crate::effects::Effect;

/// Highest playable key index.
pub const MAX_KEY: u8 = 120;

/// A note value in a pattern event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Note {
    /// No note
    #[default]
    None,
    /// Note on with key index (0-120). Key 60 plays a sample at its base rate.
    On(u8),
    /// Key release
    Off,
    /// Note cut
    Cut,
    /// Note fade (IT-specific)
    Fade,
}

impl Note {
    /// Key index of a playable note-on.
    pub const fn key(self) -> Option<u8> {
        match self {
            Note::On(k) if k <= MAX_KEY => Some(k),
            _ => None,
        }
    }
}

/// A single event in a pattern: one channel, one row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Event {
    /// Note value
    pub note: Note,
    /// Instrument number (0 = none, 1-255 = instrument index + 1)
    pub instrument: u8,
    /// Volume column (0 = none, otherwise volume + 1)
    pub volume: u8,
    /// Primary effect
    pub effect: Effect,
    /// Secondary effect (volume-column commands land here)
    pub effect2: Effect,
}

impl Event {
    /// Create an empty event.
    pub const fn empty() -> Self {
        Self {
            note: Note::None,
            instrument: 0,
            volume: 0,
            effect: Effect::None,
            effect2: Effect::None,
        }
    }

    /// Create an event that triggers `key` with `instrument` (1-based).
    pub const fn note(key: u8, instrument: u8) -> Self {
        let mut ev = Self::empty();
        ev.note = Note::On(key);
        ev.instrument = instrument;
        ev
    }

    /// Builder-style effect setter.
    pub const fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }

    /// Builder-style secondary effect setter.
    pub const fn with_effect2(mut self, effect: Effect) -> Self {
        self.effect2 = effect;
        self
    }

    /// Builder-style volume column setter (takes the plain volume, 0-64).
    pub const fn with_volume(mut self, volume: u8) -> Self {
        self.volume = volume + 1;
        self
    }

    /// Returns true if the event is completely empty.
    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }
}

/// A pattern containing rows of events across channels.
#[derive(Clone, Debug)]
pub struct Pattern {
    /// Number of rows (1-256)
    pub rows: u16,
    /// Number of channels
    pub channels: u8,
    /// Pattern data, stored row-major: data[row * channels + channel]
    pub data: Vec<Event>,
}

impl Pattern {
    /// Create a new pattern with empty events.
    pub fn new(rows: u16, channels: u8) -> Self {
        Self {
            rows,
            channels,
            data: alloc::vec![Event::empty(); rows as usize * channels as usize],
        }
    }

    /// Get a reference to an event.
    pub fn cell(&self, row: u16, channel: u8) -> &Event {
        debug_assert!(row < self.rows);
        debug_assert!(channel < self.channels);
        &self.data[row as usize * self.channels as usize + channel as usize]
    }

    /// Get a mutable reference to an event.
    pub fn cell_mut(&mut self, row: u16, channel: u8) -> &mut Event {
        debug_assert!(row < self.rows);
        debug_assert!(channel < self.channels);
        &mut self.data[row as usize * self.channels as usize + channel as usize]
    }

    /// Event lookup that tolerates rows and channels outside the pattern.
    pub fn get(&self, row: usize, channel: usize) -> Option<&Event> {
        if row >= self.rows as usize || channel >= self.channels as usize {
            return None;
        }
        self.data.get(row * self.channels as usize + channel)
    }

    /// Iterate over all events in a row.
    pub fn row(&self, row: u16) -> &[Event] {
        let start = row as usize * self.channels as usize;
        &self.data[start..start + self.channels as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_playable_keys_have_a_key() {
        assert_eq!(Note::On(60).key(), Some(60));
        assert_eq!(Note::On(MAX_KEY + 1).key(), None);
        assert_eq!(Note::Off.key(), None);
    }

    #[test]
    fn pattern_cell_access() {
        let mut pattern = Pattern::new(64, 4);
        pattern.cell_mut(10, 2).note = Note::On(60);

        assert_eq!(pattern.cell(10, 2).note, Note::On(60));
        assert_eq!(pattern.cell(10, 1).note, Note::None);
    }

    #[test]
    fn out_of_range_lookup_is_none() {
        let pattern = Pattern::new(16, 2);
        assert!(pattern.get(16, 0).is_none());
        assert!(pattern.get(0, 2).is_none());
        assert!(pattern.get(15, 1).is_some());
    }

    #[test]
    fn volume_builder_stores_offset() {
        let ev = Event::note(60, 1).with_volume(0);
        assert_eq!(ev.volume, 1);
        assert!(!ev.is_empty());
        assert!(Event::empty().is_empty());
    }
}
