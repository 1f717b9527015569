//! Module data model for the trackplay engine.
//!
//! Format loaders populate a [`Module`]; the playback engine reads it and
//! never mutates it. Patterns hold [`Event`]s, instruments map keys to
//! subinstruments bound to samples, and [`Quirks`] select the tracker
//! behaviors the module was authored against.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod effects;
mod error;
mod instrument;
mod macros;
mod module;
mod pattern;
mod quirks;
mod sample;

/// Maximum number of module channels.
pub const MAX_CHANNELS: usize = 64;

pub use effects::{Effect, ExtendedCommand};
pub use error::ModuleError;
pub use instrument::{
    AutoVibrato, DuplicateAction, DuplicateCheck, Envelope, EnvelopePoint, Instrument, KeyMapping,
    LoopRange, NewNoteAction, SubInstrument, KEY_MAP_SIZE, MAX_ENVELOPE_POINTS,
};
pub use macros::{MacroText, MidiMacros, FIXED_MACROS, PARAM_MACROS};
pub use module::{ChannelSettings, Module, MAX_ORDERS, ORDER_END, ORDER_SKIP};
pub use pattern::{Event, Note, Pattern, MAX_KEY};
pub use quirks::{PeriodType, Quirks, ReadEventType};
pub use sample::{c2spd_to_note, LoopType, Sample, SampleData};
