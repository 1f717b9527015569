//! Playback engine for tracker modules.
//!
//! The [`Player`] drives a [`Sequencer`] one tick at a time: rows are
//! read through the event reader of the module's tracker family, effects
//! arm slides and oscillators, and every virtual channel updates its
//! voice. The [`Mixer`] then renders the voice pool into PCM. A scan pass
//! runs the same sequencer ahead of playback to find subsongs, durations
//! and loop points.
//!
//! Designed to be `no_std` compatible with the `alloc` crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod channel;
mod config;
mod dialect;
mod effects;
mod envelope_state;
mod error;
mod filter;
pub mod flow;
mod frequency;
mod info;
mod interpolation;
mod lfo;
mod macros;
mod mixer;
mod player;
mod read_event;
pub mod scan;
mod sequencer;
mod update;
mod voice;
mod voice_pool;

pub use config::{
    Interpolation, OutputChannels, OutputFormat, PlayerConfig, PlayerFlags, SampleBits, MAX_SAMPLE_RATE,
    MAX_VOICES, MIN_SAMPLE_RATE,
};
pub use dialect::{ArpeggioPolicy, Dialect, EffectMemoryPolicy, EnvelopeLoopPolicy, RowStartPolicy, TremorPolicy};
pub use effects::MIN_BPM;
pub use envelope_state::{EnvelopeCursor, EnvelopeFade};
pub use error::{PlayerError, Result};
pub use filter::{filter_setup, FilterCoefficients};
pub use flow::{Clock, LoopPoint, Tracer};
pub use frequency::{note_to_period, period_to_step, C4_PERIOD};
pub use info::{ChannelInfo, FrameInfo, ModuleInfo};
pub use mixer::{Mixer, RAMP_FRAMES};
pub use player::{PlayState, Player};
pub use scan::{scan, OrderInfo, ScanResult, Sequence};
pub use sequencer::{Reposition, Sequencer, Tick};
pub use voice::Voice;
pub use voice_pool::{ChannelStatus, Patch, VoiceKey, VoicePool};
