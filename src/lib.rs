//! Tracker module playback.
//!
//! Format loaders build a [`Module`]; a [`Player`] scans it for subsongs
//! and renders it to PCM one tick at a time.
//!
//! ```no_run
//! use trackplay::{Module, PlayState, Player, PlayerConfig};
//!
//! # fn load() -> Module { unimplemented!() }
//! let mut player = Player::new(load())?;
//! player.start(PlayerConfig::default())?;
//! let mut pcm = vec![0u8; 4096];
//! while player.fill_buffer(&mut pcm, 1)? != PlayState::Ended {
//!     // hand `pcm` to the audio device
//! }
//! # Ok::<(), trackplay::PlayerError>(())
//! ```

pub use tp_engine as engine;
pub use tp_ir as ir;

pub use tp_engine::{
    FrameInfo, Interpolation, OutputChannels, OutputFormat, PlayState, Player, PlayerConfig, PlayerError,
    PlayerFlags, SampleBits,
};
pub use tp_ir::{Effect, Event, Instrument, Module, Note, Pattern, Quirks, ReadEventType, Sample, SampleData};
