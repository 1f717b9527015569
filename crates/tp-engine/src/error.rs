//! Player errors.
//!
//! Only setup mistakes and precondition violations are errors. Bad
//! pattern content is clamped or ignored during playback, and the end of
//! the module is reported as [`PlayState::Ended`](crate::PlayState).

use thiserror::Error;
use tp_ir::ModuleError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlayerError {
    #[error("invalid module: {0}")]
    InvalidModule(#[from] ModuleError),
    #[error("module has no playable order")]
    NoValidOrders,
    #[error("sample rate {0} Hz is outside 4000..=49170")]
    InvalidSampleRate(u32),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("player has not been started")]
    NotStarted,
    #[error("order {0} is out of range")]
    InvalidPosition(usize),
    #[error("channel {0} is out of range")]
    InvalidChannel(usize),
    #[error("subsong {0} does not exist")]
    InvalidSequence(usize),
}

pub type Result<T> = core::result::Result<T, PlayerError>;
