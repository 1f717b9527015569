//! Module validation errors.

use thiserror::Error;

/// Why a module cannot be played.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModuleError {
    #[error("module has no channels")]
    NoChannels,
    #[error("module has {0} channels, at most {max} are supported", max = crate::MAX_CHANNELS)]
    TooManyChannels(usize),
    #[error("order list has {0} entries, at most 256 are supported")]
    TooManyOrders(usize),
    #[error("pattern {pattern} has {found} channels, module has {expected}")]
    PatternChannelMismatch { pattern: usize, found: usize, expected: usize },
    #[error("instrument {instrument} references missing sample {sample}")]
    BadSampleIndex { instrument: usize, sample: usize },
    #[error("instrument {instrument} maps a key to missing subinstrument {sub}")]
    BadKeyMap { instrument: usize, sub: usize },
    #[error("instrument {0} has an envelope with too many or unordered nodes")]
    BadEnvelope(usize),
    #[error("volume base must be nonzero")]
    ZeroVolumeBase,
}
