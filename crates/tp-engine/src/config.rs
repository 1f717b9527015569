//! Session configuration.

use bitflags::bitflags;

use crate::error::{PlayerError, Result};

pub const MIN_SAMPLE_RATE: u32 = 4000;
pub const MAX_SAMPLE_RATE: u32 = 49170;
pub const MAX_VOICES: usize = 256;

/// Resampling kernel used by the mixer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Nearest source frame
    Nearest,
    /// Two-point linear
    #[default]
    Linear,
    /// Four-point cubic spline
    Spline,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleBits {
    Eight,
    #[default]
    Sixteen,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputChannels {
    Mono,
    #[default]
    Stereo,
}

/// Layout of the rendered PCM. 16-bit output is little-endian.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputFormat {
    pub bits: SampleBits,
    pub channels: OutputChannels,
    pub unsigned: bool,
}

impl OutputFormat {
    /// Bytes per output frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        let width = match self.bits {
            SampleBits::Eight => 1,
            SampleBits::Sixteen => 2,
        };
        width * self.channel_count()
    }

    pub fn channel_count(&self) -> usize {
        match self.channels {
            OutputChannels::Mono => 1,
            OutputChannels::Stereo => 2,
        }
    }
}

bitflags! {
    /// Playback behavior switches.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PlayerFlags: u8 {
        /// Speed-only timing: Fxx never sets BPM
        const VBLANK = 1 << 0;
        /// ProTracker 2 sample offset accumulation
        const FX9BUG = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayerConfig {
    pub sample_rate: u32,
    pub format: OutputFormat,
    pub interpolation: Interpolation,
    /// Mix amplification shift, 0..=3
    pub amplify: u8,
    /// Stereo separation in percent
    pub stereo_separation: u8,
    /// Master volume in percent, 0..=200
    pub master_volume: u16,
    /// Voice pool size
    pub max_voices: usize,
    pub flags: PlayerFlags,
    /// Seed for random waveforms and volume/pan swing
    pub seed: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            format: OutputFormat::default(),
            interpolation: Interpolation::default(),
            amplify: 1,
            stereo_separation: 70,
            master_volume: 100,
            max_voices: 128,
            flags: PlayerFlags::empty(),
            seed: 0x5eed,
        }
    }
}

impl PlayerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(PlayerError::InvalidSampleRate(self.sample_rate));
        }
        if self.amplify > 3 {
            return Err(PlayerError::InvalidConfig("amplify must be 0..=3"));
        }
        if self.stereo_separation > 100 {
            return Err(PlayerError::InvalidConfig("stereo separation must be 0..=100"));
        }
        if self.master_volume > 200 {
            return Err(PlayerError::InvalidConfig("master volume must be 0..=200"));
        }
        if self.max_voices == 0 || self.max_voices > MAX_VOICES {
            return Err(PlayerError::InvalidConfig("max voices must be 1..=256"));
        }
        Ok(())
    }
}
