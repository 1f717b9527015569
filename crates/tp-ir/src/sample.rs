//! Sample data types.

use alloc::vec::Vec;
use arrayvec::ArrayString;

/// A sample definition.
#[derive(Clone, Debug)]
pub struct Sample {
    /// Sample name
    pub name: ArrayString<32>,
    /// Audio data
    pub data: SampleData,
    /// Loop start position (in frames)
    pub loop_start: u32,
    /// Loop end position (in frames, exclusive)
    pub loop_end: u32,
    /// Loop type
    pub loop_type: LoopType,
    /// Sustain loop start position (in frames)
    pub sustain_start: u32,
    /// Sustain loop end position (in frames, exclusive)
    pub sustain_end: u32,
    /// Sustain loop type, active until the note is released
    pub sustain_type: LoopType,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            name: ArrayString::new(),
            data: SampleData::Mono8(Vec::new()),
            loop_start: 0,
            loop_end: 0,
            loop_type: LoopType::None,
            sustain_start: 0,
            sustain_end: 0,
            sustain_type: LoopType::None,
        }
    }
}

impl Sample {
    /// Create a new empty sample.
    pub fn new(name: &str) -> Self {
        let mut sample = Self::default();
        let _ = sample.name.try_push_str(name);
        sample
    }

    /// Create a sample from audio data.
    pub fn with_data(name: &str, data: SampleData) -> Self {
        let mut sample = Self::new(name);
        sample.data = data;
        sample
    }

    /// Builder-style loop setter.
    pub fn looped(mut self, start: u32, end: u32, loop_type: LoopType) -> Self {
        self.loop_start = start;
        self.loop_end = end;
        self.loop_type = loop_type;
        self
    }

    /// Get the length of the sample in frames.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the sample has no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if the sample has a usable loop.
    pub fn has_loop(&self) -> bool {
        self.loop_type != LoopType::None
            && self.loop_end > self.loop_start
            && self.loop_end as usize <= self.len()
    }

    /// Returns true if the sample has a usable sustain loop.
    pub fn has_sustain_loop(&self) -> bool {
        self.sustain_type != LoopType::None
            && self.sustain_end > self.sustain_start
            && self.sustain_end as usize <= self.len()
    }
}

/// Sample audio data.
#[derive(Clone, Debug)]
pub enum SampleData {
    /// 8-bit mono samples
    Mono8(Vec<i8>),
    /// 16-bit mono samples
    Mono16(Vec<i16>),
    /// 8-bit stereo samples (left, right)
    Stereo8(Vec<i8>, Vec<i8>),
    /// 16-bit stereo samples (left, right)
    Stereo16(Vec<i16>, Vec<i16>),
}

impl SampleData {
    /// Get the number of sample frames.
    pub fn len(&self) -> usize {
        match self {
            SampleData::Mono8(v) => v.len(),
            SampleData::Mono16(v) => v.len(),
            SampleData::Stereo8(l, _) => l.len(),
            SampleData::Stereo16(l, _) => l.len(),
        }
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true for two-channel data.
    pub fn is_stereo(&self) -> bool {
        matches!(self, SampleData::Stereo8(..) | SampleData::Stereo16(..))
    }

    /// Get a mono sample value at position (as i16).
    /// For stereo, returns the left channel.
    #[inline]
    pub fn get_mono(&self, pos: usize) -> i16 {
        match self {
            SampleData::Mono8(v) => v.get(pos).copied().unwrap_or(0) as i16 * 256,
            SampleData::Mono16(v) => v.get(pos).copied().unwrap_or(0),
            SampleData::Stereo8(l, _) => l.get(pos).copied().unwrap_or(0) as i16 * 256,
            SampleData::Stereo16(l, _) => l.get(pos).copied().unwrap_or(0),
        }
    }

    /// Get a sample from the right channel (returns left for mono).
    #[inline]
    pub fn get_right(&self, pos: usize) -> i16 {
        match self {
            SampleData::Mono8(v) => v.get(pos).copied().unwrap_or(0) as i16 * 256,
            SampleData::Mono16(v) => v.get(pos).copied().unwrap_or(0),
            SampleData::Stereo8(_, r) => r.get(pos).copied().unwrap_or(0) as i16 * 256,
            SampleData::Stereo16(_, r) => r.get(pos).copied().unwrap_or(0),
        }
    }
}

/// Sample loop type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopType {
    /// No loop
    #[default]
    None,
    /// Forward loop
    Forward,
    /// Ping-pong (bidirectional) loop
    PingPong,
}

/// Convert a C-2 playback rate to a (transpose, finetune) pair relative
/// to 8363 Hz. Finetune is in 1/128 semitone.
pub fn c2spd_to_note(c2spd: u32) -> (i32, i32) {
    if c2spd == 0 {
        return (0, 0);
    }
    let c = (1536.0 * libm::log2(c2spd as f64 / 8363.0)) as i32;
    (c / 128, c % 128)
}
