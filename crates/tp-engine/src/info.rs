//! Read-only snapshots of the playback state.

use heapless::Vec as FixedVec;
use tp_ir::{Event, Module, MAX_CHANNELS};

use crate::scan::Sequence;
use crate::sequencer::Sequencer;

/// State of one module channel after the last tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChannelInfo {
    /// Period in 1/4096 units, 0 when silent
    pub period: i32,
    /// Sample position in frames
    pub position: i32,
    /// Pitch bend in cents
    pub pitchbend: i32,
    /// Key as written in the pattern
    pub note: Option<u8>,
    pub instrument: Option<usize>,
    pub sample: Option<usize>,
    /// Output volume, 0..=64
    pub volume: u8,
    /// Output pan, 0 left to 255 right
    pub pan: u8,
    /// Event read on the current row
    pub event: Event,
}

/// Playback position, timing and per-channel state after a tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameInfo {
    /// Order position
    pub pos: usize,
    pub pattern: usize,
    pub row: usize,
    pub num_rows: usize,
    pub frame: usize,
    pub speed: u32,
    pub bpm: u32,
    /// Elapsed time in milliseconds
    pub time: f64,
    /// Duration of the current subsong in milliseconds
    pub total_time: f64,
    /// Duration of the last tick in milliseconds
    pub frame_time: f64,
    /// Bytes rendered by the last tick
    pub buffer_size: usize,
    /// Capacity of the render buffer in bytes
    pub total_size: usize,
    /// Global volume
    pub volume: i32,
    pub loop_count: u32,
    pub virt_channels: usize,
    /// Virtual channels with a voice
    pub virt_used: usize,
    pub sequence: usize,
    pub channels: FixedVec<ChannelInfo, MAX_CHANNELS>,
}

/// Static facts about the loaded module.
#[derive(Clone, Copy, Debug)]
pub struct ModuleInfo<'a> {
    pub module: &'a Module,
    /// Subsongs found by the scan; the first is the main song
    pub sequences: &'a [Sequence],
}

impl ModuleInfo<'_> {
    /// Duration of the main song in milliseconds.
    pub fn duration(&self) -> f64 {
        self.sequences.first().map_or(0.0, |s| s.duration)
    }
}

impl Sequencer {
    /// Copy the position and channel state into `info`, leaving the
    /// buffer fields to the caller.
    pub(crate) fn fill_frame_info(&self, module: &Module, info: &mut FrameInfo) {
        let clock = &self.clock;
        info.pos = clock.ord;
        info.pattern = module.orders.get(clock.ord).map_or(0, |&p| p as usize);
        info.row = clock.row;
        info.num_rows = self.flow.num_rows;
        info.frame = clock.frame.max(0) as usize;
        info.speed = clock.speed;
        info.bpm = clock.bpm;
        info.time = clock.time;
        info.frame_time = clock.frame_time;
        info.volume = clock.gvol;
        info.loop_count = clock.loop_count;
        info.sequence = clock.sequence;
        info.virt_channels = self.voices.virt_channels();
        info.virt_used = self.voices.used();

        info.channels.clear();
        for (chn, xc) in self.channels.iter().take(self.voices.num_tracks()).enumerate() {
            let sounding = self.voices.voice(chn).is_some();
            let ci = ChannelInfo {
                period: if sounding { xc.report.period } else { 0 },
                position: xc.report.position,
                pitchbend: xc.report.pitchbend,
                note: crate::channel::valid_key(xc.key).map(|k| k as u8),
                instrument: xc.ins,
                sample: xc.smp,
                volume: (xc.report.finalvol >> 4).clamp(0, 64) as u8,
                pan: xc.report.finalpan.clamp(0, 255) as u8,
                event: self.row_events.get(chn).copied().unwrap_or_else(Event::empty),
            };
            if info.channels.push(ci).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlayerConfig;
    use crate::dialect::Dialect;
    use crate::flow::NullTracer;
    use alloc::vec::Vec;
    use tp_ir::{Instrument, Pattern, Sample, SampleData};

    fn module() -> Module {
        let mut m = Module::with_channels("info", 2);
        m.samples.push(Sample::with_data("s", SampleData::Mono8(alloc::vec![64; 4000])));
        m.instruments.push(Instrument::with_sample("i", 0));
        let mut p = Pattern::new(8, 2);
        *p.cell_mut(0, 1) = Event::note(60, 1);
        m.patterns.push(p);
        m.orders.push(0);
        m
    }

    #[test]
    fn snapshot_reports_row_and_channels() {
        let m = module();
        let mut seq = Sequencer::new(&m, Dialect::from_module(&m), &PlayerConfig::default(), Vec::new(), 0, 0, true);
        seq.start(&m, &mut NullTracer);
        seq.tick(&m, &mut NullTracer);

        let mut info = FrameInfo::default();
        seq.fill_frame_info(&m, &mut info);
        assert_eq!((info.pos, info.row, info.frame), (0, 0, 0));
        assert_eq!((info.speed, info.bpm, info.num_rows), (6, 125, 8));
        assert_eq!(info.channels.len(), 2);
        assert_eq!(info.virt_used, 1);

        let idle = info.channels[0];
        assert_eq!((idle.period, idle.volume, idle.note), (0, 0, None));
        let playing = info.channels[1];
        assert_eq!(playing.note, Some(60));
        assert_eq!(playing.instrument, Some(0));
        assert_eq!(playing.volume, 64);
        assert!(playing.period > 0);
        assert_eq!(playing.event, Event::note(60, 1));
    }
}
