//! Row and order traversal.
//!
//! The sequencer advances a [`Clock`] one tick at a time. Row changes go
//! through [`FlowControl`], which collects the breaks, jumps, loops and
//! delays requested by the current row. Both live playback and the
//! duration scan drive the same traversal; they differ only in the
//! [`Tracer`] that watches it.

use alloc::vec::Vec;
use bitflags::bitflags;
use tp_ir::Module;

/// Playback position and timing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Clock {
    /// Current order
    pub ord: usize,
    pub row: usize,
    /// Tick within the row, -1 before the first tick
    pub frame: i32,
    /// Ticks per row
    pub speed: u32,
    pub bpm: u32,
    /// Global volume
    pub gvol: i32,
    /// Elapsed time in milliseconds
    pub time: f64,
    /// Duration of the current tick in milliseconds
    pub frame_time: f64,
    /// Times the module has looped back to its loop point
    pub loop_count: u32,
    /// Current subsong
    pub sequence: usize,
}

impl Clock {
    /// Recompute the tick duration after a tempo change.
    pub fn update_frame_time(&mut self, module: &Module) {
        self.frame_time = module.time_factor * module.refresh_rate / self.bpm.max(1) as f64;
    }
}

bitflags! {
    /// IT row delay state.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct RowDelay: u8 {
        /// A row delay is running
        const ON = 1 << 0;
        /// Set during the first tick of the delayed row only
        const FIRST_FRAME = 1 << 1;
    }
}

/// Pattern loop mark of one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatternLoop {
    /// Row the loop jumps back to
    pub start: usize,
    /// Repetitions left, 0 when idle
    pub count: u32,
}

/// Flow changes requested by the rows read so far.
#[derive(Clone, Debug, Default)]
pub struct FlowControl {
    /// Leave the pattern at the end of this row
    pub pbreak: bool,
    /// Order to continue at when breaking
    pub jump: Option<usize>,
    /// Row to start the next pattern at
    pub jumpline: usize,
    /// Pattern delay: extra row lengths to hold the current row
    pub delay: u32,
    /// IT row delay: ticks to repeat the row without reading it
    pub rowdelay: u32,
    pub rowdelay_set: RowDelay,
    /// Channel whose loop fires at the end of this row, plus one
    pub loop_chn: usize,
    pub loops: Vec<PatternLoop>,
    /// Rows in the current pattern
    pub num_rows: usize,
    /// Playback stopped: end marker, stop request or nothing playable
    pub halted: bool,
}

impl FlowControl {
    pub fn new(channels: usize) -> Self {
        Self {
            loops: alloc::vec![PatternLoop::default(); channels],
            ..Self::default()
        }
    }

    /// Drop all pending flow requests.
    pub fn reset(&mut self) {
        self.jumpline = 0;
        self.jump = None;
        self.pbreak = false;
        self.loop_chn = 0;
        self.delay = 0;
        self.rowdelay = 0;
        self.rowdelay_set = RowDelay::empty();
    }

    /// True while some channel is repeating a pattern loop.
    pub fn in_loop(&self) -> bool {
        self.loop_chn != 0 || self.loops.iter().any(|l| l.count > 0)
    }

    /// True if the current row repeats without re-reading events.
    pub fn row_is_delayed(&self) -> bool {
        !self.rowdelay_set.is_empty()
            && !(self.rowdelay_set.contains(RowDelay::FIRST_FRAME) && self.rowdelay > 0)
    }
}

/// Observer of the traversal.
///
/// Playback uses it to count loops; the scan uses it to record order
/// timing and to find the point where the module starts repeating.
pub trait Tracer {
    /// First tick of a row, before its events are read. Returns `false`
    /// to stop the traversal.
    fn row(&mut self, clock: &mut Clock, flow: &FlowControl) -> bool;

    /// A new order was entered.
    fn order(&mut self, _clock: &Clock) {}

    /// Playback was repositioned to order `ord`.
    fn seek(&mut self, _ord: usize, _entry: usize) {}
}

/// Tracer that observes nothing.
pub struct NullTracer;

impl Tracer for NullTracer {
    fn row(&mut self, _clock: &mut Clock, _flow: &FlowControl) -> bool {
        true
    }
}

/// Loop point of a subsong: the row the module returns to once it has
/// played through, and how often the scan saw it before repeating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopPoint {
    pub ord: usize,
    pub row: usize,
    pub visits: u32,
}

/// Playback tracer: counts passes through the loop point.
#[derive(Clone, Copy, Debug)]
pub struct LoopDetector {
    point: Option<LoopPoint>,
    /// Visits left before the next pass counts as a loop
    end_point: u32,
}

impl LoopDetector {
    pub fn new(point: Option<LoopPoint>) -> Self {
        Self { point, end_point: point.map_or(0, |p| p.visits) }
    }
}

impl Tracer for LoopDetector {
    fn row(&mut self, clock: &mut Clock, flow: &FlowControl) -> bool {
        // Row delay repeats are not arrivals
        if flow.rowdelay_set.contains(RowDelay::ON) {
            return true;
        }
        if let Some(p) = self.point {
            if clock.ord == p.ord && clock.row == p.row {
                if self.end_point == 0 {
                    clock.loop_count += 1;
                    self.end_point = p.visits;
                    tracing::debug!(loops = clock.loop_count, "module looped");
                }
                self.end_point = self.end_point.saturating_sub(1);
            }
        }
        true
    }

    fn seek(&mut self, ord: usize, entry: usize) {
        let Some(p) = self.point else { return };
        if ord == entry {
            self.end_point = p.visits;
        }
        if ord > p.ord {
            self.end_point = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_at(ord: usize, row: usize) -> Clock {
        Clock { ord, row, ..Clock::default() }
    }

    #[test]
    fn loop_detector_counts_second_arrival() {
        let flow = FlowControl::new(1);
        let mut t = LoopDetector::new(Some(LoopPoint { ord: 0, row: 0, visits: 1 }));
        let mut c = clock_at(0, 0);
        t.row(&mut c, &flow);
        assert_eq!(c.loop_count, 0);
        t.row(&mut c, &flow);
        assert_eq!(c.loop_count, 1);
        t.row(&mut c, &flow);
        assert_eq!(c.loop_count, 2);
    }

    #[test]
    fn loop_detector_ignores_other_rows() {
        let flow = FlowControl::new(1);
        let mut t = LoopDetector::new(Some(LoopPoint { ord: 1, row: 4, visits: 1 }));
        let mut c = clock_at(1, 3);
        for _ in 0..4 {
            t.row(&mut c, &flow);
        }
        assert_eq!(c.loop_count, 0);
    }

    #[test]
    fn seeking_past_loop_point_arms_the_count() {
        let flow = FlowControl::new(1);
        let mut t = LoopDetector::new(Some(LoopPoint { ord: 1, row: 0, visits: 1 }));
        t.seek(3, 0);
        let mut c = clock_at(1, 0);
        t.row(&mut c, &flow);
        assert_eq!(c.loop_count, 1);
    }

    #[test]
    fn delayed_row_detection() {
        let mut f = FlowControl::new(2);
        assert!(!f.row_is_delayed());
        f.rowdelay_set = RowDelay::ON | RowDelay::FIRST_FRAME;
        f.rowdelay = 2;
        assert!(!f.row_is_delayed());
        f.rowdelay_set = RowDelay::ON;
        assert!(f.row_is_delayed());
    }

    #[test]
    fn in_loop_tracks_counters() {
        let mut f = FlowControl::new(2);
        assert!(!f.in_loop());
        f.loops[1].count = 3;
        assert!(f.in_loop());
        f.reset();
        assert!(f.in_loop());
        f.loops[1].count = 0;
        assert!(!f.in_loop());
    }
}
