//! Duration scan and subsong detection.
//!
//! The scan replays the module through a [`Sequencer`] with a tracer that
//! counts row visits. A row reached a second time outside a pattern loop
//! is the loop point of the subsong and ends the scan. Orders the scan
//! never reached become the entry points of further subsongs.

use alloc::vec::Vec;
use tp_ir::Module;

use crate::config::PlayerConfig;
use crate::dialect::Dialect;
use crate::error::{PlayerError, Result};
use crate::flow::{Clock, FlowControl, LoopPoint, RowDelay, Tracer};
use crate::sequencer::{Sequencer, Tick};

/// Upper bound on detected subsongs.
pub const MAX_SEQUENCES: usize = 16;
/// Rows one order entry may play before the scan gives up on it.
pub const MAX_ORDER_ROWS: u32 = 4096;
/// Rows a whole subsong may play.
pub const MAX_TOTAL_ROWS: u32 = 512_000;

/// Playback state on entering an order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrderInfo {
    pub speed: u32,
    pub bpm: u32,
    pub gvol: i32,
    /// Elapsed time in milliseconds
    pub time: f64,
    /// Row the order was entered at
    pub start_row: usize,
    /// Subsong the order belongs to
    pub sequence: usize,
}

/// A subsong: an entry order and how long it plays until it loops.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sequence {
    pub entry: usize,
    /// Duration in milliseconds
    pub duration: f64,
    /// Where the subsong loops, `None` if it ends
    pub loop_point: Option<LoopPoint>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanResult {
    pub sequences: Vec<Sequence>,
    /// Indexed by order
    pub order_info: Vec<Option<OrderInfo>>,
}

impl ScanResult {
    /// Total duration of a subsong in milliseconds.
    pub fn duration(&self, sequence: usize) -> f64 {
        self.sequences.get(sequence).map_or(0.0, |s| s.duration)
    }

    /// Subsong that order `ord` belongs to, if the scan reached it.
    pub fn sequence_of(&self, ord: usize) -> Option<usize> {
        self.order_info.get(ord).copied().flatten().map(|i| i.sequence)
    }
}

struct Scanner<'a> {
    /// First visit counter of each order
    offsets: Vec<usize>,
    visits: Vec<u32>,
    order_info: &'a mut [Option<OrderInfo>],
    loop_point: Option<LoopPoint>,
    order_rows: u32,
    total_rows: u32,
}

impl<'a> Scanner<'a> {
    fn new(module: &Module, order_info: &'a mut [Option<OrderInfo>]) -> Self {
        let mut offsets = Vec::with_capacity(module.orders.len());
        let mut total = 0;
        for ord in 0..module.orders.len() {
            offsets.push(total);
            total += module.pattern_at(ord).map_or(0, |p| (p.rows as usize).max(1));
        }
        Self {
            offsets,
            visits: alloc::vec![0; total],
            order_info,
            loop_point: None,
            order_rows: 0,
            total_rows: 0,
        }
    }

    fn counter(&mut self, ord: usize, row: usize) -> Option<&mut u32> {
        let start = *self.offsets.get(ord)?;
        let end = self.offsets.get(ord + 1).copied().unwrap_or(self.visits.len());
        if start + row >= end {
            return None;
        }
        self.visits.get_mut(start + row)
    }
}

impl Tracer for Scanner<'_> {
    fn row(&mut self, clock: &mut Clock, flow: &FlowControl) -> bool {
        if flow.rowdelay_set.contains(RowDelay::ON) {
            return true;
        }

        self.order_rows += 1;
        self.total_rows += 1;
        if self.order_rows > MAX_ORDER_ROWS || self.total_rows > MAX_TOTAL_ROWS {
            tracing::warn!(ord = clock.ord, row = clock.row, "scan row limit reached");
            return false;
        }

        let (ord, row) = (clock.ord, clock.row);
        let in_loop = flow.in_loop();
        let Some(visits) = self.counter(ord, row) else { return true };
        if *visits > 0 && !in_loop {
            let visits = *visits;
            self.loop_point = Some(LoopPoint { ord, row, visits });
            return false;
        }
        *visits += 1;
        true
    }

    fn order(&mut self, clock: &Clock) {
        self.order_rows = 0;
        if let Some(slot @ None) = self.order_info.get_mut(clock.ord) {
            *slot = Some(OrderInfo {
                speed: clock.speed,
                bpm: clock.bpm,
                gvol: clock.gvol,
                time: clock.time,
                start_row: clock.row,
                sequence: clock.sequence,
            });
        }
    }
}

/// Play subsong `sequence` from `entry` without mixing. `None` if
/// nothing is playable from `entry`.
fn scan_sequence(
    module: &Module,
    dialect: Dialect,
    config: &PlayerConfig,
    order_info: &mut [Option<OrderInfo>],
    sequence: usize,
    entry: usize,
) -> Option<Sequence> {
    let mut seq = Sequencer::new(module, dialect, config, Vec::new(), sequence, entry, false);
    let mut tracer = Scanner::new(module, order_info);
    seq.start(module, &mut tracer);
    if seq.is_halted() {
        return None;
    }
    let entry = seq.clock().ord;
    while seq.tick(module, &mut tracer) == Tick::Played {}

    Some(Sequence {
        entry,
        duration: seq.clock().time,
        loop_point: tracer.loop_point,
    })
}

/// Scan every subsong of the module.
pub fn scan(module: &Module, dialect: Dialect, config: &PlayerConfig) -> Result<ScanResult> {
    let mut order_info = alloc::vec![None; module.orders.len()];
    let mut sequences = Vec::new();
    let mut entry = 0;

    while sequences.len() < MAX_SEQUENCES && entry < module.orders.len() {
        let index = sequences.len();
        match scan_sequence(module, dialect, config, &mut order_info, index, entry) {
            Some(s) => {
                if index > 0 {
                    tracing::debug!(sequence = index, entry = s.entry, "subsong found");
                }
                sequences.push(s);
                entry = s.entry + 1;
            }
            None if index == 0 => break,
            None => entry += 1,
        }
        // Next entry: the first playable order no subsong has reached
        while entry < module.orders.len()
            && (!module.is_playable_order(entry) || order_info[entry].is_some())
        {
            entry += 1;
        }
    }

    if sequences.is_empty() {
        tracing::warn!("scan found no playable order");
        return Err(PlayerError::NoValidOrders);
    }
    tracing::debug!(
        sequences = sequences.len(),
        duration_ms = sequences[0].duration,
        "scan complete"
    );
    Ok(ScanResult { sequences, order_info })
}
