//! Sequencer: the per-tick driver.
//!
//! Each tick the sequencer advances the clock, reads the row on its
//! first tick, and updates every virtual channel, leaving the voice pool
//! ready for the mixer. The scan runs the same sequencer without mixing.

use alloc::vec::Vec;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use tp_ir::{Effect, Event, Instrument, Module, Note, Quirks};

use crate::channel::{valid_key, ChannelState, FxFlags};
use crate::config::{OutputChannels, PlayerConfig, PlayerFlags};
use crate::dialect::Dialect;
use crate::flow::{Clock, FlowControl, Tracer};
use crate::scan::OrderInfo;
use crate::voice_pool::VoicePool;

/// Mixing parameters the channel updates depend on.
#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    pub sample_rate: u32,
    /// Master volume in percent
    pub master_volume: i32,
    /// Stereo separation in percent
    pub separation: i32,
    pub mono: bool,
    pub flags: PlayerFlags,
}

impl From<&PlayerConfig> for SessionSettings {
    fn from(config: &PlayerConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            master_volume: config.master_volume as i32,
            separation: config.stereo_separation as i32,
            mono: config.format.channels == OutputChannels::Mono,
            flags: config.flags,
        }
    }
}

/// Pending position change, applied at the start of the next tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reposition {
    Order(usize),
    /// Back to the entry point of the current subsong
    Restart,
    /// Stop playback
    Stop,
}

/// Outcome of one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Played,
    Ended,
}

pub struct Sequencer {
    pub(crate) dialect: Dialect,
    pub(crate) settings: SessionSettings,
    pub(crate) clock: Clock,
    pub(crate) flow: FlowControl,
    /// One per virtual channel
    pub(crate) channels: Vec<ChannelState>,
    pub(crate) voices: VoicePool,
    /// Track mute switches
    pub(crate) muted: Vec<bool>,
    /// Track volume in percent
    pub(crate) channel_volume: Vec<i32>,
    /// Host events waiting for the next row
    pub(crate) injected: Vec<Option<Event>>,
    /// Event each track read on the current row
    pub(crate) row_events: Vec<Event>,
    /// Per-order timing from the scan
    pub(crate) order_info: Vec<Option<OrderInfo>>,
    /// First order of the current subsong
    pub(crate) entry: usize,
    pending: Option<Reposition>,
    pub(crate) rng: Pcg32,
}

impl Sequencer {
    /// Sequencer for subsong `sequence` starting at order `entry`. With
    /// `background` off, new-note actions always cut.
    pub fn new(
        module: &Module,
        dialect: Dialect,
        config: &PlayerConfig,
        order_info: Vec<Option<OrderInfo>>,
        sequence: usize,
        entry: usize,
        background: bool,
    ) -> Self {
        let num_tracks = module.num_channels();
        let voices = VoicePool::new(
            num_tracks,
            config.max_voices,
            background && dialect.has(Quirks::VIRTUAL),
        );
        let virt = voices.virt_channels();
        Self {
            dialect,
            settings: SessionSettings::from(config),
            clock: Clock { sequence, ..Clock::default() },
            flow: FlowControl::new(virt),
            channels: alloc::vec![ChannelState::default(); virt],
            voices,
            muted: module.channels.iter().map(|c| c.muted).collect(),
            channel_volume: alloc::vec![100; num_tracks],
            injected: alloc::vec![None; num_tracks],
            row_events: alloc::vec![Event::empty(); num_tracks],
            order_info,
            entry,
            pending: None,
            rng: Pcg32::seed_from_u64(config.seed),
        }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn voices(&self) -> &VoicePool {
        &self.voices
    }

    pub fn is_halted(&self) -> bool {
        self.flow.halted
    }

    /// Queue a position change for the next tick.
    pub fn request(&mut self, r: Reposition) {
        self.pending = Some(r);
    }

    /// Rewind to the subsong entry point with fresh channel state.
    pub fn start(&mut self, module: &Module, tracer: &mut impl Tracer) {
        let sequence = self.clock.sequence;
        self.clock = Clock {
            frame: -1,
            gvol: module.volume_base as i32,
            sequence,
            ..Clock::default()
        };
        self.pending = None;
        self.flow.halted = false;

        let len = module.orders.len();
        let mut ord = self.entry;
        while ord < len && !module.is_playable_order(ord) {
            ord += 1;
        }
        self.clock.ord = ord;
        match module.pattern_at(ord) {
            Some(p) => self.flow.num_rows = (p.rows as usize).max(1),
            None => {
                tracing::warn!(entry = self.entry, "no playable order");
                self.flow.halted = true;
                self.flow.num_rows = 0;
            }
        }

        self.update_from_order_info(module);
        self.voices.reset();
        self.flow.reset();
        self.flow.loops.iter_mut().for_each(|l| *l = Default::default());
        self.reset_channels(module);
        self.injected.fill(None);
        self.row_events.fill(Event::empty());
        if !self.flow.halted {
            tracer.order(&self.clock);
        }
        tracing::debug!(ord, sequence, "sequencer started");
    }

    /// Timing recorded for `ord`, or the module defaults.
    fn order_defaults(&self, module: &Module, ord: usize) -> OrderInfo {
        self.order_info.get(ord).copied().flatten().unwrap_or(OrderInfo {
            speed: module.initial_speed as u32,
            bpm: module.initial_bpm as u32,
            gvol: module.global_volume as i32,
            time: 0.0,
            start_row: 0,
            sequence: self.clock.sequence,
        })
    }

    fn update_from_order_info(&mut self, module: &Module) {
        let info = self.order_defaults(module, self.clock.ord);
        if info.speed != 0 {
            self.clock.speed = info.speed;
        }
        self.clock.speed = self.clock.speed.max(1);
        self.clock.bpm = info.bpm.max(1);
        self.clock.gvol = info.gvol;
        self.clock.time = info.time;
        self.clock.update_frame_time(module);
    }

    /// Reset every virtual channel, then apply the module's track
    /// settings to the tracks.
    pub(crate) fn reset_channels(&mut self, module: &Module) {
        let volbase = module.volume_base as i32;
        for xc in self.channels.iter_mut() {
            *xc = ChannelState::new(volbase);
        }
        for (xc, settings) in self.channels.iter_mut().zip(&module.channels) {
            xc.mastervol = settings.volume as i32;
            xc.pan.val = settings.pan as i32;
            xc.pan.surround = settings.surround;
            xc.filter.cutoff = 0xff;
        }
    }

    /// Advance one tick.
    pub fn tick(&mut self, module: &Module, tracer: &mut impl Tracer) -> Tick {
        // A reposition revives a halted sequencer
        if let Some(r) = self.pending.take() {
            let target = match r {
                Reposition::Stop => {
                    tracing::debug!("playback stopped");
                    self.flow.halted = true;
                    return Tick::Ended;
                }
                Reposition::Restart => self.entry,
                Reposition::Order(ord) => ord,
            };
            tracing::debug!(ord = target, "repositioning");
            tracer.seek(target, self.entry);
            self.flow.halted = false;
            self.flow.reset();
            self.flow.loops.iter_mut().for_each(|l| *l = Default::default());
            self.enter_order(module, tracer, target.max(self.entry));
            if self.flow.halted {
                return Tick::Ended;
            }
            self.update_from_order_info(module);
            self.voices.reset();
            self.reset_channels(module);
        } else if self.flow.halted {
            return Tick::Ended;
        } else {
            self.clock.frame += 1;
            let row_ticks = self.clock.speed * (1 + self.flow.delay);
            if self.clock.frame >= row_ticks as i32 {
                // A break during a pattern delay skips a row
                if self.dialect.has(Quirks::PROTRACK) && self.flow.delay != 0 && self.flow.pbreak {
                    self.next_row(module, tracer);
                    if !tracer.row(&mut self.clock, &self.flow) {
                        return Tick::Ended;
                    }
                }
                self.next_row(module, tracer);
            }
        }
        if self.flow.halted {
            return Tick::Ended;
        }

        let num_tracks = self.voices.num_tracks();
        for xc in self.channels.iter_mut().take(num_tracks) {
            xc.flags.remove(FxFlags::KEY_OFF);
        }

        if self.clock.frame == 0 {
            if !tracer.row(&mut self.clock, &self.flow) {
                return Tick::Ended;
            }
            self.read_row(module);
            for chn in 0..num_tracks {
                if let Some(ev) = self.injected[chn].take() {
                    self.row_events[chn] = ev;
                    self.read_event(module, &ev, chn);
                }
            }
        }

        for chn in 0..self.channels.len() {
            self.play_channel(module, chn);
        }

        self.flow.rowdelay_set.remove(crate::flow::RowDelay::FIRST_FRAME);
        self.clock.update_frame_time(module);
        self.clock.time += self.clock.frame_time;
        Tick::Played
    }

    fn next_row(&mut self, module: &Module, tracer: &mut impl Tracer) {
        self.clock.frame = 0;
        self.flow.delay = 0;

        if self.flow.pbreak {
            self.flow.pbreak = false;
            match self.flow.jump.take() {
                Some(ord) => {
                    tracing::trace!(ord, row = self.flow.jumpline, "position jump");
                    self.enter_order(module, tracer, ord);
                }
                None => {
                    tracing::trace!(row = self.flow.jumpline, "pattern break");
                    self.next_order(module, tracer);
                }
            }
            return;
        }

        if self.flow.rowdelay == 0 {
            self.clock.row += 1;
            self.flow.rowdelay_set = Default::default();
        } else {
            self.flow.rowdelay -= 1;
        }

        if self.flow.loop_chn != 0 {
            let chn = self.flow.loop_chn - 1;
            self.flow.loop_chn = 0;
            if let Some(l) = self.flow.loops.get(chn) {
                tracing::trace!(row = l.start, left = l.count, "pattern loop");
                self.clock.row = l.start;
            }
        }

        if self.clock.row >= self.flow.num_rows {
            self.next_order(module, tracer);
        }
    }

    fn next_order(&mut self, module: &Module, tracer: &mut impl Tracer) {
        self.enter_order(module, tracer, self.clock.ord + 1);
    }

    /// Order to continue from after the last order.
    fn restart_order(&self, module: &Module) -> usize {
        let rst = module.restart;
        let same_sequence = self
            .order_info
            .get(rst)
            .copied()
            .flatten()
            .map_or(true, |info| info.sequence == self.clock.sequence);
        if rst >= self.entry && module.is_playable_order(rst) && same_sequence {
            rst
        } else {
            if rst != 0 && !module.is_playable_order(rst) {
                tracing::warn!(restart = rst, "invalid restart position");
            }
            self.entry
        }
    }

    /// Move to the first playable order at or after `ord`, wrapping to
    /// the restart position at the end of the order list.
    fn enter_order(&mut self, module: &Module, tracer: &mut impl Tracer, mut ord: usize) {
        let len = module.orders.len();
        let mut reset_gvol = false;
        let mut skipped = 0;
        loop {
            if module.is_end_marker(ord) {
                tracing::debug!(ord, "end marker reached");
                self.clock.ord = ord;
                self.flow.halted = true;
                return;
            }
            if ord >= len {
                ord = self.restart_order(module);
                reset_gvol = true;
                tracing::trace!(ord, "order list wrapped");
            }
            if module.is_playable_order(ord) {
                break;
            }
            ord += 1;
            skipped += 1;
            if skipped > len {
                self.flow.halted = true;
                return;
            }
        }

        self.clock.ord = ord;
        if let Some(info) = self.order_info.get(ord).copied().flatten() {
            if info.sequence == self.clock.sequence {
                if reset_gvol {
                    self.clock.gvol = info.gvol;
                }
                self.clock.time = info.time;
            }
        }
        // A 0-row pattern plays as one empty row
        self.flow.num_rows = module.pattern_at(ord).map_or(0, |p| (p.rows as usize).max(1));
        if self.flow.jumpline >= self.flow.num_rows {
            self.flow.jumpline = 0;
        }
        self.clock.row = self.flow.jumpline;
        self.flow.jumpline = 0;
        self.clock.frame = 0;
        tracer.order(&self.clock);
    }

    fn read_row(&mut self, module: &Module) {
        let Some(pattern) = module.pattern_at(self.clock.ord) else { return };
        let row = self.clock.row;
        for chn in 0..self.voices.num_tracks() {
            let mut ev = pattern.get(row, chn).copied().unwrap_or_else(Event::empty);
            self.row_events[chn] = ev;

            // Key off with a note delay
            if ev.note == Note::Off {
                if let Some(tp_ir::ExtendedCommand::NoteDelay(d)) = ev.effect.extended() {
                    let env_on = instrument(module, ev.instrument)
                        .is_some_and(|i| i.volume_envelope.enabled);
                    if ev.instrument != 0 && (d != 0 || env_on) {
                        if d != 0 {
                            ev.note = Note::None;
                        }
                        ev.effect = Effect::None;
                    }
                }
            }

            if !self.check_delay(&ev, chn) {
                if !self.flow.row_is_delayed() {
                    self.read_event(module, &ev, chn);
                }
            } else if self.dialect.is_it() {
                self.channels[chn].flags = FxFlags::empty();
            }
        }
    }

    /// Latch a note-delayed event. Speed changes on the row apply first
    /// since the delay is counted in ticks.
    fn check_delay(&mut self, ev: &Event, chn: usize) -> bool {
        for fx in [ev.effect, ev.effect2] {
            match fx {
                Effect::SetSpeed(p) | Effect::S3mSpeed(p) if p != 0 && p < 0x20 => {
                    self.clock.speed = p as u32;
                }
                Effect::S3mSpeed(p) if p != 0 => self.clock.speed = p as u32,
                _ => {}
            }
        }

        let Some(delay) = ev.effect.note_delay().or_else(|| ev.effect2.note_delay()) else {
            return false;
        };
        let rtdelay = self.dialect.has(Quirks::RTDELAY);
        let xc = &mut self.channels[chn];
        xc.delay = delay as u32 + 1;
        xc.delayed_event = *ev;
        if ev.instrument != 0 {
            xc.delayed_ins = ev.instrument;
        }
        if rtdelay {
            if ev.volume == 0 && ev.effect2 == Effect::None && ev.instrument == 0 && ev.note != Note::Off {
                xc.delayed_event.volume = (xc.volume + 1).clamp(1, 255) as u8;
            }
            if ev.note == Note::None {
                if let Some(key) = valid_key(xc.key) {
                    xc.delayed_event.note = Note::On(key as u8);
                }
            }
            if ev.instrument == 0 {
                xc.delayed_event.instrument = xc.old_ins;
            }
        }
        true
    }
}

/// Instrument for a 1-based pattern instrument number.
pub(crate) fn instrument(module: &Module, number: u8) -> Option<&Instrument> {
    (number as usize).checked_sub(1).and_then(|i| module.instruments.get(i))
}
