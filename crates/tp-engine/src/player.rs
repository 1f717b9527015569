//! Player: the host-facing playback session.
//!
//! A [`Player`] owns the module and its scan. [`Player::start`] opens a
//! session with its own sequencer and mixer; each [`Player::play_frame`]
//! then runs one tick and renders it into the session's PCM buffer.

use tp_ir::{Event, Module};

use crate::config::{Interpolation, OutputFormat, PlayerConfig, PlayerFlags, SampleBits};
use crate::dialect::Dialect;
use crate::effects::{min_bpm, MIN_BPM};
use crate::error::{PlayerError, Result};
use crate::flow::LoopDetector;
use crate::info::{FrameInfo, ModuleInfo};
use crate::mixer::Mixer;
use crate::scan::{scan, ScanResult};
use crate::sequencer::{Reposition, Sequencer, Tick};

/// Outcome of a rendered tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    /// The tick returned to the loop point of the subsong
    Looped,
    /// The module ended; nothing was rendered
    Ended,
}

struct Session {
    config: PlayerConfig,
    sequencer: Sequencer,
    mixer: Mixer,
    detector: LoopDetector,
    /// Bytes of the current tick already copied out by `fill_buffer`
    consumed: usize,
}

impl Session {
    fn render(&mut self, module: &Module) -> Tick {
        self.consumed = 0;
        if self.sequencer.tick(module, &mut self.detector) == Tick::Ended {
            self.mixer.reset();
            return Tick::Ended;
        }
        let bidir = self.sequencer.dialect.bidir_adjust();
        let frame_time = self.sequencer.clock.frame_time;
        self.mixer.mix_tick(module, &mut self.sequencer.voices, bidir, frame_time);
        Tick::Played
    }
}

pub struct Player {
    module: Module,
    dialect: Dialect,
    scan: ScanResult,
    /// Flags the scan ran with
    scan_flags: PlayerFlags,
    session: Option<Session>,
}

impl Player {
    /// Validate `module` and scan it for subsongs and durations.
    pub fn new(module: Module) -> Result<Self> {
        module.validate()?;
        let dialect = Dialect::from_module(&module);
        let config = PlayerConfig::default();
        let scan = scan(&module, dialect, &config)?;
        Ok(Self {
            module,
            dialect,
            scan,
            scan_flags: config.flags,
            session: None,
        })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn scan(&self) -> &ScanResult {
        &self.scan
    }

    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    pub fn module_info(&self) -> ModuleInfo<'_> {
        ModuleInfo { module: &self.module, sequences: &self.scan.sequences }
    }

    /// Open a session playing the main song.
    pub fn start(&mut self, config: PlayerConfig) -> Result<()> {
        config.validate()?;
        if config.flags != self.scan_flags {
            // Timing flags change the durations
            self.scan = scan(&self.module, self.dialect, &config)?;
            self.scan_flags = config.flags;
        }

        let slowest = min_bpm(&self.module).min(MIN_BPM).min(self.module.initial_bpm.max(1) as u32);
        let longest_tick = self.module.time_factor * self.module.refresh_rate / slowest as f64;
        let mixer = Mixer::new(&config, Mixer::frames_for(config.sample_rate, longest_tick));
        let (sequencer, detector) = self.open_sequence(&config, 0);
        tracing::debug!(
            sample_rate = config.sample_rate,
            sequences = self.scan.sequences.len(),
            "player started"
        );
        self.session = Some(Session { config, sequencer, mixer, detector, consumed: 0 });
        Ok(())
    }

    /// Close the session.
    pub fn end(&mut self) {
        if self.session.take().is_some() {
            tracing::debug!("player ended");
        }
    }

    /// Sequencer and loop detector positioned at the entry of `sequence`.
    fn open_sequence(&self, config: &PlayerConfig, sequence: usize) -> (Sequencer, LoopDetector) {
        let s = self.scan.sequences.get(sequence).copied();
        let mut sequencer = Sequencer::new(
            &self.module,
            self.dialect,
            config,
            self.scan.order_info.clone(),
            sequence,
            s.map_or(0, |s| s.entry),
            true,
        );
        let mut detector = LoopDetector::new(s.and_then(|s| s.loop_point));
        sequencer.start(&self.module, &mut detector);
        (sequencer, detector)
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(PlayerError::NotStarted)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(PlayerError::NotStarted)
    }

    /// Play one tick and render it into [`Player::buffer`].
    pub fn play_frame(&mut self) -> Result<PlayState> {
        let module = &self.module;
        let s = self.session.as_mut().ok_or(PlayerError::NotStarted)?;
        let loops = s.sequencer.clock.loop_count;

        #[cfg(feature = "alloc_check")]
        let tick = assert_no_alloc::assert_no_alloc(|| s.render(module));
        #[cfg(not(feature = "alloc_check"))]
        let tick = s.render(module);

        Ok(match tick {
            Tick::Ended => PlayState::Ended,
            Tick::Played if s.sequencer.clock.loop_count > loops => PlayState::Looped,
            Tick::Played => PlayState::Playing,
        })
    }

    /// Fill `out` with PCM, playing as many ticks as needed. With a
    /// nonzero `loop_limit` playback ends once the module has looped that
    /// many times. After the end the rest of `out` is silence.
    pub fn fill_buffer(&mut self, out: &mut [u8], loop_limit: u32) -> Result<PlayState> {
        let mut filled = 0;
        let mut state = PlayState::Playing;
        while filled < out.len() {
            let s = self.session_mut()?;
            if loop_limit > 0 && s.sequencer.clock.loop_count >= loop_limit {
                s.mixer.reset();
                state = PlayState::Ended;
                break;
            }

            let pcm = &s.mixer.buffer()[s.consumed..];
            if pcm.is_empty() {
                match self.play_frame()? {
                    PlayState::Ended => {
                        state = PlayState::Ended;
                        break;
                    }
                    PlayState::Looped => state = PlayState::Looped,
                    PlayState::Playing => {}
                }
                continue;
            }
            let n = pcm.len().min(out.len() - filled);
            out[filled..filled + n].copy_from_slice(&pcm[..n]);
            s.consumed += n;
            filled += n;
        }

        if state == PlayState::Ended {
            let format = self.session()?.config.format;
            fill_silence(&mut out[filled..], format);
        }
        Ok(state)
    }

    /// PCM of the last rendered tick.
    pub fn buffer(&self) -> Result<&[u8]> {
        Ok(self.session()?.mixer.buffer())
    }

    pub fn frame_info(&self) -> Result<FrameInfo> {
        let s = self.session()?;
        let mut info = FrameInfo::default();
        s.sequencer.fill_frame_info(&self.module, &mut info);
        info.total_time = self.scan.duration(info.sequence);
        info.buffer_size = s.mixer.buffer().len();
        info.total_size = s.mixer.capacity_bytes();
        Ok(info)
    }

    // === Positioning ===

    /// Continue at order `ord` from the next tick, switching to the
    /// subsong the order belongs to.
    pub fn set_position(&mut self, ord: usize) -> Result<usize> {
        if ord >= self.module.orders.len() {
            return Err(PlayerError::InvalidPosition(ord));
        }
        let current = self.session()?.sequencer.clock.sequence;
        if let Some(sequence) = self.scan.sequence_of(ord).filter(|&s| s != current) {
            self.switch_sequence(sequence)?;
        }
        let s = self.session_mut()?;
        s.sequencer.request(Reposition::Order(ord));
        s.mixer.reset();
        Ok(ord)
    }

    /// Skip to the next order of the subsong.
    pub fn next_position(&mut self) -> Result<usize> {
        let ord = self.session()?.sequencer.clock.ord;
        if ord + 1 < self.module.orders.len() {
            self.set_position(ord + 1)
        } else {
            Ok(ord)
        }
    }

    /// Back to the previous playable order, or to the subsong entry.
    pub fn prev_position(&mut self) -> Result<usize> {
        let s = self.session()?;
        let (ord, entry) = (s.sequencer.clock.ord, s.sequencer.entry);
        let prev = (entry..ord).rev().find(|&o| self.module.is_playable_order(o)).unwrap_or(entry);
        self.set_position(prev)
    }

    /// Back to the entry point of the current subsong.
    pub fn restart(&mut self) -> Result<()> {
        let s = self.session_mut()?;
        s.sequencer.request(Reposition::Restart);
        s.mixer.reset();
        Ok(())
    }

    /// End playback at the next tick.
    pub fn stop_module(&mut self) -> Result<()> {
        self.session_mut()?.sequencer.request(Reposition::Stop);
        Ok(())
    }

    /// Jump to the order playing at `ms` into the current subsong.
    pub fn seek_time(&mut self, ms: f64) -> Result<usize> {
        let s = self.session()?;
        let (sequence, entry) = (s.sequencer.clock.sequence, s.sequencer.entry);
        let ord = self
            .scan
            .order_info
            .iter()
            .enumerate()
            .filter_map(|(ord, info)| info.map(|i| (ord, i)))
            .filter(|(_, i)| i.sequence == sequence && i.time <= ms)
            .max_by(|(_, a), (_, b)| a.time.total_cmp(&b.time))
            .map_or(entry, |(ord, _)| ord);
        self.set_position(ord)
    }

    /// Play subsong `sequence` from its entry point.
    pub fn set_sequence(&mut self, sequence: usize) -> Result<()> {
        if sequence >= self.scan.sequences.len() {
            return Err(PlayerError::InvalidSequence(sequence));
        }
        self.switch_sequence(sequence)
    }

    fn switch_sequence(&mut self, sequence: usize) -> Result<()> {
        let config = self.session()?.config;
        let (mut sequencer, detector) = self.open_sequence(&config, sequence);
        let s = self.session_mut()?;
        sequencer.muted.clone_from(&s.sequencer.muted);
        sequencer.channel_volume.clone_from(&s.sequencer.channel_volume);
        sequencer.settings = s.sequencer.settings;
        s.sequencer = sequencer;
        s.detector = detector;
        s.mixer.reset();
        tracing::debug!(sequence, "subsong selected");
        Ok(())
    }

    // === Channels and mixing ===

    /// Queue `event` on channel `chn`; it is read at the next row.
    pub fn inject_event(&mut self, chn: usize, event: Event) -> Result<()> {
        let slot = self
            .session_mut()?
            .sequencer
            .injected
            .get_mut(chn)
            .ok_or(PlayerError::InvalidChannel(chn))?;
        *slot = Some(event);
        Ok(())
    }

    /// Mute or unmute a channel. Returns the previous setting.
    pub fn set_channel_mute(&mut self, chn: usize, mute: bool) -> Result<bool> {
        let slot = self
            .session_mut()?
            .sequencer
            .muted
            .get_mut(chn)
            .ok_or(PlayerError::InvalidChannel(chn))?;
        Ok(core::mem::replace(slot, mute))
    }

    /// Set a channel's volume in percent, 0..=100. Returns the previous
    /// volume.
    pub fn set_channel_volume(&mut self, chn: usize, volume: u8) -> Result<u8> {
        let slot = self
            .session_mut()?
            .sequencer
            .channel_volume
            .get_mut(chn)
            .ok_or(PlayerError::InvalidChannel(chn))?;
        let old = core::mem::replace(slot, volume.min(100) as i32);
        Ok(old as u8)
    }

    /// Master volume in percent, 0..=200.
    pub fn set_master_volume(&mut self, volume: u16) -> Result<()> {
        if volume > 200 {
            return Err(PlayerError::InvalidConfig("master volume must be 0..=200"));
        }
        let s = self.session_mut()?;
        s.config.master_volume = volume;
        s.sequencer.settings.master_volume = volume as i32;
        Ok(())
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) -> Result<()> {
        let s = self.session_mut()?;
        s.config.interpolation = interpolation;
        s.mixer.set_interpolation(interpolation);
        Ok(())
    }

    /// Stereo separation in percent, 0..=100.
    pub fn set_stereo_separation(&mut self, separation: u8) -> Result<()> {
        if separation > 100 {
            return Err(PlayerError::InvalidConfig("stereo separation must be 0..=100"));
        }
        let s = self.session_mut()?;
        s.config.stereo_separation = separation;
        s.sequencer.settings.separation = separation as i32;
        Ok(())
    }
}

/// Write the zero level of `format` into `out`.
fn fill_silence(out: &mut [u8], format: OutputFormat) {
    match (format.bits, format.unsigned) {
        (_, false) => out.fill(0),
        (SampleBits::Eight, true) => out.fill(0x80),
        (SampleBits::Sixteen, true) => {
            for (i, b) in out.iter_mut().enumerate() {
                *b = if i % 2 == 1 { 0x80 } else { 0 };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputChannels;
    use alloc::vec;
    use tp_ir::{Effect, Instrument, Pattern, Quirks, Sample, SampleData, ORDER_END};

    /// One channel, a held note from the first row, 4-row patterns.
    fn module(orders: &[u8]) -> Module {
        let mut m = Module::with_channels("player", 1);
        m.samples.push(Sample::with_data("s", SampleData::Mono8(vec![64; 20000])));
        m.instruments.push(Instrument::with_sample("i", 0));
        let mut first = Pattern::new(4, 1);
        *first.cell_mut(0, 0) = Event::note(60, 1);
        m.patterns.push(first);
        m.patterns.push(Pattern::new(4, 1));
        m.orders.extend_from_slice(orders);
        m
    }

    fn started(m: Module) -> Player {
        let mut p = Player::new(m).unwrap();
        p.start(PlayerConfig::default()).unwrap();
        p
    }

    #[test]
    fn rejects_invalid_module() {
        let err = Player::new(Module::new("empty")).err();
        assert!(matches!(err, Some(PlayerError::InvalidModule(_))));
    }

    #[test]
    fn calls_before_start_fail() {
        let mut p = Player::new(module(&[0])).unwrap();
        assert_eq!(p.play_frame(), Err(PlayerError::NotStarted));
        assert_eq!(p.frame_info().err(), Some(PlayerError::NotStarted));
        assert_eq!(p.set_channel_mute(0, true), Err(PlayerError::NotStarted));
    }

    #[test]
    fn start_validates_config() {
        let mut p = Player::new(module(&[0])).unwrap();
        let cfg = PlayerConfig { sample_rate: 1000, ..PlayerConfig::default() };
        assert_eq!(p.start(cfg), Err(PlayerError::InvalidSampleRate(1000)));
        assert!(!p.is_started());
    }

    #[test]
    fn frames_render_whole_ticks() {
        let mut p = started(module(&[0, 1]));
        assert_eq!(p.play_frame(), Ok(PlayState::Playing));
        assert_eq!(p.buffer().unwrap().len(), 882 * 4);
        let info = p.frame_info().unwrap();
        assert_eq!(info.buffer_size, 882 * 4);
        assert!((info.total_time - 960.0).abs() < 1e-6);
        assert!(info.channels[0].volume > 0);
    }

    #[test]
    fn loop_limit_stops_after_one_pass() {
        let mut p = started(module(&[0, 1]));
        let mut out = vec![0u8; 50_000 * 4];
        assert_eq!(p.fill_buffer(&mut out, 1), Ok(PlayState::Ended));
        let sounding = out.chunks_exact(4).filter(|f| f.iter().any(|&b| b != 0)).count();
        // 48 ticks of 882 frames, less the attack ramp
        assert!(sounding <= 48 * 882);
        assert!(sounding >= 48 * 882 - crate::mixer::RAMP_FRAMES);
        assert_eq!(p.fill_buffer(&mut out[..16], 1), Ok(PlayState::Ended));
    }

    #[test]
    fn looping_is_reported() {
        let mut p = started(module(&[0]));
        let states: vec::Vec<PlayState> = (0..25).map(|_| p.play_frame().unwrap()).collect();
        assert!(states[..24].iter().all(|&s| s == PlayState::Playing));
        assert_eq!(states[24], PlayState::Looped);
        assert_eq!(p.frame_info().unwrap().loop_count, 1);
    }

    #[test]
    fn end_marker_pads_with_silence() {
        let mut m = module(&[0, ORDER_END]);
        m.quirks = Quirks::MARKER;
        let mut p = Player::new(m).unwrap();
        let format = OutputFormat { bits: SampleBits::Sixteen, channels: OutputChannels::Mono, unsigned: true };
        p.start(PlayerConfig { format, ..PlayerConfig::default() }).unwrap();
        let mut out = vec![0xaa; 30_000 * 2];
        assert_eq!(p.fill_buffer(&mut out, 0), Ok(PlayState::Ended));
        assert_eq!(&out[out.len() - 2..], &[0x00, 0x80]);
        assert_eq!(p.play_frame(), Ok(PlayState::Ended));
        assert!(p.buffer().unwrap().is_empty());
    }

    #[test]
    fn positioning() {
        let mut p = started(module(&[0, 1, 1]));
        assert_eq!(p.set_position(9), Err(PlayerError::InvalidPosition(9)));
        assert_eq!(p.set_position(2), Ok(2));
        p.play_frame().unwrap();
        assert_eq!(p.frame_info().unwrap().pos, 2);
        assert_eq!(p.prev_position(), Ok(1));
        p.play_frame().unwrap();
        let info = p.frame_info().unwrap();
        assert_eq!((info.pos, info.row), (1, 0));
        // Order time plus the tick just played
        assert!((info.time - 500.0).abs() < 1e-6);
        assert_eq!(p.next_position(), Ok(2));
        p.restart().unwrap();
        p.play_frame().unwrap();
        assert_eq!(p.frame_info().unwrap().pos, 0);
    }

    #[test]
    fn seek_time_picks_the_playing_order() {
        let mut p = started(module(&[0, 1, 1]));
        assert_eq!(p.seek_time(500.0), Ok(1));
        assert_eq!(p.seek_time(0.0), Ok(0));
        assert_eq!(p.seek_time(5000.0), Ok(2));
    }

    #[test]
    fn stop_ends_playback() {
        let mut p = started(module(&[0]));
        p.play_frame().unwrap();
        p.stop_module().unwrap();
        assert_eq!(p.play_frame(), Ok(PlayState::Ended));
        // Repositioning revives a stopped player
        p.set_position(0).unwrap();
        assert_eq!(p.play_frame(), Ok(PlayState::Playing));
    }

    #[test]
    fn subsongs_are_selectable() {
        let mut m = module(&[0, ORDER_END, 1]);
        m.quirks = Quirks::MARKER;
        let mut p = started(m);
        assert_eq!(p.module_info().sequences.len(), 2);
        assert_eq!(p.set_sequence(5), Err(PlayerError::InvalidSequence(5)));
        p.set_sequence(1).unwrap();
        p.play_frame().unwrap();
        let info = p.frame_info().unwrap();
        assert_eq!((info.sequence, info.pos), (1, 2));
        // Seeking into the main song switches back
        p.set_position(0).unwrap();
        p.play_frame().unwrap();
        assert_eq!(p.frame_info().unwrap().sequence, 0);
    }

    #[test]
    fn injected_note_plays_on_the_next_row() {
        let mut p = started(module(&[1]));
        p.play_frame().unwrap();
        assert_eq!(p.frame_info().unwrap().channels[0].note, None);
        assert_eq!(p.inject_event(3, Event::note(60, 1)), Err(PlayerError::InvalidChannel(3)));
        p.inject_event(0, Event::note(48, 1).with_effect(Effect::SetVolume(32))).unwrap();
        for _ in 0..6 {
            p.play_frame().unwrap();
        }
        let ch = p.frame_info().unwrap().channels[0];
        assert_eq!(ch.note, Some(48));
        assert_eq!(ch.volume, 32);
    }

    #[test]
    fn muted_channel_is_silent() {
        let mut p = started(module(&[0]));
        assert_eq!(p.set_channel_mute(0, true), Ok(false));
        assert_eq!(p.set_channel_mute(7, true), Err(PlayerError::InvalidChannel(7)));
        p.play_frame().unwrap();
        assert!(p.buffer().unwrap().iter().all(|&b| b == 0));
        assert_eq!(p.set_channel_mute(0, false), Ok(true));
    }

    #[test]
    fn mixer_settings_are_checked() {
        let mut p = started(module(&[0]));
        assert!(p.set_master_volume(201).is_err());
        assert!(p.set_stereo_separation(101).is_err());
        assert_eq!(p.set_channel_volume(0, 150), Ok(100));
        assert_eq!(p.set_channel_volume(0, 50), Ok(100));
        p.set_interpolation(Interpolation::Spline).unwrap();
        p.set_master_volume(50).unwrap();
        p.play_frame().unwrap();
        // Half channel volume, half master volume
        assert_eq!(p.frame_info().unwrap().channels[0].volume, 16);
    }

    #[test]
    fn end_closes_the_session() {
        let mut p = started(module(&[0]));
        p.end();
        assert_eq!(p.play_frame(), Err(PlayerError::NotStarted));
    }
}
