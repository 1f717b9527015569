//! IT MIDI macro interpreter.
//!
//! A macro is hex text with placeholder letters. Impulse Tracker only
//! acts on its internal `F0 F0 cc vv` messages: command 0 sets the filter
//! cutoff and command 1 the resonance. Every other byte is MIDI traffic
//! for an external synth and is skipped, apart from the real-time
//! statuses that reset the filter.

use tp_ir::{MacroText, Module, Quirks};

use crate::channel::{ChannelState, FxFlags};
use crate::sequencer::Sequencer;

/// Placeholder values of one macro run.
#[derive(Clone, Copy, Debug, Default)]
struct Placeholders {
    /// `z`: macro parameter
    param: u8,
    /// `n`: key
    key: u8,
    /// `h`: channel
    chn: u8,
    /// `o`: sample offset memory
    offset: u8,
    /// `m`: playing backwards
    reverse: u8,
    /// `v`: note velocity
    velocity: u8,
    /// `u`: computed velocity
    finalvol: u8,
    /// `x`: note pan
    notepan: u8,
    /// `y`: computed pan
    finalpan: u8,
}

/// Nibble reader over the macro text.
struct MacroStream<'a> {
    text: &'a [u8],
    pos: usize,
    /// Low nibble of an expanded placeholder
    pending: Option<u8>,
    vars: Placeholders,
}

impl<'a> MacroStream<'a> {
    fn new(text: &'a str, vars: Placeholders) -> Self {
        Self { text: text.as_bytes(), pos: 0, pending: None, vars }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn nibble(&mut self) -> Option<u8> {
        if let Some(n) = self.pending.take() {
            return Some(n);
        }
        while let Some(&c) = self.text.get(self.pos) {
            self.pos += 1;
            let v = &self.vars;
            let byte = match c {
                b'0'..=b'9' => return Some(c - b'0'),
                b'A'..=b'F' => return Some(c - b'A' + 10),
                b'z' => v.param,
                b'n' => v.key & 0x7f,
                b'h' => v.chn,
                b'o' => v.offset,
                b'm' => v.reverse,
                b'v' => v.velocity,
                b'u' => v.finalvol,
                b'x' => v.notepan,
                b'y' => v.finalpan,
                // Bank, program and checksum expand to zero
                b'a' | b'b' | b'p' | b's' => 0,
                b'c' => return Some(0),
                _ => continue,
            };
            self.pending = Some(byte & 0x0f);
            return Some(byte >> 4);
        }
        None
    }

    fn byte(&mut self) -> Option<u8> {
        let hi = self.nibble()?;
        let lo = self.nibble()?;
        Some(hi << 4 | lo)
    }
}

fn apply_macro_effect(xc: &mut ChannelState, command: u8, val: u8) {
    match command {
        0 => xc.filter.cutoff = (val as i32) << 1,
        1 => xc.filter.resonance = (val as i32) << 1,
        _ => {}
    }
}

fn execute_macro(xc: &mut ChannelState, text: &MacroText, vars: Placeholders) {
    let mut stream = MacroStream::new(text.as_str(), vars);
    while !stream.at_end() {
        let mut command = None;
        let mut byte = stream.byte();
        if byte == Some(0xf0) {
            byte = stream.byte();
            if let Some(b @ (0xf0 | 0xf1)) = byte {
                command = Some(b & 0x0f);
            }
        }
        let Some(command) = command else {
            // Real-time statuses reset the filter wherever they appear
            if matches!(byte, Some(0xfa | 0xfc | 0xff)) {
                apply_macro_effect(xc, 0, 127);
                apply_macro_effect(xc, 1, 0);
            }
            continue;
        };
        let (Some(cmd), Some(val)) = (stream.byte(), stream.byte()) else { continue };
        if command == 0 && cmd < 0x80 && val < 0x80 {
            apply_macro_effect(xc, cmd, val);
        }
    }
}

impl Sequencer {
    fn placeholders(&self, module: &Module, chn: usize, param: u8) -> Placeholders {
        let xc = &self.channels[chn];
        let ins_volume = xc
            .ins
            .and_then(|i| module.instruments.get(i))
            .map_or(0x40, |i| i.volume as u64);
        let velocity = (self.clock.gvol.max(0) as u64
            * xc.volume.max(0) as u64
            * xc.mastervol.max(0) as u64
            * xc.gvl.max(0) as u64
            * ins_volume)
            >> 24;
        Placeholders {
            param,
            key: xc.key.max(0) as u8,
            chn: chn as u8,
            offset: xc.offset.memory,
            reverse: self.voices.voice(chn).is_some_and(|v| v.backward) as u8,
            velocity: velocity.clamp(1, 127) as u8,
            finalvol: (xc.macro_state.finalvol >> 3).clamp(1, 127) as u8,
            notepan: (xc.macro_state.notepan >> 1).clamp(0, 127) as u8,
            finalpan: (xc.report.finalpan >> 1).clamp(0, 127) as u8,
        }
    }

    /// Run the channel's active macro. Plain macros fire on the first tick
    /// only, smooth macros step towards their target every tick.
    pub(crate) fn update_midi_macro(&mut self, module: &Module, chn: usize) {
        let frame = self.clock.frame;
        let xc = &mut self.channels[chn];
        if !xc.flags.contains(FxFlags::MIDI_MACRO) || !self.dialect.has(Quirks::FILTER) {
            return;
        }

        let m = &mut xc.macro_state;
        if m.slide > 0.0 {
            m.val += m.slide;
            if m.val > m.target {
                m.val = m.target;
                m.slide = 0.0;
            }
        } else if m.slide < 0.0 {
            m.val += m.slide;
            if m.val < m.target {
                m.val = m.target;
                m.slide = 0.0;
            }
        } else if frame != 0 {
            return;
        }

        let val = m.val as i32;
        let active = m.active as usize;
        let vars = self.placeholders(module, chn, val.clamp(0, 0xff) as u8);
        let xc = &mut self.channels[chn];
        match (&module.midi_macros, val) {
            (Some(macros), 0x80..) => {
                if let Some(text) = macros.fixed.get(val as usize - 0x80) {
                    execute_macro(xc, text, vars);
                }
            }
            // Without a macro table Z80-Z8F set the resonance
            (None, 0x80..=0x8f) => apply_macro_effect(xc, 1, ((val - 0x80) << 3) as u8),
            (None, 0x80..) => {}
            (Some(macros), _) => {
                if let Some(text) = macros.param.get(active) {
                    execute_macro(xc, text, vars);
                }
            }
            // and SF0 drives the cutoff
            (None, _) if active == 0 => apply_macro_effect(xc, 0, val.max(0) as u8),
            (None, _) => {}
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
    use tp_ir::{Effect, Event, MidiMacros, Pattern, ReadEventType};

    fn run(text: &str, param: u8) -> ChannelState {
        let mut xc = ChannelState::default();
        let mut t = MacroText::new();
        let _ = t.try_push_str(text);
        execute_macro(&mut xc, &t, Placeholders { param, ..Placeholders::default() });
        xc
    }

    #[test]
    fn internal_cutoff_message() {
        let xc = run("F0F000z", 0x40);
        assert_eq!(xc.filter.cutoff, 0x80);
    }

    #[test]
    fn resonance_message_with_spaces() {
        let xc = run("F0 F0 01 20", 0);
        assert_eq!(xc.filter.resonance, 0x40);
    }

    #[test]
    fn foreign_sysex_is_ignored() {
        let xc = run("F0F100z", 0x40);
        assert_eq!(xc.filter.cutoff, ChannelState::default().filter.cutoff);
        let xc = run("9n7F", 0x40);
        assert_eq!(xc.filter.cutoff, ChannelState::default().filter.cutoff);
    }

    #[test]
    fn realtime_status_resets_filter() {
        let xc = run("F0F00110FA", 0);
        assert_eq!(xc.filter.cutoff, 254);
        assert_eq!(xc.filter.resonance, 0);
    }

    #[test]
    fn truncated_macro_stops_quietly() {
        let xc = run("F0F00", 0);
        assert_eq!(xc.filter.cutoff, ChannelState::default().filter.cutoff);
    }

    fn it_module(macros: Option<MidiMacros>) -> Module {
        let mut m = Module::with_channels("macro", 1);
        m.read_event_type = ReadEventType::It;
        m.quirks = Quirks::IT;
        m.patterns.push(Pattern::new(4, 1));
        m.orders.push(0);
        m.midi_macros = macros;
        m
    }

    fn sequencer(m: &Module) -> Sequencer {
        let mut seq = Sequencer::new(m, Dialect::from_module(m), &PlayerConfig::default(), Vec::new(), 0, 0, true);
        seq.start(m, &mut NullTracer);
        seq.clock.frame = 0;
        seq
    }

    #[test]
    fn zxx_without_table_drives_cutoff_and_resonance() {
        let m = it_module(None);
        let mut seq = sequencer(&m);
        seq.process_fx(&m, 0, &Event::empty().with_effect(Effect::Macro(0x30)), false);
        seq.update_midi_macro(&m, 0);
        assert_eq!(seq.channels[0].filter.cutoff, 0x60);

        seq.process_fx(&m, 0, &Event::empty().with_effect(Effect::Macro(0x84)), false);
        seq.update_midi_macro(&m, 0);
        assert_eq!(seq.channels[0].filter.resonance, 4 << 4);
    }

    #[test]
    fn selected_parameter_macro_runs() {
        let mut macros = MidiMacros::it_default();
        macros.set_param(2, "F0F001z");
        let m = it_module(Some(macros));
        let mut seq = sequencer(&m);
        seq.process_fx(&m, 0, &Event::empty().with_effect(Effect::MacroSelect(2)), false);
        seq.process_fx(&m, 0, &Event::empty().with_effect(Effect::Macro(0x10)), false);
        seq.update_midi_macro(&m, 0);
        assert_eq!(seq.channels[0].filter.resonance, 0x20);
    }

    #[test]
    fn smooth_macro_reaches_target() {
        let m = it_module(Some(MidiMacros::it_default()));
        let mut seq = sequencer(&m);
        seq.clock.speed = 4;
        seq.channels[0].macro_state.val = 0.0;
        seq.process_fx(&m, 0, &Event::empty().with_effect(Effect::SmoothMacro(0x40)), false);
        for frame in 0..4 {
            seq.clock.frame = frame;
            seq.update_midi_macro(&m, 0);
        }
        assert_eq!(seq.channels[0].macro_state.val, 64.0);
        assert_eq!(seq.channels[0].filter.cutoff, 0x80);
    }

    #[test]
    fn plain_macro_only_fires_on_first_tick() {
        let m = it_module(None);
        let mut seq = sequencer(&m);
        seq.process_fx(&m, 0, &Event::empty().with_effect(Effect::Macro(0x20)), false);
        seq.clock.frame = 1;
        seq.update_midi_macro(&m, 0);
        assert_eq!(seq.channels[0].filter.cutoff, 0xff);
    }
}
