//! IT MIDI macro tables.

use arrayvec::ArrayString;
use core::fmt::Write;

/// One macro: hex digits and placeholder letters, at most 32 characters.
pub type MacroText = ArrayString<32>;

/// Number of parameterized (SFx-selectable) macros.
pub const PARAM_MACROS: usize = 16;
/// Number of fixed (Z80-ZFF) macros.
pub const FIXED_MACROS: usize = 128;

/// Module MIDI macro configuration.
#[derive(Clone, Debug)]
pub struct MidiMacros {
    /// Parameterized macros selected with SFx, invoked with Z00-Z7F
    pub param: [MacroText; PARAM_MACROS],
    /// Fixed macros invoked with Z80-ZFF
    pub fixed: [MacroText; FIXED_MACROS],
}

impl Default for MidiMacros {
    fn default() -> Self {
        Self {
            param: [MacroText::new(); PARAM_MACROS],
            fixed: [MacroText::new(); FIXED_MACROS],
        }
    }
}

impl MidiMacros {
    /// Impulse Tracker's factory setup: SF0 drives the cutoff and
    /// Z80-Z8F set resonance in steps of 8.
    pub fn it_default() -> Self {
        let mut macros = Self::default();
        let _ = macros.param[0].try_push_str("F0F000z");
        for (i, slot) in macros.fixed.iter_mut().take(16).enumerate() {
            let _ = write!(slot, "F0F001{:02X}", i * 8);
        }
        macros
    }

    /// Set a parameterized macro, truncating text that does not fit.
    pub fn set_param(&mut self, index: usize, text: &str) {
        if let Some(slot) = self.param.get_mut(index) {
            slot.clear();
            for c in text.chars() {
                if slot.try_push(c).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_default_layout() {
        let m = MidiMacros::it_default();
        assert_eq!(m.param[0].as_str(), "F0F000z");
        assert_eq!(m.fixed[0].as_str(), "F0F00100");
        assert_eq!(m.fixed[15].as_str(), "F0F00178");
        assert!(m.fixed[16].is_empty());
    }

    #[test]
    fn set_param_truncates() {
        let mut m = MidiMacros::default();
        m.set_param(3, "F0F000zF0F000zF0F000zF0F000zF0F000z");
        assert_eq!(m.param[3].len(), 32);
        m.set_param(99, "ignored");
    }
}
