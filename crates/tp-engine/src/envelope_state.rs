//! Runtime cursor for instrument envelopes.
//!
//! The cursor is a tick position into the envelope's node list. It starts
//! at -1 ("not started", which evaluates to the default value) and moves
//! one tick per frame, with loop and sustain handling that differs between
//! the XM and IT dialects.

use tp_ir::Envelope;

use crate::dialect::EnvelopeLoopPolicy;

/// Ceiling for the tick position.
const MAX_POSITION: i32 = 0xffff;

/// What happens to a note once its volume envelope has run out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeFade {
    /// Envelope still running
    None,
    /// Envelope ended at zero: the note is over
    Cut,
    /// Envelope ended above zero: start the fadeout
    Fade,
}

/// Position within one envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopeCursor(i32);

impl Default for EnvelopeCursor {
    fn default() -> Self {
        Self(-1)
    }
}

impl EnvelopeCursor {
    /// Rewind to "not started".
    pub fn reset(&mut self) {
        self.0 = -1;
    }

    /// Current tick (-1 before the first advance).
    pub fn position(&self) -> i32 {
        self.0
    }

    /// Jump to a tick (envelope position effect).
    pub fn set(&mut self, tick: i32) {
        self.0 = tick.min(MAX_POSITION);
    }

    /// Evaluate the envelope at the cursor.
    pub fn value(&self, env: &Envelope, default: i32) -> i32 {
        env.value_at(self.0, default)
    }

    /// Advance one tick, applying loop and sustain rules.
    ///
    /// `release` is true once the note has been released; `key_off` is the
    /// IT "released at the end of the sustain loop" case.
    pub fn advance(&mut self, env: &Envelope, policy: EnvelopeLoopPolicy, release: bool, key_off: bool) {
        let mut x = self.0;
        if x < MAX_POSITION {
            x += 1;
        }
        if x < 0 {
            self.0 = -1;
            return;
        }
        if env.is_active() {
            x = match policy {
                EnvelopeLoopPolicy::Xm => advance_xm(env, x, release),
                EnvelopeLoopPolicy::It => advance_it(env, x, release, key_off),
            };
        }
        self.0 = x;
    }

    /// True once a non-looping envelope has reached its last node.
    pub fn ended(&self, env: &Envelope) -> bool {
        if !env.is_active() || env.loop_range.is_some() {
            return false;
        }
        env.points.len() == 1 || self.0 >= env.last_tick()
    }

    /// Fade decision for a volume envelope that ran past its last node.
    pub fn fade(&self, env: &Envelope) -> EnvelopeFade {
        if !env.is_active() || self.0 <= env.last_tick() {
            return EnvelopeFade::None;
        }
        match env.points.last() {
            Some(p) if p.value == 0 => EnvelopeFade::Cut,
            _ => EnvelopeFade::Fade,
        }
    }
}

fn advance_xm(env: &Envelope, mut x: i32, mut release: bool) -> i32 {
    let mut sustain = env.sustain.map(|s| s.start);
    let looped = env.loop_range;

    // Sustain on the loop end: once released the loop is escaped, before
    // that the loop alone governs.
    let sus_on_loop_end = matches!((looped, sustain), (Some(l), Some(s)) if s == l.end);
    if sus_on_loop_end && !release {
        sustain = None;
    }

    // Past the hold point the note behaves as released.
    if let Some(l) = looped {
        if x > env.tick_of(l.end) + 1 {
            release = true;
        }
    } else if let Some(s) = sustain {
        if x > env.tick_of(s) + 1 {
            release = true;
        }
    }

    if let Some(s) = sustain {
        if !release && x >= env.tick_of(s) {
            x = env.tick_of(s);
        }
    }

    if let Some(l) = looped {
        if x >= env.tick_of(l.end) && !(release && sustain.is_some() && sus_on_loop_end) {
            x = env.tick_of(l.start);
        }
    }
    x
}

fn advance_it(env: &Envelope, x: i32, release: bool, key_off: bool) -> i32 {
    if let Some(s) = env.sustain {
        if key_off && x == env.tick_of(s.end) + 1 {
            return env.tick_of(s.start);
        }
        if !release {
            if x == env.tick_of(s.end) + 1 {
                return env.tick_of(s.start);
            }
            return x;
        }
    }
    if let Some(l) = env.loop_range {
        if x > env.tick_of(l.end) {
            return env.tick_of(l.start);
        }
    }
    x
}
