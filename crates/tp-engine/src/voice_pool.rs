//! VoicePool: maps virtual channels onto a fixed set of mixer voices.
//!
//! The first `num_tracks` virtual channels are the module's tracks. When a
//! new note arrives on a track whose voice has a continuing new-note
//! action, the old voice moves to a free background channel and keeps
//! playing there while the track takes a fresh voice.

use alloc::vec::Vec;
use slotmap::{new_key_type, SlotMap};
use tp_ir::{DuplicateAction, DuplicateCheck, NewNoteAction, Sample};

use crate::filter::FilterCoefficients;
use crate::voice::Voice;

new_key_type! {
    /// Generational handle of a voice in the pool.
    pub struct VoiceKey;
}

/// What a virtual channel is currently doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelStatus {
    /// No voice mapped
    Invalid,
    /// A module track with a voice
    Active,
    /// A background channel and the action pending on its voice
    Background(NewNoteAction),
}

/// Note to start on a channel's voice.
#[derive(Clone, Copy, Debug)]
pub struct Patch {
    pub ins: Option<usize>,
    pub smp: Option<usize>,
    pub note: i32,
    pub key: i32,
    pub nna: NewNoteAction,
    pub dct: DuplicateCheck,
    pub dca: DuplicateAction,
}

pub struct VoicePool {
    voices: SlotMap<VoiceKey, Voice>,
    max_voices: usize,
    /// Voice of each virtual channel
    map: Vec<Option<VoiceKey>>,
    /// Voices triggered by each track
    count: Vec<u32>,
    num_tracks: usize,
}

impl VoicePool {
    /// Pool for `num_tracks` tracks. With background voices enabled every
    /// voice may hold a background note; otherwise each track owns at
    /// most one voice.
    pub fn new(num_tracks: usize, max_voices: usize, background: bool) -> Self {
        let (virt_channels, max_voices) = if background {
            (num_tracks + max_voices, max_voices)
        } else {
            (num_tracks, max_voices.min(num_tracks))
        };
        Self {
            voices: SlotMap::with_capacity_and_key(max_voices),
            max_voices,
            map: alloc::vec![None; virt_channels],
            count: alloc::vec![0; num_tracks],
            num_tracks,
        }
    }

    pub fn num_tracks(&self) -> usize {
        self.num_tracks
    }

    /// Number of virtual channels (tracks plus background channels).
    pub fn virt_channels(&self) -> usize {
        self.map.len()
    }

    pub fn max_voices(&self) -> usize {
        self.max_voices
    }

    /// Voices currently allocated.
    pub fn used(&self) -> usize {
        self.voices.len()
    }

    /// Voices currently playing notes triggered by `root`.
    pub fn count_of(&self, root: usize) -> u32 {
        self.count.get(root).copied().unwrap_or(0)
    }

    /// Free every voice.
    pub fn reset(&mut self) {
        self.voices.clear();
        self.map.fill(None);
        self.count.fill(0);
    }

    fn key_of(&self, chn: usize) -> Option<VoiceKey> {
        let key = (*self.map.get(chn)?)?;
        self.voices.contains_key(key).then_some(key)
    }

    pub fn status(&self, chn: usize) -> ChannelStatus {
        match self.key_of(chn) {
            None => ChannelStatus::Invalid,
            Some(_) if chn < self.num_tracks => ChannelStatus::Active,
            Some(key) => ChannelStatus::Background(self.voices[key].act),
        }
    }

    pub fn voice(&self, chn: usize) -> Option<&Voice> {
        self.key_of(chn).map(|k| &self.voices[k])
    }

    pub fn voice_mut(&mut self, chn: usize) -> Option<&mut Voice> {
        let key = self.key_of(chn)?;
        self.voices.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.values_mut()
    }

    fn free(&mut self, key: VoiceKey) {
        if let Some(voice) = self.voices.remove(key) {
            if let Some(slot) = self.map.get_mut(voice.chn) {
                if *slot == Some(key) {
                    *slot = None;
                }
            }
            if let Some(c) = self.count.get_mut(voice.root) {
                *c = c.saturating_sub(1);
            }
        }
    }

    /// Stop and free the voice of `chn`, if any.
    pub fn reset_channel(&mut self, chn: usize) {
        if let Some(key) = self.key_of(chn) {
            self.free(key);
        }
    }

    /// Free the quietest background voice to make room.
    fn steal(&mut self) -> bool {
        let num_tracks = self.num_tracks;
        let victim = self
            .voices
            .iter()
            .filter(|(_, v)| v.chn >= num_tracks)
            .min_by_key(|(_, v)| v.vol)
            .map(|(k, _)| k);
        match victim {
            Some(key) => {
                tracing::trace!(chn = self.voices[key].chn, "stealing background voice");
                self.free(key);
                true
            }
            None => false,
        }
    }

    fn alloc(&mut self, chn: usize) -> Option<VoiceKey> {
        if self.voices.len() >= self.max_voices && !self.steal() {
            return None;
        }
        let key = self.voices.insert(Voice::new(chn));
        self.map[chn] = Some(key);
        if let Some(c) = self.count.get_mut(chn) {
            *c += 1;
        }
        Some(key)
    }

    /// Apply the duplicate check of a new note on `chn` to voice `key`.
    fn check_duplicate(&mut self, key: VoiceKey, chn: usize, patch: &Patch) {
        let Some(v) = self.voices.get_mut(key) else { return };
        if v.root != chn || v.ins != patch.ins {
            return;
        }
        if patch.nna == NewNoteAction::Cut {
            self.free(key);
            return;
        }
        v.act = patch.nna;
        let duplicate = match patch.dct {
            DuplicateCheck::Off => false,
            DuplicateCheck::Instrument => true,
            DuplicateCheck::Sample => v.smp == patch.smp,
            DuplicateCheck::Note => v.key == patch.key,
        };
        if !duplicate {
            return;
        }
        if patch.nna == NewNoteAction::Off && patch.dca == DuplicateAction::Fade {
            v.act = NewNoteAction::Off;
        } else if patch.dca == DuplicateAction::Cut {
            self.free(key);
        } else {
            // `act` already holds a non-cut action here, so the channel's
            // own voice takes the duplicate action like any other
            v.act = patch.dca.into();
        }
    }

    /// Start a note on `chn`.
    ///
    /// Returns the channel the previous note continues on: `chn` itself if
    /// it was replaced in place, or the background channel it moved to.
    /// `None` if no voice could be allocated.
    pub fn set_patch(&mut self, chn: usize, patch: Patch) -> Option<usize> {
        if chn >= self.virt_channels() {
            return None;
        }
        let smp = if patch.ins.is_some() { patch.smp } else { None };

        if patch.dct != DuplicateCheck::Off {
            let keys: heapless::Vec<VoiceKey, { crate::config::MAX_VOICES }> =
                self.voices.keys().collect();
            for key in keys {
                self.check_duplicate(key, chn, &patch);
            }
        }

        let mut to = chn;
        let key = match self.key_of(chn) {
            Some(old) if self.voices[old].act != NewNoteAction::Cut => {
                let fresh = self.alloc(chn)?;
                match (self.num_tracks..self.virt_channels()).find(|&c| self.key_of(c).is_none()) {
                    Some(bg) => {
                        self.voices[old].chn = bg;
                        self.map[bg] = Some(old);
                        to = bg;
                    }
                    None => self.free(old),
                }
                fresh
            }
            Some(current) => current,
            None => self.alloc(chn)?,
        };

        let Some(smp) = smp else {
            self.free(key);
            return Some(to);
        };
        let v = &mut self.voices[key];
        v.set_patch(smp);
        v.set_note(patch.note);
        v.ins = patch.ins;
        v.act = patch.nna;
        v.key = patch.key;
        Some(to)
    }

    /// Background channels whose notes were triggered by `root`.
    pub fn background_of(&self, root: usize) -> impl Iterator<Item = usize> + '_ {
        (self.num_tracks..self.virt_channels())
            .filter(move |&c| self.voice(c).is_some_and(|v| v.root == root))
    }

    pub fn set_nna(&mut self, chn: usize, nna: NewNoteAction) {
        if let Some(v) = self.voice_mut(chn) {
            v.act = nna;
        }
    }

    /// Set the voice volume (0-1024). Silent background voices are freed.
    pub fn set_volume(&mut self, chn: usize, vol: i32, muted: &[bool]) {
        let Some(key) = self.key_of(chn) else { return };
        let v = &mut self.voices[key];
        let vol = if muted.get(v.root).copied().unwrap_or(false) { 0 } else { vol };
        v.set_volume(vol);
        if vol == 0 && chn >= self.num_tracks {
            self.free(key);
        }
    }

    pub fn set_pan(&mut self, chn: usize, pan: i32, surround: bool) {
        if let Some(v) = self.voice_mut(chn) {
            v.pan = pan;
            v.surround = surround;
        }
    }

    pub fn set_period(&mut self, chn: usize, period: f64) {
        if let Some(v) = self.voice_mut(chn) {
            v.period = period;
        }
    }

    pub fn set_position(&mut self, chn: usize, pos: u32, samples: &[Sample]) {
        if let Some(v) = self.voice_mut(chn) {
            if let Some(sample) = v.smp.and_then(|s| samples.get(s)) {
                v.set_position(sample, pos);
            }
        }
    }

    pub fn position(&self, chn: usize) -> Option<i32> {
        self.voice(chn).map(Voice::position)
    }

    pub fn release(&mut self, chn: usize, release: bool) {
        if let Some(v) = self.voice_mut(chn) {
            v.release = release;
        }
    }

    pub fn reverse(&mut self, chn: usize, reverse: bool) {
        if let Some(v) = self.voice_mut(chn) {
            v.backward = reverse;
        }
    }

    pub fn set_filter(&mut self, chn: usize, cutoff: i32, resonance: i32, coef: FilterCoefficients) {
        if let Some(v) = self.voice_mut(chn) {
            v.filter.set(cutoff, resonance, coef);
        }
    }

    /// Track that triggered the note on `chn`.
    pub fn root_of(&self, chn: usize) -> Option<usize> {
        self.voice(chn).map(|v| v.root)
    }
}
