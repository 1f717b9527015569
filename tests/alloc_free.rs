//! Allocation-free render path tests.
//!
//! These tests verify that `Player::play_frame()` does not allocate once
//! a session has started. They render several seconds of modules that
//! exercise background voices, envelopes, filters, pattern loops and
//! repositioning to catch allocations in specific effect paths.
//!
//! Runs under plain `cargo test`; no feature flags are needed.

use assert_no_alloc::{assert_no_alloc, AllocDisabler};

#[cfg(debug_assertions)]
#[global_allocator]
static A: AllocDisabler = AllocDisabler;

use trackplay::ir::{Envelope, LoopRange, LoopType, NewNoteAction};
use trackplay::{
    Effect, Event, Instrument, Interpolation, Module, Pattern, PlayState, Player, PlayerConfig, Quirks,
    ReadEventType, Sample, SampleData,
};

fn looped_sample() -> Sample {
    let wave: Vec<i16> = (0..1024).map(|i| ((i % 64) * 800 - 25_600) as i16).collect();
    Sample::with_data("wave", SampleData::Mono16(wave)).looped(16, 1024, LoopType::PingPong)
}

/// IT module: continuing notes, volume envelope, filter, pattern loop.
fn it_module() -> Module {
    let mut m = Module::with_channels("it", 8);
    m.quirks = Quirks::IT;
    m.read_event_type = ReadEventType::It;
    m.global_volume_base = 128;
    m.global_volume = 128;
    m.samples.push(looped_sample());

    let mut ins = Instrument::with_sample("pad", 0);
    ins.fadeout = 0x400;
    ins.volume_envelope = Envelope::from_points(&[(0, 64), (8, 32), (16, 48)]);
    ins.volume_envelope.loop_range = Some(LoopRange { start: 1, end: 2 });
    let sub = &mut ins.subinstruments[0];
    sub.nna = NewNoteAction::Continue;
    sub.cutoff = Some(90);
    sub.resonance = Some(40);
    m.instruments.push(ins);

    let mut p = Pattern::new(32, 8);
    for row in (0..32u16).step_by(2) {
        for chn in 0..8u8 {
            let key = 36 + ((row as u8) * 3 + chn * 5) % 48;
            *p.cell_mut(row, chn) = Event::note(key, 1).with_effect(Effect::Vibrato(0x24));
        }
    }
    *p.cell_mut(31, 0) = Event::empty().with_effect(Effect::Extended(0x62));
    m.patterns.push(p);
    m.orders = vec![0, 0];
    m
}

/// FT2 module: slides, arpeggio, retrig and a jump back.
fn ft2_module() -> Module {
    let mut m = Module::with_channels("ft2", 4);
    m.quirks = Quirks::FT2;
    m.read_event_type = ReadEventType::Ft2;
    m.samples.push(looped_sample());
    m.instruments.push(Instrument::with_sample("lead", 0));

    let mut p = Pattern::new(64, 4);
    for row in (0..64u16).step_by(8) {
        *p.cell_mut(row, 0) = Event::note(48 + row as u8 / 8, 1).with_effect(Effect::Arpeggio(0x37));
        *p.cell_mut(row, 1) = Event::note(60, 1).with_effect(Effect::MultiRetrig(0x23));
        *p.cell_mut(row + 1, 2) = Event::note(36, 1).with_effect(Effect::TonePorta(0x08));
        *p.cell_mut(row + 2, 3) = Event::note(72, 1).with_effect(Effect::VolumeSlide(0x0f));
    }
    *p.cell_mut(63, 0) = Event::empty().with_effect(Effect::PositionJump(0));
    m.patterns.push(p);
    m.orders = vec![0];
    m
}

/// Render `ticks` ticks, aborting on any heap allocation.
fn assert_render_alloc_free(module: Module, config: PlayerConfig, ticks: usize) {
    let mut player = Player::new(module).unwrap();
    player.start(config).unwrap();

    assert_no_alloc(|| {
        for i in 0..ticks {
            if i == ticks / 2 {
                player.set_position(0).unwrap();
            }
            if player.play_frame().unwrap() == PlayState::Ended {
                break;
            }
            let _ = player.frame_info().unwrap();
        }
    });
}

#[test]
fn it_spline_alloc_free() {
    let config = PlayerConfig { interpolation: Interpolation::Spline, ..PlayerConfig::default() };
    assert_render_alloc_free(it_module(), config, 250 * 5);
}

#[test]
fn ft2_linear_alloc_free() {
    assert_render_alloc_free(ft2_module(), PlayerConfig::default(), 250 * 5);
}

#[test]
fn fill_buffer_alloc_free() {
    let mut player = Player::new(ft2_module()).unwrap();
    player.start(PlayerConfig::default()).unwrap();
    let mut out = vec![0u8; 4096];

    assert_no_alloc(|| {
        for _ in 0..200 {
            player.fill_buffer(&mut out, 0).unwrap();
        }
    });
}
