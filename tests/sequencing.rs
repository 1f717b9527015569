//! Integration test: drive the sequencer directly with a recording tracer.

use std::collections::HashSet;

use trackplay::engine::flow::FlowControl;
use trackplay::engine::{Clock, Dialect, PlayerConfig, Sequencer, Tick, Tracer};
use trackplay::ir::{Effect, Event, Instrument, Module, NewNoteAction, Pattern, Quirks, ReadEventType, Sample, SampleData, ORDER_END};

/// Records every row the sequencer reaches.
#[derive(Default)]
struct Recorder {
    rows: Vec<(usize, usize)>,
}

impl Tracer for Recorder {
    fn row(&mut self, clock: &mut Clock, _flow: &FlowControl) -> bool {
        self.rows.push((clock.ord, clock.row));
        true
    }
}

fn sequencer(m: &Module, config: &PlayerConfig, tracer: &mut impl Tracer) -> Sequencer {
    let mut seq = Sequencer::new(m, Dialect::from_module(m), config, Vec::new(), 0, 0, true);
    seq.start(m, tracer);
    seq
}

/// Run until the module ends or `limit` ticks have played.
fn run(m: &Module, limit: usize) -> (Recorder, usize) {
    let mut rec = Recorder::default();
    let mut seq = sequencer(m, &PlayerConfig::default(), &mut rec);
    let mut ticks = 0;
    while ticks < limit && seq.tick(m, &mut rec) == Tick::Played {
        ticks += 1;
    }
    (rec, ticks)
}

fn module(channels: u8, rows: u16, patterns: usize) -> Module {
    let mut m = Module::with_channels("seq", channels);
    m.samples.push(Sample::with_data("s", SampleData::Mono8(vec![40; 8000])));
    m.instruments.push(Instrument::with_sample("i", 0));
    for _ in 0..patterns {
        m.patterns.push(Pattern::new(rows, channels));
    }
    m
}

#[test]
fn pattern_loop_plays_the_body_seven_times() {
    let mut m = module(1, 2, 2);
    m.quirks = Quirks::ST3;
    m.read_event_type = ReadEventType::St3;
    *m.patterns[0].cell_mut(1, 0) = Event::empty().with_effect(Effect::Extended(0x66));
    m.orders = vec![0, 1];

    let (rec, _) = run(&m, 96);
    let body = rec.rows.iter().filter(|&&r| r == (0, 1)).count();
    assert_eq!(body, 7);
    let first_after = rec.rows.iter().position(|&r| r.0 == 1).unwrap();
    assert_eq!(first_after, 14);
}

#[test]
fn jump_to_end_marker_never_reads_the_skipped_order() {
    let mut m = module(1, 4, 2);
    m.quirks = Quirks::PROTRACKER | Quirks::MARKER;
    *m.patterns[0].cell_mut(0, 0) = Event::empty().with_effect(Effect::PositionJump(2));
    m.orders = vec![0, 1, ORDER_END];

    let (rec, ticks) = run(&m, 1000);
    assert_eq!(rec.rows, [(0, 0)]);
    assert_eq!(ticks, 6);
}

#[test]
fn pattern_break_lands_on_the_requested_row() {
    let mut m = module(1, 64, 2);
    *m.patterns[0].cell_mut(0, 0) = Event::empty().with_effect(Effect::PatternBreak(0x16));
    m.orders = vec![0, 1];

    let (rec, _) = run(&m, 20);
    assert_eq!(&rec.rows[..2], &[(0, 0), (1, 16)]);
}

#[test]
fn pattern_delay_holds_the_row() {
    let mut m = module(1, 4, 1);
    *m.patterns[0].cell_mut(0, 0) = Event::empty().with_effect(Effect::Extended(0xe2));
    m.orders = vec![0];

    let (rec, ticks) = run(&m, 19);
    // Row 0 lasts three row lengths
    assert_eq!(ticks, 19);
    assert_eq!(rec.rows, [(0, 0), (0, 1)]);
}

#[test]
fn voices_are_never_shared() {
    let mut m = module(4, 16, 1);
    m.quirks = Quirks::IT;
    m.read_event_type = ReadEventType::It;
    m.instruments[0].subinstruments[0].nna = NewNoteAction::Continue;
    for row in 0..16u16 {
        for chn in 0..4u8 {
            *m.patterns[0].cell_mut(row, chn) = Event::note(40 + row as u8 + chn, 1);
        }
    }
    m.orders = vec![0];

    let config = PlayerConfig { max_voices: 5, ..PlayerConfig::default() };
    let mut rec = Recorder::default();
    let mut seq = sequencer(&m, &config, &mut rec);
    for _ in 0..96 {
        seq.tick(&m, &mut rec);
        let pool = seq.voices();
        assert!(pool.used() <= 5);

        let mut seen = HashSet::new();
        for chn in 0..pool.virt_channels() {
            if let Some(v) = pool.voice(chn) {
                assert_eq!(v.chn, chn);
                assert!(seen.insert(v as *const _ as usize), "voice mapped twice");
            }
        }
    }
}
