//! End-to-end integration tests for the MPL compiler.
//!
//! Exercises the full `.mpl` source → `Sequence` pipeline through the
//! public API, plus the two concrete end-to-end scenarios named in the
//! testable-properties section: nested multiple/function tick propagation
//! and the length-parsing table.

use mpl::sequence::{ChannelEvent, MetaKind};
use mpl::{compile, compile_to_midi};

fn note_on_ticks(track: &[mpl::sequence::TimedEvent<ChannelEvent>]) -> Vec<u32> {
    track
        .iter()
        .filter(|e| matches!(e.event, ChannelEvent::NoteOn { .. }))
        .map(|e| e.tick)
        .collect()
}

#[test]
fn nested_multiple_and_function_calls_propagate_ticks_to_11040() {
    let source = r#"
FUNCTION test1
0 c *2
END

FUNCTION test2
0 c /4
0 c /4
END

FUNCTION test3
0 c *2
0 c *1
END

CALL test1
CALL test2, q=3, m
CALL test3
0 c /4
{m
0 c /8
0 c /8
}
0 c /2
"#;
    let output = compile(source, "nested.mpl").unwrap();
    let track = &output.sequence.channel_tracks[0];

    // test1 (3840) + test2's three repeats undone by `m` (0) + test3 (5760)
    // + the trailing 480 + an `m`-wrapped pair of eighths undone (0) + 960.
    let ons = note_on_ticks(track);
    assert_eq!(
        ons,
        vec![0, 3840, 4320, 4800, 5280, 5760, 6240, 3840, 7680, 9600, 10080, 10320, 10080]
    );
    let last_off = track
        .iter()
        .filter(|e| matches!(e.event, ChannelEvent::NoteOff { .. }))
        .last()
        .unwrap();
    assert_eq!(last_off.tick, 11040);
}

#[test]
fn length_table_matches_documented_tick_counts() {
    use mpl::length::parse_length;
    use mpl::lexer::SourceLoc;

    let loc = SourceLoc::synthetic();
    let cases: &[(&str, u32)] = &[
        ("/4", 480),
        ("/2", 960),
        ("*2", 3840),
        ("*4.", 11520),
        ("*4..", 13440),
        ("*4t", 5120),
        ("*4tt", 3413),
        ("*4t7:4", 4389),
        ("4+32+1", 2460),
    ];
    for (token, expected) in cases {
        assert_eq!(
            parse_length(token, 480, &loc).unwrap(),
            *expected,
            "token '{token}' should resolve to {expected} ticks"
        );
    }

    for bad in ["/64", "*64", "xyz", "/4+"] {
        let err = parse_length(bad, 480, &loc).unwrap_err();
        assert!(
            matches!(err, mpl::MplError::BadLength { .. }),
            "token '{bad}' should fail with BadLength, got {err:?}"
        );
    }
}

#[test]
fn shift_option_transposes_the_called_function() {
    let source = "FUNCTION test1\n0 c /4\nEND\n\nCALL test1, s=12\n";
    let output = compile(source, "shift.mpl").unwrap();
    match &output.sequence.channel_tracks[0][0].event {
        ChannelEvent::NoteOn { note, .. } => assert_eq!(*note, 72),
        other => panic!("expected a note-on, got {other:?}"),
    }
}

#[test]
fn duration_ratio_only_shortens_the_note_off() {
    let source = "0 c /4, d=50%\n";
    let output = compile(source, "duration.mpl").unwrap();
    let track = &output.sequence.channel_tracks[0];
    assert_eq!(track[0].tick, 0);
    match &track[1].event {
        ChannelEvent::NoteOff { .. } => assert_eq!(track[1].tick, 240),
        other => panic!("expected a note-off, got {other:?}"),
    }
}

#[test]
fn instruments_block_applies_program_and_bank_numbers() {
    let source = r#"
INSTRUMENTS
0 piano
1 2/0/0
10 24/120/0
15 24/120/1
END
"#;
    let output = compile(source, "instruments.mpl").unwrap();

    let bank_of = |ch: usize| -> (u8, u8, u8) {
        let track = &output.sequence.channel_tracks[ch];
        let program = track
            .iter()
            .find_map(|e| match &e.event {
                ChannelEvent::ProgramChange { program } => Some(*program),
                _ => None,
            })
            .unwrap();
        let mut msb = 0;
        let mut lsb = 0;
        for e in track {
            if let ChannelEvent::ControlChange { controller, value } = &e.event {
                match controller {
                    0x00 => msb = *value,
                    0x20 => lsb = *value,
                    _ => {}
                }
            }
        }
        (program, msb, lsb)
    };

    assert_eq!(bank_of(1), (2, 0, 0));
    assert_eq!(bank_of(10), (24, 120, 0));
    assert_eq!(bank_of(15), (24, 120, 1));
}

#[test]
fn unclosed_block_is_a_structural_mismatch() {
    let source = "0 c /4\n{q=3\n0 d /4\n";
    let err = compile(source, "unclosed.mpl").unwrap_err();
    assert!(matches!(err, mpl::MplError::StructuralMismatch { .. }));
}

#[test]
fn chord_named_after_a_note_is_a_redefinition() {
    let source = "CHORD c = c, d\n";
    let err = compile(source, "chord.mpl").unwrap_err();
    assert!(matches!(err, mpl::MplError::Redefinition { .. }));
}

#[test]
fn var_inside_instruments_block_is_a_context_violation() {
    let source = "INSTRUMENTS\nVAR $x = 1\nEND\n";
    let err = compile(source, "context.mpl").unwrap_err();
    assert!(matches!(err, mpl::MplError::ContextViolation { .. }));
}

#[test]
fn compile_to_midi_round_trips_a_small_program() {
    let source = "INSTRUMENTS\n0 piano\nEND\n\ntempo 120\n0 c /4\n0 e /4\n0 g /2\n";
    let bytes = compile_to_midi(source, "song.mpl").unwrap();

    assert_eq!(&bytes[0..4], b"MThd");
    let header_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    assert_eq!(header_len, 6);
    let format = u16::from_be_bytes([bytes[8], bytes[9]]);
    assert_eq!(format, 1);
    let ntrks = u16::from_be_bytes([bytes[10], bytes[11]]);
    assert_eq!(ntrks, 2); // meta track + channel 0

    let mut cursor = 14;
    let mut track_count = 0;
    while cursor + 8 <= bytes.len() {
        assert_eq!(&bytes[cursor..cursor + 4], b"MTrk");
        let len = u32::from_be_bytes([
            bytes[cursor + 4],
            bytes[cursor + 5],
            bytes[cursor + 6],
            bytes[cursor + 7],
        ]) as usize;
        cursor += 8 + len;
        track_count += 1;
    }
    assert_eq!(track_count, 2);
    assert_eq!(cursor, bytes.len());
}

#[test]
fn tempo_directive_lands_in_the_meta_track() {
    let source = "tempo 120\n0 c /4\n";
    let output = compile(source, "tempo.mpl").unwrap();
    let has_tempo = output
        .sequence
        .meta_track
        .iter()
        .any(|e| matches!(e.event, MetaKind::SetTempo(micros) if micros == 500_000));
    assert!(has_tempo, "tempo 120 should set 500000 microseconds per quarter note");
}
