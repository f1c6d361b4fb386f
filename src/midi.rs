//! # Standard MIDI File writer
//!
//! Turns a built [`Sequence`] into Standard MIDI File bytes. Not part of the
//! two-pass compiler core and carries no MPL semantics of its own — the same
//! "thin collaborator that turns the compiler's internal model into bytes
//! for an out-of-scope concern" role the teacher's `musicxml` module plays
//! for its own `Score` AST. Grounded on
//! `examples/webern-midi_file/src/core/vlq.rs` for delta-time variable-
//! length-quantity encoding, `examples/webern-midi_file/src/file/header.rs`
//! for `MThd` chunk framing (format, track count, division written as
//! big-endian integers), and `examples/allthemusicllc-libatm/src/midi_event.rs`
//! for the status-byte-plus-channel shape of channel voice messages. No
//! running-status optimization (every event carries its own status byte);
//! spec's Non-goals exclude byte-level framing/size concerns.

use crate::channel::CHANNEL_COUNT;
use crate::sequence::{ChannelEvent, MetaKind, Sequence, TimedEvent};

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const PROGRAM_CHANGE: u8 = 0xC0;
const CONTROL_CHANGE: u8 = 0xB0;
const META_EVENT: u8 = 0xFF;
const END_OF_TRACK: u8 = 0x2F;

/// Encodes `value` as a MIDI variable-length quantity (7 bits per byte, MSB
/// set on every byte but the last).
fn write_vlq(out: &mut Vec<u8>, mut value: u32) {
    let mut stack = Vec::new();
    stack.push((value & 0x7F) as u8);
    value >>= 7;
    while value > 0 {
        stack.push(((value & 0x7F) as u8) | 0x80);
        value >>= 7;
    }
    out.extend(stack.into_iter().rev());
}

/// Writes a full Standard MIDI File: one `MThd` header followed by one
/// `MTrk` per meta track plus one `MTrk` per channel that has events.
pub fn write_smf(sequence: &Sequence) -> Vec<u8> {
    let mut tracks: Vec<Vec<u8>> = Vec::new();
    tracks.push(write_meta_track(&sequence.meta_track));
    for channel in 0..CHANNEL_COUNT {
        if !sequence.channel_tracks[channel].is_empty() {
            tracks.push(write_channel_track(channel as u8, &sequence.channel_tracks[channel]));
        }
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // format 1: simultaneous tracks
    out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    out.extend_from_slice(&(sequence.resolution as u16).to_be_bytes());

    for track in tracks {
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(track.len() as u32).to_be_bytes());
        out.extend(track);
    }
    out
}

/// Flattens one track's `(tick, event)` pairs, already stable-sorted by
/// [`crate::sequence::Emitter::finish`], into delta-time-prefixed bytes.
struct TrackCursor {
    last_tick: u32,
    body: Vec<u8>,
}

impl TrackCursor {
    fn new() -> Self {
        TrackCursor {
            last_tick: 0,
            body: Vec::new(),
        }
    }

    fn advance(&mut self, tick: u32) {
        write_vlq(&mut self.body, tick - self.last_tick);
        self.last_tick = tick;
    }

    fn finish(mut self) -> Vec<u8> {
        write_vlq(&mut self.body, 0);
        self.body.push(META_EVENT);
        self.body.push(END_OF_TRACK);
        self.body.push(0);
        self.body
    }
}

fn write_channel_track(channel: u8, events: &[TimedEvent<ChannelEvent>]) -> Vec<u8> {
    let mut cursor = TrackCursor::new();
    for e in events {
        cursor.advance(e.tick);
        match &e.event {
            ChannelEvent::NoteOn { note, velocity } => {
                cursor.body.push(NOTE_ON | channel);
                cursor.body.push(*note);
                cursor.body.push(*velocity);
            }
            ChannelEvent::NoteOff { note } => {
                cursor.body.push(NOTE_OFF | channel);
                cursor.body.push(*note);
                cursor.body.push(0);
            }
            ChannelEvent::ProgramChange { program } => {
                cursor.body.push(PROGRAM_CHANGE | channel);
                cursor.body.push(*program);
            }
            ChannelEvent::ControlChange { controller, value } => {
                cursor.body.push(CONTROL_CHANGE | channel);
                cursor.body.push(*controller);
                cursor.body.push(*value);
            }
        }
    }
    cursor.finish()
}

fn write_meta_track(events: &[TimedEvent<MetaKind>]) -> Vec<u8> {
    let mut cursor = TrackCursor::new();
    for e in events {
        cursor.advance(e.tick);
        write_meta_event(&mut cursor.body, &e.event);
    }
    cursor.finish()
}

fn write_meta_event(out: &mut Vec<u8>, kind: &MetaKind) {
    out.push(META_EVENT);
    match kind {
        MetaKind::SetTempo(micros_per_quarter) => {
            out.push(0x51);
            out.push(3);
            let bytes = micros_per_quarter.to_be_bytes();
            out.extend_from_slice(&bytes[1..4]);
        }
        MetaKind::TimeSig {
            numerator,
            denominator,
        } => {
            out.push(0x58);
            out.push(4);
            out.push(*numerator);
            out.push(denominator.trailing_zeros() as u8);
            out.push(24);
            out.push(8);
        }
        MetaKind::KeySig { fifths, minor } => {
            out.push(0x59);
            out.push(2);
            out.push(*fifths as u8);
            out.push(if *minor { 1 } else { 0 });
        }
        MetaKind::Text(text) => write_text_meta(out, 0x01, text),
        MetaKind::InstrumentName(text) => write_text_meta(out, 0x04, text),
        MetaKind::Lyrics(text) => write_text_meta(out, 0x05, text),
        MetaKind::Marker(text) => write_text_meta(out, 0x06, text),
    }
}

fn write_text_meta(out: &mut Vec<u8>, kind: u8, text: &str) {
    out.push(kind);
    write_vlq(out, text.len() as u32);
    out.extend_from_slice(text.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Emitter;

    #[test]
    fn header_reports_format_one_and_track_count() {
        let mut em = Emitter::new(480);
        em.emit_note_on(0, 60, 64, 0);
        em.emit_note_off(0, 60, 480);
        let bytes = write_smf(&em.finish());

        assert_eq!(&bytes[0..4], b"MThd");
        let format = u16::from_be_bytes([bytes[8], bytes[9]]);
        assert_eq!(format, 1);
        let ntracks = u16::from_be_bytes([bytes[10], bytes[11]]);
        // One meta track (empty, still written) + one channel track.
        assert_eq!(ntracks, 2);
        let division = u16::from_be_bytes([bytes[12], bytes[13]]);
        assert_eq!(division, 480);
    }

    #[test]
    fn channel_track_ends_with_end_of_track_meta_event() {
        let mut em = Emitter::new(480);
        em.emit_note_on(0, 60, 64, 0);
        let bytes = write_smf(&em.finish());
        assert_eq!(&bytes[bytes.len() - 3..], &[META_EVENT, END_OF_TRACK, 0]);
    }

    #[test]
    fn vlq_encodes_multi_byte_delta_times() {
        let mut out = Vec::new();
        write_vlq(&mut out, 0x80);
        assert_eq!(out, vec![0x81, 0x00]);
        let mut out = Vec::new();
        write_vlq(&mut out, 0);
        assert_eq!(out, vec![0x00]);
    }
}
