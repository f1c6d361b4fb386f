//! # Event emitter / sequence builder
//!
//! Accepts ordered channel and meta events and assembles the tick-stamped
//! sequence exposed to exporters (spec §4.6). Grounded on the teacher's
//! `playback::engine::generate_playback_data`, which builds up
//! `Vec<PlaybackNote>`/`Vec<PlaybackChord>` incrementally behind a running
//! time cursor, and on `playback::types`'s plain data-carrier structs — the
//! same "push events into per-track buffers, sort once at the end" shape,
//! generalized from two flat note/chord vectors to the sixteen channel
//! tracks plus meta tracks MIDI actually needs.

/// A channel voice event (spec §6: program-change, bank-select CC pair,
/// note-on, note-off).
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ProgramChange { program: u8 },
    ControlChange { controller: u8, value: u8 },
}

/// A meta event, carried on the meta track (spec §4.6).
#[derive(Debug, Clone, PartialEq)]
pub enum MetaKind {
    /// Microseconds per quarter note.
    SetTempo(u32),
    TimeSig { numerator: u8, denominator: u8 },
    /// Sharps positive, flats negative; `true` = minor.
    KeySig { fifths: i8, minor: bool },
    Text(String),
    InstrumentName(String),
    Lyrics(String),
    Marker(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent<E> {
    pub tick: u32,
    pub event: E,
}

/// The fully built, tick-ordered event sequence: one meta track plus
/// sixteen channel tracks, each stable-sorted by tick so same-tick events
/// keep their insertion order (spec §4.6's invariant).
#[derive(Debug, Clone)]
pub struct Sequence {
    pub resolution: u32,
    pub meta_track: Vec<TimedEvent<MetaKind>>,
    pub channel_tracks: [Vec<TimedEvent<ChannelEvent>>; crate::channel::CHANNEL_COUNT],
}

/// Accumulates events before a final stable sort per track. This is the
/// mutable builder; [`Sequence`] is its frozen output.
pub struct Emitter {
    resolution: u32,
    meta_track: Vec<TimedEvent<MetaKind>>,
    channel_tracks: [Vec<TimedEvent<ChannelEvent>>; crate::channel::CHANNEL_COUNT],
}

impl Emitter {
    pub fn new(resolution: u32) -> Self {
        Emitter {
            resolution,
            meta_track: Vec::new(),
            channel_tracks: std::array::from_fn(|_| Vec::new()),
        }
    }

    pub fn emit_note_on(&mut self, channel: u8, note: u8, velocity: u8, tick: u32) {
        self.channel_tracks[channel as usize].push(TimedEvent {
            tick,
            event: ChannelEvent::NoteOn { note, velocity },
        });
    }

    pub fn emit_note_off(&mut self, channel: u8, note: u8, tick: u32) {
        self.channel_tracks[channel as usize].push(TimedEvent {
            tick,
            event: ChannelEvent::NoteOff { note },
        });
    }

    pub fn emit_program_change(&mut self, channel: u8, program: u8, tick: u32) {
        self.channel_tracks[channel as usize].push(TimedEvent {
            tick,
            event: ChannelEvent::ProgramChange { program },
        });
    }

    /// Bank select is a control-change pair: MSB on controller 0x00, LSB on
    /// controller 0x20 (spec §6).
    pub fn emit_bank_select(&mut self, channel: u8, msb: u8, lsb: u8, tick: u32) {
        self.channel_tracks[channel as usize].push(TimedEvent {
            tick,
            event: ChannelEvent::ControlChange {
                controller: 0x00,
                value: msb,
            },
        });
        self.channel_tracks[channel as usize].push(TimedEvent {
            tick,
            event: ChannelEvent::ControlChange {
                controller: 0x20,
                value: lsb,
            },
        });
    }

    pub fn emit_instrument_name(&mut self, channel: u8, name: &str, tick: u32) {
        // Carried on the meta track as a named instrument event; many SMF
        // readers expect instrument-name meta events co-located with their
        // channel's track rather than on track 0, but this compiler only
        // emits one shared meta track (spec §6's "three meta tracks plus
        // sixteen channel tracks" describes the *output*, not a per-channel
        // meta track), so the channel number is folded into the text.
        self.meta_track.push(TimedEvent {
            tick,
            event: MetaKind::InstrumentName(format!("ch{channel}:{name}")),
        });
    }

    pub fn emit_meta(&mut self, kind: MetaKind, tick: u32) {
        self.meta_track.push(TimedEvent { tick, event: kind });
    }

    pub fn finish(mut self) -> Sequence {
        self.meta_track.sort_by_key(|e| e.tick);
        for track in self.channel_tracks.iter_mut() {
            track.sort_by_key(|e| e.tick);
        }
        Sequence {
            resolution: self.resolution,
            meta_track: self.meta_track,
            channel_tracks: self.channel_tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_ordered_by_tick() {
        let mut em = Emitter::new(480);
        em.emit_note_on(0, 60, 64, 480);
        em.emit_note_on(0, 62, 64, 0);
        let seq = em.finish();
        let ticks: Vec<u32> = seq.channel_tracks[0].iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![0, 480]);
    }

    #[test]
    fn same_tick_events_preserve_insertion_order() {
        let mut em = Emitter::new(480);
        em.emit_note_on(0, 60, 64, 0);
        em.emit_note_on(0, 64, 64, 0);
        let seq = em.finish();
        assert_eq!(
            seq.channel_tracks[0][0].event,
            ChannelEvent::NoteOn {
                note: 60,
                velocity: 64
            }
        );
        assert_eq!(
            seq.channel_tracks[0][1].event,
            ChannelEvent::NoteOn {
                note: 64,
                velocity: 64
            }
        );
    }

    #[test]
    fn bank_select_emits_msb_then_lsb() {
        let mut em = Emitter::new(480);
        em.emit_bank_select(1, 120, 0, 0);
        let seq = em.finish();
        assert_eq!(
            seq.channel_tracks[1][0].event,
            ChannelEvent::ControlChange {
                controller: 0x00,
                value: 120
            }
        );
        assert_eq!(
            seq.channel_tracks[1][1].event,
            ChannelEvent::ControlChange {
                controller: 0x20,
                value: 0
            }
        );
    }
}
