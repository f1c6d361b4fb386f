//! # Instrument / channel state
//!
//! The sixteen logical channels' mutable state (spec §3 `ChannelState`).
//! Plain data with a `Default` impl, in the same unadorned style the
//! teacher uses for `Metadata`/`TimeSignature` — no behavior lives here
//! beyond simple field mutation; the executor owns every transition.

pub const CHANNEL_COUNT: usize = 16;
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Per-channel mutable state, mutated only by the executor (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    pub current_tick: u32,
    pub program: u8,
    pub bank_msb: u8,
    pub bank_lsb: u8,
    pub velocity: u8,
    /// Rational duration ratio in `(0, 1]`, stored as `(num, den)`.
    pub duration_ratio: (u32, u32),
    pub octave_shift: i32,
    pub name: String,
    /// Whether this channel appeared in `INSTRUMENTS` or received a
    /// channel command; used to scope `max(current_tick)` at a global
    /// directive to declared channels only (spec §9's third ambiguity).
    pub declared: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            current_tick: 0,
            program: 0,
            bank_msb: 0,
            bank_lsb: 0,
            velocity: 64,
            duration_ratio: (1, 1),
            octave_shift: 0,
            name: String::new(),
            declared: false,
        }
    }
}

impl ChannelState {
    pub fn new_bank(program: u8) -> Self {
        ChannelState {
            program,
            ..Default::default()
        }
    }

    /// `round(length * duration_ratio)`, half-up, per spec §3's note-off
    /// tie-break rule.
    pub fn scaled_duration(&self, length: u32) -> u32 {
        scaled_duration(length, self.duration_ratio)
    }
}

/// `round(length * num/den)`, half-up, per spec §3's note-off tie-break
/// rule. Free function because the effective duration ratio used at
/// execution time comes from the active option frame, not necessarily from
/// a `ChannelState` (see [`ChannelState::scaled_duration`] for the
/// channel-state-bound convenience form).
pub fn scaled_duration(length: u32, ratio: (u32, u32)) -> u32 {
    let (num, den) = ratio;
    let scaled = length as u64 * num as u64;
    ((scaled + den as u64 / 2) / den as u64) as u32
}

/// All sixteen channels, indexed `0..16`.
#[derive(Debug, Clone)]
pub struct Channels {
    states: [ChannelState; CHANNEL_COUNT],
}

impl Default for Channels {
    fn default() -> Self {
        Channels {
            states: std::array::from_fn(|_| ChannelState::default()),
        }
    }
}

impl Channels {
    pub fn get(&self, ch: u8) -> &ChannelState {
        &self.states[ch as usize]
    }

    pub fn get_mut(&mut self, ch: u8) -> &mut ChannelState {
        &mut self.states[ch as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelState> {
        self.states.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChannelState> {
        self.states.iter_mut()
    }

    /// Snapshot of all sixteen `current_tick`s, for `m`-block restoration
    /// (spec §9: snapshot only the ticks, not full channel state).
    pub fn snapshot_ticks(&self) -> [u32; CHANNEL_COUNT] {
        std::array::from_fn(|i| self.states[i].current_tick)
    }

    pub fn restore_ticks(&mut self, snapshot: [u32; CHANNEL_COUNT]) {
        for (state, tick) in self.states.iter_mut().zip(snapshot) {
            state.current_tick = tick;
        }
    }

    /// `max(current_tick)` across channels marked `declared`, falling back
    /// to channel 0 if none have been declared yet.
    pub fn max_declared_tick(&self) -> u32 {
        self.states
            .iter()
            .filter(|c| c.declared)
            .map(|c| c.current_tick)
            .max()
            .unwrap_or(0)
    }

    /// Fast-forwards every channel to `tick` (global directive
    /// synchronization, spec §4.5).
    pub fn synchronize_to(&mut self, tick: u32) {
        for state in self.states.iter_mut() {
            state.current_tick = tick;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channel_matches_spec_defaults() {
        let ch = ChannelState::default();
        assert_eq!(ch.velocity, 64);
        assert_eq!(ch.duration_ratio, (1, 1));
        assert_eq!(ch.current_tick, 0);
    }

    #[test]
    fn scaled_duration_is_half_up() {
        let mut ch = ChannelState::default();
        ch.duration_ratio = (1, 2);
        assert_eq!(ch.scaled_duration(480), 240);
        ch.duration_ratio = (1, 3);
        // 480/3 = 160 exactly.
        assert_eq!(ch.scaled_duration(480), 160);
    }

    #[test]
    fn max_declared_tick_ignores_undeclared_channels() {
        let mut channels = Channels::default();
        channels.get_mut(0).declared = true;
        channels.get_mut(0).current_tick = 100;
        channels.get_mut(1).current_tick = 999; // not declared
        assert_eq!(channels.max_declared_tick(), 100);
    }

    #[test]
    fn snapshot_and_restore_roundtrip() {
        let mut channels = Channels::default();
        let snap = channels.snapshot_ticks();
        channels.get_mut(3).current_tick = 1000;
        channels.restore_ticks(snap);
        assert_eq!(channels.get(3).current_tick, 0);
    }
}
