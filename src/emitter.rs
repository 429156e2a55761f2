// src/emitter.rs
//
// Renders pulse firings and transport commands into output.
//
// One engine, one tagged payload kind per configuration: note pulses,
// MIDI clock, or audio bursts. MMC and SPP ride alongside any of them.

use std::f32::consts::TAU;

use crate::audio_buffer::AudioBuffer;
use crate::config::OutputConfig;
use crate::event::{MidiEvent, MidiSink, MmcCommand};
use crate::phase::AudioBurstState;

/// Note number used for note pulses.
pub const PULSE_NOTE: u8 = 60;

/// Audio burst tone.
pub const BURST_FREQUENCY_HZ: f32 = 1000.0;

/// Fraction of the burst spent in the linear attack.
const BURST_ATTACK: f32 = 0.1;

/// Exponential decay rate over the remaining 90%.
const BURST_DECAY_RATE: f32 = 5.0;

/// Peak level at full velocity, leaving room for whatever the host mixes in.
pub const BURST_HEADROOM: f32 = 0.25;

/// What each pulse firing produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OutputMode {
    /// Note-on, then note-off one sample later
    NotePulse = 0,
    /// One 0xF8 per pulse; Start/Continue/Stop on transport edges
    #[default]
    MidiClock = 1,
    /// Enveloped sine burst added into the audio output
    AudioBurst = 2,
}

impl OutputMode {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => OutputMode::NotePulse,
            2 => OutputMode::AudioBurst,
            _ => OutputMode::MidiClock,
        }
    }

    #[inline]
    pub fn is_midi_clock(self) -> bool {
        self == OutputMode::MidiClock
    }
}

/// Envelope-shaped burst sample at `index` samples into the burst.
#[inline]
pub fn burst_sample(index: u32, duration: u32, sample_rate: f32, gain: f32) -> f32 {
    if index >= duration || sample_rate <= 0.0 {
        return 0.0;
    }

    let i = index as f32;
    let d = duration as f32;
    let attack_len = d * BURST_ATTACK;

    let envelope = if i < attack_len {
        i / attack_len
    } else {
        let decay_pos = (i - attack_len) / (d * (1.0 - BURST_ATTACK));
        (-BURST_DECAY_RATE * decay_pos).exp()
    };

    let tone = (TAU * BURST_FREQUENCY_HZ * i / sample_rate).sin();
    tone * envelope * gain
}

/// Velocity as linear gain, including headroom.
#[inline]
pub fn velocity_gain(velocity: u8) -> f32 {
    (velocity.min(127) as f32 / 127.0) * BURST_HEADROOM
}

/// Stateful renderer for the periodic stream.
///
/// The state is a note-off that may still be owed from an earlier
/// firing, possibly from the previous block, and where in this block the
/// last note-off went out.
#[derive(Debug, Clone, Default)]
pub struct MessageEmitter {
    /// Offset in the current block at which a note-off is due
    pending_note_off: Option<u32>,
    /// Channel the owed note-off belongs to
    note_off_channel: u8,
    /// Offset of a note-off already sent in this block
    released_at: Option<u32>,
}

impl MessageEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any owed note-off.
    ///
    /// A note-off already sent in this block still holds its offset.
    pub fn reset(&mut self) {
        self.pending_note_off = None;
    }

    /// A note-on at `offset` would share it with a note-off for the same note.
    ///
    /// The firing must wait one sample so the receiver sees off, then on.
    #[inline]
    pub fn holds_note_on(&self, offset: u32, config: &OutputConfig) -> bool {
        config.output_mode == OutputMode::NotePulse && self.released_at == Some(offset)
    }

    /// Render one firing at `offset`.
    #[inline]
    pub fn fire<M: MidiSink>(
        &mut self,
        offset: u32,
        config: &OutputConfig,
        burst: &mut AudioBurstState,
        midi: &mut M,
    ) {
        match config.output_mode {
            OutputMode::NotePulse => {
                // Velocity 0 would read as a note-off on the wire.
                let velocity = config.velocity.clamp(1, 127);
                midi.push(MidiEvent::note_on(offset, config.channel, PULSE_NOTE, velocity));
                self.pending_note_off = Some(offset + 1);
                self.note_off_channel = config.channel;
            }
            OutputMode::MidiClock => {
                midi.push(MidiEvent::clock(offset));
            }
            OutputMode::AudioBurst => {
                burst.start();
            }
        }
    }

    /// Emit the owed note-off if it falls on `offset`.
    #[inline]
    pub fn release_due<M: MidiSink>(&mut self, offset: u32, midi: &mut M) {
        if self.pending_note_off == Some(offset) {
            midi.push(MidiEvent::note_off(offset, self.note_off_channel, PULSE_NOTE));
            self.pending_note_off = None;
            self.released_at = Some(offset);
        }
    }

    /// Close a block of `num_samples`; a note-off due at the block end
    /// moves to offset 0 of the next block.
    #[inline]
    pub fn end_block(&mut self, num_samples: u32) {
        if let Some(due) = self.pending_note_off {
            self.pending_note_off = Some(due.saturating_sub(num_samples));
        }
        self.released_at = None;
    }

    /// Emit an owed note-off at offset 0 without running the scheduler.
    pub fn flush_pending<M: MidiSink>(&mut self, midi: &mut M) {
        if self.pending_note_off.is_some() {
            midi.push(MidiEvent::note_off(0, self.note_off_channel, PULSE_NOTE));
            self.pending_note_off = None;
            self.released_at = Some(0);
        }
    }

    #[inline]
    pub fn has_pending_note_off(&self) -> bool {
        self.pending_note_off.is_some()
    }

    /// Mix the active burst's current sample into `frame`.
    #[inline]
    pub fn render_burst(
        burst: &mut AudioBurstState,
        config: &OutputConfig,
        sample_rate: f64,
        frame: usize,
        audio: &mut AudioBuffer,
    ) {
        let value = burst_sample(
            burst.position(),
            burst.duration_samples(),
            sample_rate as f32,
            velocity_gain(config.velocity),
        );
        audio.add_to_all(frame, value);
        burst.advance();
    }

    // -------------------------------
    // MARK: Transport payloads
    // -------------------------------

    /// MMC frame, only when MMC output is on.
    pub fn mmc<M: MidiSink>(offset: u32, config: &OutputConfig, command: MmcCommand, midi: &mut M) {
        if config.send_mmc {
            midi.push(MidiEvent::mmc(offset, config.mmc_device_id, command));
        }
    }

    /// SPP, only when SPP output is on.
    pub fn song_position<M: MidiSink>(
        offset: u32,
        config: &OutputConfig,
        midi_beats: u16,
        midi: &mut M,
    ) {
        if config.send_spp {
            midi.push(MidiEvent::song_position(offset, midi_beats));
        }
    }

    /// Realtime transport byte, only in MIDI clock mode.
    pub fn transport_byte<M: MidiSink>(event: MidiEvent, config: &OutputConfig, midi: &mut M) {
        if config.output_mode.is_midi_clock() {
            midi.push(event);
        }
    }
}
