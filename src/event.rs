// src/event.rs

/// ===============================
/// Sample-stamped MIDI events
/// ===============================

/// Longest frame the engine produces (MMC Locate).
pub const MAX_EVENT_BYTES: usize = 13;

pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const SYSEX_START: u8 = 0xF0;
    pub const SONG_POSITION: u8 = 0xF2;
    pub const SYSEX_END: u8 = 0xF7;
    pub const CLOCK: u8 = 0xF8;
    pub const START: u8 = 0xFA;
    pub const CONTINUE: u8 = 0xFB;
    pub const STOP: u8 = 0xFC;
}

/// Sub-ID #1 for real-time universal sysex.
const SYSEX_REALTIME: u8 = 0x7F;
/// Sub-ID #2 for MMC commands.
const MMC_COMMAND: u8 = 0x06;

/// MMC device id addressing every receiver.
pub const MMC_ALL_DEVICES: u8 = 0x7F;

/// Largest value a Song Position Pointer can carry.
pub const MAX_SONG_POSITION: u16 = 0x3FFF;

/// MIDI Machine Control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MmcCommand {
    Stop = 0x01,
    Play = 0x02,
    DeferredPlay = 0x03,
    FastForward = 0x04,
    Rewind = 0x05,
    /// Punch in
    RecordStrobe = 0x06,
    /// Punch out
    RecordExit = 0x07,
    RecordPause = 0x08,
    Pause = 0x09,
    Eject = 0x0A,
    Chase = 0x0B,
    Reset = 0x0D,
    Locate = 0x44,
    Shuttle = 0x47,
}

impl MmcCommand {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use MmcCommand::*;
        let cmd = match byte {
            0x01 => Stop,
            0x02 => Play,
            0x03 => DeferredPlay,
            0x04 => FastForward,
            0x05 => Rewind,
            0x06 => RecordStrobe,
            0x07 => RecordExit,
            0x08 => RecordPause,
            0x09 => Pause,
            0x0A => Eject,
            0x0B => Chase,
            0x0D => Reset,
            0x44 => Locate,
            0x47 => Shuttle,
            _ => return None,
        };
        Some(cmd)
    }
}

/// A raw MIDI message placed at a sample offset inside a block.
///
/// These events:
/// - are RT-safe (fixed size, `Copy`)
/// - carry fully rendered bytes, ready for a MIDI port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub offset: u32,
    len: u8,
    data: [u8; MAX_EVENT_BYTES],
}

impl MidiEvent {
    fn from_slice(offset: u32, bytes: &[u8]) -> Self {
        let mut data = [0u8; MAX_EVENT_BYTES];
        let len = bytes.len().min(MAX_EVENT_BYTES);
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            offset,
            len: len as u8,
            data,
        }
    }

    /// `channel` is 1-based.
    pub fn note_on(offset: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self::from_slice(
            offset,
            &[status::NOTE_ON | channel_nibble(channel), note & 0x7F, velocity & 0x7F],
        )
    }

    pub fn note_off(offset: u32, channel: u8, note: u8) -> Self {
        Self::from_slice(
            offset,
            &[status::NOTE_OFF | channel_nibble(channel), note & 0x7F, 0],
        )
    }

    pub fn clock(offset: u32) -> Self {
        Self::from_slice(offset, &[status::CLOCK])
    }

    pub fn start(offset: u32) -> Self {
        Self::from_slice(offset, &[status::START])
    }

    pub fn continue_(offset: u32) -> Self {
        Self::from_slice(offset, &[status::CONTINUE])
    }

    pub fn stop(offset: u32) -> Self {
        Self::from_slice(offset, &[status::STOP])
    }

    /// Song Position Pointer, in MIDI beats (16th notes).
    pub fn song_position(offset: u32, midi_beats: u16) -> Self {
        let beats = midi_beats.min(MAX_SONG_POSITION);
        Self::from_slice(
            offset,
            &[
                status::SONG_POSITION,
                (beats & 0x7F) as u8,
                ((beats >> 7) & 0x7F) as u8,
            ],
        )
    }

    /// `F0 7F <device> 06 <command> F7`
    pub fn mmc(offset: u32, device_id: u8, command: MmcCommand) -> Self {
        Self::from_slice(
            offset,
            &[
                status::SYSEX_START,
                SYSEX_REALTIME,
                device_id & 0x7F,
                MMC_COMMAND,
                command as u8,
                status::SYSEX_END,
            ],
        )
    }

    /// MMC Locate to an SMPTE target (24 fps time code type).
    pub fn mmc_locate(offset: u32, device_id: u8, target: LocateTarget) -> Self {
        Self::from_slice(
            offset,
            &[
                status::SYSEX_START,
                SYSEX_REALTIME,
                device_id & 0x7F,
                MMC_COMMAND,
                MmcCommand::Locate as u8,
                0x06, // information field length
                0x01, // target sub-command
                target.hours.min(23) & 0x1F,
                target.minutes.min(59),
                target.seconds.min(59),
                target.frames.min(29),
                target.sub_frames.min(99),
                status::SYSEX_END,
            ],
        )
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.data[0]
    }

    pub fn is_note_on(&self) -> bool {
        self.len == 3 && self.status() & 0xF0 == status::NOTE_ON && self.data[2] > 0
    }

    pub fn is_note_off(&self) -> bool {
        self.len == 3 && self.status() & 0xF0 == status::NOTE_OFF
    }

    pub fn is_clock(&self) -> bool {
        self.as_bytes() == [status::CLOCK]
    }

    pub fn is_mmc(&self) -> bool {
        self.len as usize >= 6 && self.data[0] == status::SYSEX_START && self.data[3] == MMC_COMMAND
    }

    /// MMC command byte, if this is an MMC frame.
    pub fn mmc_command(&self) -> Option<MmcCommand> {
        if self.is_mmc() {
            MmcCommand::from_byte(self.data[4])
        } else {
            None
        }
    }

    /// Decoded SPP value, if this is a Song Position Pointer.
    pub fn song_position_value(&self) -> Option<u16> {
        if self.len == 3 && self.status() == status::SONG_POSITION {
            Some(self.data[1] as u16 | ((self.data[2] as u16) << 7))
        } else {
            None
        }
    }
}

#[inline]
fn channel_nibble(channel: u8) -> u8 {
    channel.clamp(1, 16) - 1
}

/// SMPTE position for MMC Locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocateTarget {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    pub sub_frames: u8,
}

impl LocateTarget {
    /// Pack into one word so a control thread can hand it over atomically.
    pub fn pack(self) -> u64 {
        u64::from_le_bytes([
            self.hours,
            self.minutes,
            self.seconds,
            self.frames,
            self.sub_frames,
            1, // presence marker
            0,
            0,
        ])
    }

    pub fn unpack(word: u64) -> Option<Self> {
        let b = word.to_le_bytes();
        if b[5] != 1 {
            return None;
        }
        Some(Self {
            hours: b[0],
            minutes: b[1],
            seconds: b[2],
            frames: b[3],
            sub_frames: b[4],
        })
    }
}

/// ===============================
/// Event sinks
/// ===============================

/// Destination for events produced on the audio thread.
pub trait MidiSink {
    fn push(&mut self, event: MidiEvent);
}

/// Growable sink for offline use and tests. Allocates; not for the audio thread.
impl MidiSink for Vec<MidiEvent> {
    fn push(&mut self, event: MidiEvent) {
        Vec::push(self, event);
    }
}

/// Pre-allocated event list for one block.
///
/// Never grows after construction. Events past capacity are dropped
/// and counted so the host can size the buffer up.
#[derive(Debug)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    dropped: usize,
}

impl MidiBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            dropped: 0,
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    #[inline]
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events discarded since the last `clear`.
    #[inline]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &MidiEvent> {
        self.events.iter()
    }
}

impl MidiSink for MidiBuffer {
    #[inline]
    fn push(&mut self, event: MidiEvent) {
        if self.events.len() < self.events.capacity() {
            self.events.push(event);
        } else {
            self.dropped += 1;
        }
    }
}
