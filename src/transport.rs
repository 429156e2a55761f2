use crate::config::OutputConfig;
use crate::emitter::MessageEmitter;
use crate::event::{MAX_SONG_POSITION, MidiEvent, MidiSink, MmcCommand};
use crate::timeline::TimelineSnapshot;

//
// ===============================
// MARK: Transport state
// ===============================
//

/// Externally observed transport.
///
/// Transitions only on what the timeline source reports; the engine
/// never starts or stops anything by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransportState {
    #[default]
    Stopped = 0,
    Playing = 1,
    /// Stopped away from song start
    Paused = 2,
    Recording = 3,
}

impl TransportState {
    pub fn from_index(index: u8) -> Self {
        match index {
            1 => TransportState::Playing,
            2 => TransportState::Paused,
            3 => TransportState::Recording,
            _ => TransportState::Stopped,
        }
    }

    #[inline]
    pub fn is_running(self) -> bool {
        matches!(self, TransportState::Playing | TransportState::Recording)
    }

    fn observe(snapshot: &TimelineSnapshot, song_position: u16) -> Self {
        match (snapshot.is_playing, snapshot.is_recording) {
            (true, true) => TransportState::Recording,
            (true, false) => TransportState::Playing,
            (false, _) if song_position > 0 => TransportState::Paused,
            (false, _) => TransportState::Stopped,
        }
    }
}

/// Running-flag transition seen by one `update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEdge {
    None,
    /// Started from song start
    Started,
    /// Resumed from a non-zero song position
    Continued,
    Stopped,
}

impl TransportEdge {
    /// Start or Continue went out this block.
    #[inline]
    pub fn is_start(self) -> bool {
        matches!(self, TransportEdge::Started | TransportEdge::Continued)
    }
}

/// MIDI beats (16th notes) for a quarter-note position, clamped to the
/// 14 bits SPP can carry. Zero without a position.
#[inline]
pub fn song_position_from_ppq(ppq: Option<f64>) -> u16 {
    match ppq {
        Some(ppq) if ppq.is_finite() && ppq > 0.0 => {
            (ppq * 4.0).floor().min(MAX_SONG_POSITION as f64) as u16
        }
        _ => 0,
    }
}

//
// ===================================
// MARK: Edge detection
// ===================================
//

/// Edge-detects play/stop/record once per block and emits the matching
/// transport messages at offset 0.
///
/// RT-safe: plain data, no allocation.
#[derive(Debug, Clone, Default)]
pub struct TransportTracker {
    state: TransportState,
    previous_state: TransportState,
    song_position: u16,
}

impl TransportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold this block's snapshot in and emit edge messages.
    pub fn update<M: MidiSink>(
        &mut self,
        snapshot: &TimelineSnapshot,
        config: &OutputConfig,
        midi: &mut M,
    ) -> TransportEdge {
        self.song_position = song_position_from_ppq(snapshot.ppq_position);

        let was = self.state;
        let now = TransportState::observe(snapshot, self.song_position);
        self.previous_state = was;
        self.state = now;

        let was_recording = was == TransportState::Recording;
        let recording = now == TransportState::Recording;

        match (was.is_running(), now.is_running()) {
            (false, true) => {
                let edge = if self.song_position > 0 {
                    // Locate first so the receiver continues from the right place.
                    MessageEmitter::song_position(0, config, self.song_position, midi);
                    MessageEmitter::transport_byte(MidiEvent::continue_(0), config, midi);
                    MessageEmitter::mmc(0, config, MmcCommand::DeferredPlay, midi);
                    TransportEdge::Continued
                } else {
                    MessageEmitter::transport_byte(MidiEvent::start(0), config, midi);
                    MessageEmitter::mmc(0, config, MmcCommand::Play, midi);
                    TransportEdge::Started
                };
                if recording {
                    MessageEmitter::mmc(0, config, MmcCommand::RecordStrobe, midi);
                }
                edge
            }
            (true, false) => {
                if was_recording {
                    MessageEmitter::mmc(0, config, MmcCommand::RecordExit, midi);
                }
                MessageEmitter::transport_byte(MidiEvent::stop(0), config, midi);
                MessageEmitter::mmc(0, config, MmcCommand::Stop, midi);
                TransportEdge::Stopped
            }
            (true, true) => {
                if recording && !was_recording {
                    MessageEmitter::mmc(0, config, MmcCommand::RecordStrobe, midi);
                } else if was_recording && !recording {
                    MessageEmitter::mmc(0, config, MmcCommand::RecordExit, midi);
                }
                TransportEdge::None
            }
            (false, false) => TransportEdge::None,
        }
    }

    // -------------------------------
    // MARK: Accessors
    // -------------------------------

    #[inline]
    pub fn state(&self) -> TransportState {
        self.state
    }

    #[inline]
    pub fn previous_state(&self) -> TransportState {
        self.previous_state
    }

    /// Last observed position in MIDI beats.
    #[inline]
    pub fn song_position(&self) -> u16 {
        self.song_position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::OutputMode;
    use crate::event::status;

    fn snap(playing: bool, recording: bool, ppq: Option<f64>) -> TimelineSnapshot {
        TimelineSnapshot {
            is_playing: playing,
            is_recording: recording,
            ppq_position: ppq,
            ..Default::default()
        }
    }

    fn all_messages() -> OutputConfig {
        OutputConfig {
            send_mmc: true,
            send_spp: true,
            ..OutputConfig::default()
        }
    }

    #[test]
    fn test_song_position_conversion() {
        assert_eq!(song_position_from_ppq(None), 0);
        assert_eq!(song_position_from_ppq(Some(-1.0)), 0);
        assert_eq!(song_position_from_ppq(Some(2.3)), 9);
        assert_eq!(song_position_from_ppq(Some(1.0e9)), MAX_SONG_POSITION);
    }

    #[test]
    fn test_start_from_zero() {
        let mut tracker = TransportTracker::new();
        let mut midi: Vec<MidiEvent> = Vec::new();

        let edge = tracker.update(&snap(true, false, Some(0.0)), &all_messages(), &mut midi);
        assert_eq!(edge, TransportEdge::Started);
        assert_eq!(midi[0].as_bytes(), &[status::START]);
        assert_eq!(midi[1].mmc_command(), Some(MmcCommand::Play));
        assert_eq!(tracker.state(), TransportState::Playing);
        assert!(midi.iter().all(|e| e.offset == 0));
    }

    #[test]
    fn test_resume_sends_spp_then_continue() {
        let mut tracker = TransportTracker::new();
        let mut midi: Vec<MidiEvent> = Vec::new();

        let edge = tracker.update(&snap(true, false, Some(8.0)), &all_messages(), &mut midi);
        assert_eq!(edge, TransportEdge::Continued);
        assert_eq!(midi[0].song_position_value(), Some(32));
        assert_eq!(midi[1].as_bytes(), &[status::CONTINUE]);
        assert_eq!(midi[2].mmc_command(), Some(MmcCommand::DeferredPlay));
    }

    #[test]
    fn test_stop_away_from_start_is_paused() {
        let mut tracker = TransportTracker::new();
        let mut midi: Vec<MidiEvent> = Vec::new();
        let cfg = all_messages();

        tracker.update(&snap(true, false, Some(4.0)), &cfg, &mut midi);
        midi.clear();
        let edge = tracker.update(&snap(false, false, Some(4.5)), &cfg, &mut midi);

        assert_eq!(edge, TransportEdge::Stopped);
        assert_eq!(tracker.state(), TransportState::Paused);
        assert_eq!(tracker.previous_state(), TransportState::Playing);
        assert_eq!(midi[0].as_bytes(), &[status::STOP]);
        assert_eq!(midi[1].mmc_command(), Some(MmcCommand::Stop));
    }

    #[test]
    fn test_record_punch_in_and_out() {
        let mut tracker = TransportTracker::new();
        let mut midi: Vec<MidiEvent> = Vec::new();
        let cfg = all_messages();

        tracker.update(&snap(true, false, Some(0.0)), &cfg, &mut midi);
        midi.clear();
        tracker.update(&snap(true, true, Some(1.0)), &cfg, &mut midi);
        assert_eq!(midi[0].mmc_command(), Some(MmcCommand::RecordStrobe));
        assert_eq!(tracker.state(), TransportState::Recording);

        midi.clear();
        tracker.update(&snap(false, false, Some(2.0)), &cfg, &mut midi);
        assert_eq!(midi[0].mmc_command(), Some(MmcCommand::RecordExit));
    }

    #[test]
    fn test_note_mode_sends_no_realtime_bytes() {
        let mut tracker = TransportTracker::new();
        let mut midi: Vec<MidiEvent> = Vec::new();
        let cfg = OutputConfig {
            output_mode: OutputMode::NotePulse,
            ..all_messages()
        };

        tracker.update(&snap(true, false, Some(0.0)), &cfg, &mut midi);
        assert_eq!(midi.len(), 1);
        assert!(midi[0].is_mmc());
    }

    #[test]
    fn test_no_edge_no_messages() {
        let mut tracker = TransportTracker::new();
        let mut midi: Vec<MidiEvent> = Vec::new();
        let cfg = all_messages();

        tracker.update(&snap(false, false, None), &cfg, &mut midi);
        tracker.update(&snap(false, false, None), &cfg, &mut midi);
        assert!(midi.is_empty());
        assert_eq!(tracker.state(), TransportState::Stopped);
    }
}
