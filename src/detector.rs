// src/detector.rs
//
// Tempo-change / reposition detection and phase realignment.
//
// Checked once per block for sources that report musical position.
// On a discontinuity the phase is rebuilt from the absolute PPQ position
// instead of being nudged, so neither loop points nor long runs of small
// tempo automation leave a residue.

use crate::phase::{AudioBurstState, PulsePhaseModel};
use crate::tempo::{Resolution, samples_to_quarters};
use crate::timeline::TimelineSnapshot;

/// Tempo delta (BPM) above which the phase is rebuilt.
pub const TEMPO_CHANGE_THRESHOLD: f64 = 0.1;

/// Unexpected PPQ movement (quarter notes) treated as a locate.
pub const POSITION_JUMP_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discontinuity {
    None,
    /// Tempo moved past the threshold
    Tempo,
    /// Position jumped (locate, loop, first position seen)
    Reposition,
}

impl Discontinuity {
    #[inline]
    pub fn is_some(self) -> bool {
        self != Discontinuity::None
    }
}

/// Compares each block's snapshot with the previous one.
#[derive(Debug, Clone, Default)]
pub struct TempoChangeDetector {
    last_tempo: Option<f64>,
    last_ppq: Option<f64>,
    last_playing: bool,
    last_block_samples: usize,
}

impl TempoChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the baseline; the next block is compared against nothing.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Classify this block against the last one, then make it the baseline.
    pub fn check(
        &mut self,
        snapshot: &TimelineSnapshot,
        num_samples: usize,
        sample_rate: f64,
    ) -> Discontinuity {
        let mut result = Discontinuity::None;

        if let Some(last_tempo) = self.last_tempo {
            if (snapshot.tempo_bpm - last_tempo).abs() > TEMPO_CHANGE_THRESHOLD {
                result = Discontinuity::Tempo;
            }
        }

        match (self.last_ppq, snapshot.ppq_position) {
            (Some(last_ppq), Some(ppq)) => {
                let expected = if self.last_playing {
                    samples_to_quarters(
                        self.last_block_samples as f64,
                        sample_rate,
                        self.last_tempo.unwrap_or(snapshot.tempo_bpm),
                    )
                } else {
                    0.0
                };
                if ((ppq - last_ppq) - expected).abs() > POSITION_JUMP_THRESHOLD {
                    result = Discontinuity::Reposition;
                }
            }
            // First position seen since reset: lock onto it.
            (None, Some(_)) => result = Discontinuity::Reposition,
            _ => {}
        }

        self.last_tempo = Some(snapshot.tempo_bpm);
        self.last_ppq = snapshot.ppq_position;
        self.last_playing = snapshot.is_playing;
        self.last_block_samples = num_samples;

        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ResyncState {
    #[default]
    Stable = 0,
    /// Only observable between `begin` and `settle` inside one block
    Resyncing = 1,
}

/// Rebuilds pulse phase from absolute musical position.
#[derive(Debug, Clone, Default)]
pub struct Resynchronizer {
    state: ResyncState,
    count: u64,
}

impl Resynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Realign `phase` (and `burst`, for audio output) to `ppq`.
    ///
    /// Without a position the phase restarts at zero.
    pub fn realign(
        &mut self,
        phase: &mut PulsePhaseModel,
        burst: &mut AudioBurstState,
        ppq: Option<f64>,
        resolution: Resolution,
        audio_output: bool,
    ) {
        self.state = ResyncState::Resyncing;
        self.count += 1;

        let Some(ppq) = ppq else {
            phase.realign(0.0, 0.0);
            burst.stop();
            return;
        };

        let pulses_elapsed = ppq.max(0.0) * resolution.ppqn() as f64;
        let fractional = pulses_elapsed - pulses_elapsed.floor();
        let interval = phase.pulse_interval();
        let position = fractional * interval;

        // Exactly on a boundary: that pulse has not gone out yet.
        let next = if fractional == 0.0 { 0.0 } else { interval };
        phase.realign(position, next);

        let in_burst = position as u32;
        if audio_output && fractional > 0.0 && in_burst < burst.duration_samples() {
            burst.start_at(in_burst);
        } else {
            burst.stop();
        }
    }

    /// Collapse back to `Stable` before the block's samples run.
    #[inline]
    pub fn settle(&mut self) {
        self.state = ResyncState::Stable;
    }

    #[inline]
    pub fn state(&self) -> ResyncState {
        self.state
    }

    /// Realignments since construction.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(tempo: f64, ppq: Option<f64>) -> TimelineSnapshot {
        TimelineSnapshot {
            tempo_bpm: tempo,
            is_playing: true,
            ppq_position: ppq,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_position_locks() {
        let mut detector = TempoChangeDetector::new();
        assert_eq!(
            detector.check(&snap(120.0, Some(3.0)), 512, 48_000.0),
            Discontinuity::Reposition
        );
    }

    #[test]
    fn test_no_position_never_repositions() {
        let mut detector = TempoChangeDetector::new();
        assert_eq!(detector.check(&snap(120.0, None), 512, 48_000.0), Discontinuity::None);
        assert_eq!(detector.check(&snap(120.0, None), 512, 48_000.0), Discontinuity::None);
    }

    #[test]
    fn test_tempo_threshold() {
        let mut detector = TempoChangeDetector::new();
        detector.check(&snap(120.0, None), 512, 48_000.0);
        assert_eq!(detector.check(&snap(120.05, None), 512, 48_000.0), Discontinuity::None);
        assert_eq!(detector.check(&snap(120.25, None), 512, 48_000.0), Discontinuity::Tempo);
    }

    #[test]
    fn test_natural_advance_is_not_a_jump() {
        let mut detector = TempoChangeDetector::new();
        // 24000 samples at 48 kHz, 120 BPM = 1 quarter note per block
        detector.check(&snap(120.0, Some(0.0)), 24_000, 48_000.0);
        assert_eq!(
            detector.check(&snap(120.0, Some(1.0)), 24_000, 48_000.0),
            Discontinuity::None
        );
        assert_eq!(
            detector.check(&snap(120.0, Some(2.0)), 24_000, 48_000.0),
            Discontinuity::None
        );
        // loop back to the start
        assert_eq!(
            detector.check(&snap(120.0, Some(0.0)), 24_000, 48_000.0),
            Discontinuity::Reposition
        );
    }

    #[test]
    fn test_realign_from_absolute_position() {
        let mut phase = PulsePhaseModel::new(48_000.0);
        let mut burst = AudioBurstState::new(48_000.0, 22.0);
        let mut resync = Resynchronizer::new();

        resync.realign(&mut phase, &mut burst, Some(4.3), Resolution::Ppqn24, false);
        let pulses = 4.3 * 24.0;
        let expected = (pulses - f64::floor(pulses)) * phase.pulse_interval();
        assert_eq!(phase.current_position(), expected);
        assert_eq!(phase.next_pulse_time(), phase.pulse_interval());
        assert_eq!(resync.state(), ResyncState::Resyncing);
        resync.settle();
        assert_eq!(resync.state(), ResyncState::Stable);
    }

    #[test]
    fn test_realign_on_boundary_fires_now() {
        let mut phase = PulsePhaseModel::new(48_000.0);
        let mut burst = AudioBurstState::new(48_000.0, 22.0);
        let mut resync = Resynchronizer::new();

        resync.realign(&mut phase, &mut burst, Some(4.0), Resolution::Ppqn24, false);
        assert_eq!(phase.current_position(), 0.0);
        assert!(phase.is_due());
    }

    #[test]
    fn test_realign_inside_burst_resumes_it() {
        let mut phase = PulsePhaseModel::new(48_000.0);
        // 22 ms at 48 kHz = 1056 samples, longer than the 1000-sample interval
        let mut burst = AudioBurstState::new(48_000.0, 22.0);
        let mut resync = Resynchronizer::new();

        resync.realign(&mut phase, &mut burst, Some(0.5 / 24.0), Resolution::Ppqn24, true);
        assert!(burst.is_active());
        assert_eq!(burst.position(), 500);

        burst.set_width_ms(5.0, 48_000.0);
        resync.realign(&mut phase, &mut burst, Some(0.5 / 24.0), Resolution::Ppqn24, true);
        assert!(!burst.is_active());
    }

    #[test]
    fn test_realign_without_position_restarts() {
        let mut phase = PulsePhaseModel::new(48_000.0);
        let mut burst = AudioBurstState::new(48_000.0, 22.0);
        let mut resync = Resynchronizer::new();
        phase.realign(123.0, 1000.0);

        resync.realign(&mut phase, &mut burst, None, Resolution::Ppqn24, false);
        assert_eq!(phase.current_position(), 0.0);
        assert_eq!(resync.count(), 1);
    }
}
