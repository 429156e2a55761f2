// src/tempo.rs
//
// Pulse resolution and pulse-rate math.
//
// One formula everywhere: pulses per second = (bpm / 60) * ppqn.
// The resolution is already "per quarter note"; no bar factor is applied.

use std::fmt;

/// Tempo used whenever a source reports something unusable.
pub const DEFAULT_BPM: f64 = 120.0;

pub const SECONDS_PER_MINUTE: f64 = 60.0;

/// Smallest interval the scheduler will run at.
///
/// A note-off lands one sample after its note-on, so two samples is the
/// tightest spacing that keeps the pulse stream strictly ordered.
pub const MIN_PULSE_INTERVAL: f64 = 2.0;

/// Pulses per quarter note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Resolution {
    /// Standard MIDI clock
    #[default]
    Ppqn24 = 24,
    /// Korg
    Ppqn48 = 48,
    /// Oberheim / Linn
    Ppqn96 = 96,
    Ppqn192 = 192,
    /// DAW-grade timing
    Ppqn480 = 480,
}

impl Resolution {
    pub const ALL: [Resolution; 5] = [
        Resolution::Ppqn24,
        Resolution::Ppqn48,
        Resolution::Ppqn96,
        Resolution::Ppqn192,
        Resolution::Ppqn480,
    ];

    #[inline]
    pub fn ppqn(self) -> u32 {
        self as u32
    }

    /// Map a host choice-parameter index to a resolution.
    ///
    /// Unknown indices fall back to 24 PPQN.
    pub fn from_index(index: usize) -> Self {
        Self::ALL.get(index).copied().unwrap_or_default()
    }

    pub fn index(self) -> usize {
        Self::ALL.iter().position(|r| *r == self).unwrap_or(0)
    }
}

/// A PPQN value outside the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidResolution(pub u32);

impl fmt::Display for InvalidResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unsupported resolution {} (expected 24, 48, 96, 192 or 480 PPQN)",
            self.0
        )
    }
}

impl std::error::Error for InvalidResolution {}

impl TryFrom<u32> for Resolution {
    type Error = InvalidResolution;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.ppqn() == value)
            .ok_or(InvalidResolution(value))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} PPQN", self.ppqn())
    }
}

/// Replace a non-positive or non-finite tempo with the default.
#[inline]
pub fn sanitize_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() && bpm > 0.0 {
        bpm
    } else {
        DEFAULT_BPM
    }
}

/// Pulses per second for a tempo and resolution.
#[inline]
pub fn pulse_rate(bpm: f64, resolution: Resolution) -> f64 {
    (sanitize_bpm(bpm) / SECONDS_PER_MINUTE) * resolution.ppqn() as f64
}

/// Samples between two pulses.
///
/// Degenerate results fall back to one pulse per second.
#[inline]
pub fn pulse_interval_samples(sample_rate: f64, bpm: f64, resolution: Resolution) -> f64 {
    let interval = sample_rate / pulse_rate(bpm, resolution);
    if !interval.is_finite() || interval <= 0.0 {
        return sample_rate.max(MIN_PULSE_INTERVAL);
    }
    interval.max(MIN_PULSE_INTERVAL)
}

/// Quarter notes covered by a number of samples at a given tempo.
#[inline]
pub fn samples_to_quarters(samples: f64, sample_rate: f64, bpm: f64) -> f64 {
    if sample_rate <= 0.0 {
        return 0.0;
    }
    samples / sample_rate * sanitize_bpm(bpm) / SECONDS_PER_MINUTE
}
