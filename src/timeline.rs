// src/timeline.rs
//
// Tempo/transport sources.
//
// Three providers (host playhead, a manual constant, a Link timeline)
// are normalized into one `TimelineSnapshot` per block. Nothing here
// has side effects or allocates.

use crate::link::{HostClock, LinkAdapter, LinkSession};
use crate::tempo::{DEFAULT_BPM, sanitize_bpm};

/// Which source feeds the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SyncSource {
    #[default]
    Host = 0,
    Manual = 1,
    Link = 2,
}

impl SyncSource {
    pub fn from_index(index: u8) -> Self {
        match index {
            1 => SyncSource::Manual,
            2 => SyncSource::Link,
            _ => SyncSource::Host,
        }
    }

    /// Whether this source can report musical position.
    #[inline]
    pub fn provides_position(self) -> bool {
        !matches!(self, SyncSource::Manual)
    }
}

/// What the host pushed for the current block.
///
/// Every field a host may omit is optional; omissions degrade to
/// 120 BPM / stopped / position zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HostSnapshot {
    pub bpm: Option<f64>,
    pub is_playing: bool,
    pub is_recording: bool,
    pub position_seconds: Option<f64>,
    pub ppq_position: Option<f64>,
}

impl HostSnapshot {
    pub fn playing(bpm: f64, ppq_position: f64) -> Self {
        Self {
            bpm: Some(bpm),
            is_playing: true,
            is_recording: false,
            position_seconds: None,
            ppq_position: Some(ppq_position),
        }
    }
}

/// One block's view of tempo and transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineSnapshot {
    /// Always > 0
    pub tempo_bpm: f64,
    pub is_playing: bool,
    pub is_recording: bool,
    pub position_seconds: f64,
    /// Quarter notes from song start; `None` when the source has no position.
    pub ppq_position: Option<f64>,
}

impl TimelineSnapshot {
    #[inline]
    pub fn has_ppq(&self) -> bool {
        self.ppq_position.is_some()
    }
}

impl Default for TimelineSnapshot {
    fn default() -> Self {
        Self {
            tempo_bpm: DEFAULT_BPM,
            is_playing: false,
            is_recording: false,
            position_seconds: 0.0,
            ppq_position: None,
        }
    }
}

/// Anything that can describe the current block's timeline.
pub trait TimelineSource {
    fn snapshot(&self) -> TimelineSnapshot;
}

// -------------------------------
// MARK: Host
// -------------------------------

/// Latest playhead state pushed by the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostTimeline {
    latest: HostSnapshot,
}

impl HostTimeline {
    pub fn push(&mut self, snapshot: HostSnapshot) {
        self.latest = snapshot;
    }

    pub fn latest(&self) -> &HostSnapshot {
        &self.latest
    }
}

impl TimelineSource for HostTimeline {
    fn snapshot(&self) -> TimelineSnapshot {
        let host = &self.latest;
        TimelineSnapshot {
            tempo_bpm: sanitize_bpm(host.bpm.unwrap_or(DEFAULT_BPM)),
            is_playing: host.is_playing,
            is_recording: host.is_recording,
            position_seconds: host
                .position_seconds
                .filter(|s| s.is_finite())
                .unwrap_or(0.0),
            // Pre-roll reports negative positions; clamp to song start.
            ppq_position: host
                .ppq_position
                .filter(|p| p.is_finite())
                .map(|p| p.max(0.0)),
        }
    }
}

// -------------------------------
// MARK: Manual
// -------------------------------

/// Constant tempo that always runs, with or without a transport.
#[derive(Debug, Clone, Copy)]
pub struct ManualTimeline {
    pub bpm: f64,
}

impl ManualTimeline {
    pub fn new(bpm: f64) -> Self {
        Self { bpm }
    }
}

impl TimelineSource for ManualTimeline {
    fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            tempo_bpm: sanitize_bpm(self.bpm),
            is_playing: true,
            is_recording: false,
            position_seconds: 0.0,
            ppq_position: None,
        }
    }
}

// -------------------------------
// MARK: Link
// -------------------------------

impl<S: LinkSession, C: HostClock> TimelineSource for LinkAdapter<S, C> {
    fn snapshot(&self) -> TimelineSnapshot {
        if !self.is_enabled() {
            return TimelineSnapshot::default();
        }
        let beat = self.beat_at_block_start().max(0.0);
        let tempo = self.tempo();
        TimelineSnapshot {
            tempo_bpm: tempo,
            is_playing: self.is_playing(),
            is_recording: false,
            position_seconds: beat * 60.0 / tempo,
            ppq_position: Some(beat),
        }
    }
}

/// Pick the active source's snapshot for this block.
#[inline]
pub fn resolve(
    source: SyncSource,
    host: &impl TimelineSource,
    manual: &impl TimelineSource,
    link: &impl TimelineSource,
) -> TimelineSnapshot {
    match source {
        SyncSource::Host => host.snapshot(),
        SyncSource::Manual => manual.snapshot(),
        SyncSource::Link => link.snapshot(),
    }
}
