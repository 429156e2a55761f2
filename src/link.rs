// src/link.rs
//
// Shared-timeline (Link) adapter.
//
// The engine never speaks the Link network protocol. It consumes a small
// timeline capability (`LinkSession`) and maps its own sample clock onto the
// host's monotonic clock through `HostTimeFilter`.
//
// Everything reachable from the audio thread here is lock-free and
// allocation-free: the filter is a fixed-capacity history and the local
// session is plain data.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use heapless::HistoryBuffer;

use crate::tempo::{DEFAULT_BPM, SECONDS_PER_MINUTE, sanitize_bpm};

/// Host time in microseconds on a monotonic clock.
pub type HostTime = i64;

/// Quantum used for beat/phase queries (one 4/4 bar).
pub const DEFAULT_QUANTUM: f64 = 4.0;

/// Points kept by the sample-time → host-time regression.
const FILTER_POINTS: usize = 512;

const MICROS_PER_SECOND: f64 = 1.0e6;

// ═══════════════════════════════════════════════════════════════════
// Clocks
// ═══════════════════════════════════════════════════════════════════

/// Monotonic host clock.
pub trait HostClock {
    fn micros(&self) -> HostTime;
}

/// Wall clock backed by `Instant`, relative to creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for SystemClock {
    #[inline]
    fn micros(&self) -> HostTime {
        self.origin.elapsed().as_micros() as HostTime
    }
}

/// Externally driven clock. Clones share the same time.
///
/// Used for offline rendering and tests where wall time is meaningless.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, micros: HostTime) {
        self.now.store(micros, Ordering::Relaxed);
    }

    pub fn advance(&self, micros: HostTime) {
        self.now.fetch_add(micros, Ordering::Relaxed);
    }
}

impl HostClock for ManualClock {
    #[inline]
    fn micros(&self) -> HostTime {
        self.now.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Session capability
// ═══════════════════════════════════════════════════════════════════

/// What the engine needs from a shared tempo session.
///
/// Implementations must keep every method callable from the audio
/// thread: no locks, no allocation, no blocking.
pub trait LinkSession {
    fn enable(&mut self, enabled: bool);
    fn is_enabled(&self) -> bool;
    fn num_peers(&self) -> usize;

    fn tempo(&self) -> f64;
    fn set_tempo(&mut self, bpm: f64, at: HostTime);

    fn is_playing(&self) -> bool;
    fn set_is_playing(&mut self, playing: bool, at: HostTime);

    fn beat_at_time(&self, at: HostTime, quantum: f64) -> f64;
    fn phase_at_time(&self, at: HostTime, quantum: f64) -> f64;
}

/// Single-peer, in-process timeline.
///
/// Behaves like a Link session nobody else has joined: tempo and
/// start/stop are local, beat time runs continuously from an anchor.
#[derive(Debug, Clone)]
pub struct LocalSession {
    enabled: bool,
    tempo: f64,
    playing: bool,
    anchor_time: HostTime,
    anchor_beat: f64,
}

impl LocalSession {
    pub fn new(bpm: f64) -> Self {
        Self {
            enabled: false,
            tempo: sanitize_bpm(bpm),
            playing: false,
            anchor_time: 0,
            anchor_beat: 0.0,
        }
    }

    fn reanchor(&mut self, at: HostTime, beat: f64) {
        self.anchor_time = at;
        self.anchor_beat = beat;
    }
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

impl LinkSession for LocalSession {
    fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn num_peers(&self) -> usize {
        0
    }

    fn tempo(&self) -> f64 {
        self.tempo
    }

    fn set_tempo(&mut self, bpm: f64, at: HostTime) {
        if !(bpm.is_finite() && bpm > 0.0) {
            return;
        }
        // Keep the beat continuous across the change.
        let beat = self.beat_at_time(at, DEFAULT_QUANTUM);
        self.reanchor(at, beat);
        self.tempo = bpm;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn set_is_playing(&mut self, playing: bool, at: HostTime) {
        if playing && !self.playing {
            // Start from the top of the timeline.
            self.reanchor(at, 0.0);
        } else if !playing && self.playing {
            let beat = self.beat_at_time(at, DEFAULT_QUANTUM);
            self.reanchor(at, beat);
        }
        self.playing = playing;
    }

    fn beat_at_time(&self, at: HostTime, _quantum: f64) -> f64 {
        if !self.playing {
            return self.anchor_beat;
        }
        let elapsed = (at - self.anchor_time) as f64 / MICROS_PER_SECOND;
        self.anchor_beat + elapsed * self.tempo / SECONDS_PER_MINUTE
    }

    fn phase_at_time(&self, at: HostTime, quantum: f64) -> f64 {
        if quantum <= 0.0 {
            return 0.0;
        }
        self.beat_at_time(at, quantum).rem_euclid(quantum)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Sample time → host time
// ═══════════════════════════════════════════════════════════════════

/// Least-squares fit of host time against sample time over a sliding
/// window, smoothing out callback jitter.
pub struct HostTimeFilter {
    points: HistoryBuffer<(f64, f64), FILTER_POINTS>,
    sample_rate: f64,
    slope: f64,
    intercept: f64,
}

impl HostTimeFilter {
    pub fn new(sample_rate: f64) -> Self {
        let sample_rate = sample_rate.max(1.0);
        Self {
            points: HistoryBuffer::new(),
            sample_rate,
            slope: MICROS_PER_SECOND / sample_rate,
            intercept: 0.0,
        }
    }

    pub fn reset(&mut self, sample_rate: f64) {
        self.points.clear();
        self.sample_rate = sample_rate.max(1.0);
        self.slope = MICROS_PER_SECOND / self.sample_rate;
        self.intercept = 0.0;
    }

    /// Record that `sample_time` was observed at `host_time` and return
    /// the filtered host time for it.
    pub fn sample_time_to_host_time(&mut self, sample_time: f64, host_time: HostTime) -> HostTime {
        self.points.write((sample_time, host_time as f64));
        self.fit();
        self.host_time_at(sample_time)
    }

    /// Host time predicted by the current fit, without recording a point.
    #[inline]
    pub fn host_time_at(&self, sample_time: f64) -> HostTime {
        (self.slope * sample_time + self.intercept).round() as HostTime
    }

    fn fit(&mut self) {
        let points = self.points.as_slice();
        let n = points.len() as f64;
        if points.is_empty() {
            return;
        }

        let (sum_x, sum_y) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
        let mean_x = sum_x / n;
        let mean_y = sum_y / n;

        let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
            let dx = x - mean_x;
            (sxy + dx * (y - mean_y), sxx + dx * dx)
        });

        // One point (or all at the same sample time) cannot define a slope.
        if sxx > 0.0 {
            self.slope = sxy / sxx;
        } else {
            self.slope = MICROS_PER_SECOND / self.sample_rate;
        }
        self.intercept = mean_y - self.slope * mean_x;
    }
}

// ═══════════════════════════════════════════════════════════════════
// Adapter
// ═══════════════════════════════════════════════════════════════════

/// Owns a Link session for the lifetime of one engine instance.
///
/// Disabled or unavailable sessions read as 120 BPM, not playing,
/// beat and phase zero.
pub struct LinkAdapter<S: LinkSession = LocalSession, C: HostClock = SystemClock> {
    session: S,
    clock: C,
    filter: HostTimeFilter,
    sample_rate: f64,
    /// Sample time at the start of the current block
    sample_time: u64,
    block_size: usize,
}

impl LinkAdapter<LocalSession, SystemClock> {
    /// Local, network-free session on the system clock.
    pub fn local() -> Self {
        Self::new(LocalSession::default(), SystemClock::new())
    }
}

impl<S: LinkSession, C: HostClock> LinkAdapter<S, C> {
    pub fn new(session: S, clock: C) -> Self {
        let sample_rate = 48_000.0;
        Self {
            session,
            clock,
            filter: HostTimeFilter::new(sample_rate),
            sample_rate,
            sample_time: 0,
            block_size: 0,
        }
    }

    /// Re-initialize the clock mapping for a new sample rate.
    pub fn prepare(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate.max(1.0);
        self.sample_time = 0;
        self.block_size = 0;
        self.filter.reset(self.sample_rate);
    }

    pub fn reset(&mut self) {
        self.sample_time = 0;
        self.block_size = 0;
        self.filter.reset(self.sample_rate);
    }

    // -------------------------------
    // MARK: Session control
    // -------------------------------

    pub fn set_enabled(&mut self, enabled: bool) {
        self.session.enable(enabled);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.session.is_enabled()
    }

    #[inline]
    pub fn num_peers(&self) -> usize {
        self.session.num_peers()
    }

    pub fn tempo(&self) -> f64 {
        if self.is_enabled() {
            sanitize_bpm(self.session.tempo())
        } else {
            DEFAULT_BPM
        }
    }

    /// Ignored while disabled or for non-positive tempos.
    pub fn set_tempo(&mut self, bpm: f64) {
        if self.is_enabled() && bpm.is_finite() && bpm > 0.0 {
            let at = self.filter.host_time_at(self.sample_time as f64);
            self.session.set_tempo(bpm, at);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.is_enabled() && self.session.is_playing()
    }

    pub fn set_is_playing(&mut self, playing: bool) {
        if self.is_enabled() {
            let at = self.filter.host_time_at(self.sample_time as f64);
            self.session.set_is_playing(playing, at);
        }
    }

    pub fn beat_at_time(&self, at: HostTime, quantum: f64) -> f64 {
        if self.is_enabled() {
            self.session.beat_at_time(at, quantum)
        } else {
            0.0
        }
    }

    pub fn phase_at_time(&self, at: HostTime, quantum: f64) -> f64 {
        if self.is_enabled() {
            self.session.phase_at_time(at, quantum)
        } else {
            0.0
        }
    }

    // -------------------------------
    // MARK: Audio callback helpers
    // -------------------------------

    /// Host time at which `sample` of the current block leaves the
    /// output, assuming one buffer of output latency.
    pub fn output_time_at_sample(&self, sample: usize, buffer_size: usize) -> HostTime {
        let latency = (MICROS_PER_SECOND * buffer_size as f64 / self.sample_rate).round() as HostTime;
        self.filter
            .host_time_at((self.sample_time + sample as u64) as f64)
            + latency
    }

    /// Feed the clock mapping at the start of a block.
    pub fn begin_block(&mut self, block_size: usize) {
        let now = self.clock.micros();
        self.filter
            .sample_time_to_host_time(self.sample_time as f64, now);
        self.block_size = block_size;
    }

    /// Advance sample time past the block started by `begin_block`.
    pub fn end_block(&mut self) {
        self.sample_time += self.block_size as u64;
        self.block_size = 0;
    }

    /// Beat at the output time of the first sample in the current block.
    pub fn beat_at_block_start(&self) -> f64 {
        let at = self.output_time_at_sample(0, self.block_size);
        self.beat_at_time(at, DEFAULT_QUANTUM)
    }

    #[inline]
    pub fn sample_time(&self) -> u64 {
        self.sample_time
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}
