// src/engine.rs

use log::info;

use crate::audio_buffer::AudioBuffer;
use crate::config::OutputConfig;
use crate::detector::{Discontinuity, ResyncState, Resynchronizer, TempoChangeDetector};
use crate::emitter::MessageEmitter;
use crate::event::{LocateTarget, MAX_SONG_POSITION, MidiEvent, MidiSink, MmcCommand};
use crate::link::{HostClock, LinkAdapter, LinkSession, LocalSession, SystemClock};
use crate::phase::PulsePhaseModel;
use crate::scheduler::PulseScheduler;
use crate::timeline::{
    HostSnapshot, HostTimeline, ManualTimeline, SyncSource, TimelineSnapshot, resolve,
};
use crate::transport::{TransportState, TransportTracker};

/// One-shot messages queued between blocks.
pub const PENDING_CAPACITY: usize = 16;

/// Sample-accurate sync pulse engine.
///
/// This struct runs exclusively on the audio thread during `process`.
/// It must be deterministic, allocation-free, and lock-free there.
/// Configuration arrives as a plain snapshot between blocks; one-shot
/// requests (`force_reset`, `request_resync`, MMC/SPP commands) are
/// applied at the next block boundary, never mid-block.
pub struct PulseEngine<S: LinkSession = LocalSession, C: HostClock = SystemClock> {
    config: OutputConfig,
    sample_rate: f64,

    /// Tempo/transport providers
    host: HostTimeline,
    link: LinkAdapter<S, C>,

    scheduler: PulseScheduler,
    detector: TempoChangeDetector,
    resync: Resynchronizer,
    tracker: TransportTracker,

    /// Explicit MMC/SPP/Locate, flushed at offset 0
    pending: heapless::Vec<MidiEvent, PENDING_CAPACITY>,
    force_reset_pending: bool,
    resync_pending: bool,
    /// Sample rate moved since the last block
    rate_changed: bool,

    /// Source used for the previous block
    last_source: SyncSource,
    last_snapshot: TimelineSnapshot,
}

impl PulseEngine<LocalSession, SystemClock> {
    /// Engine with a local, network-free Link session.
    pub fn new(sample_rate: f64) -> Self {
        Self::with_link(sample_rate, LinkAdapter::local())
    }
}

impl<S: LinkSession, C: HostClock> PulseEngine<S, C> {
    pub fn with_link(sample_rate: f64, link: LinkAdapter<S, C>) -> Self {
        let config = OutputConfig::default();
        let mut engine = Self {
            config,
            sample_rate,
            host: HostTimeline::default(),
            link,
            scheduler: PulseScheduler::new(sample_rate, config.pulse_width_ms),
            detector: TempoChangeDetector::new(),
            resync: Resynchronizer::new(),
            tracker: TransportTracker::new(),
            pending: heapless::Vec::new(),
            force_reset_pending: false,
            resync_pending: false,
            rate_changed: false,
            last_source: config.sync_source,
            last_snapshot: TimelineSnapshot::default(),
        };
        engine.link.prepare(sample_rate);
        engine
    }

    // -------------------------------
    // MARK: Lifecycle
    // -------------------------------

    /// (Re)initialize for a sample rate. Resets all timing state.
    pub fn prepare(&mut self, sample_rate: f64) {
        info!("prepare: {} Hz, {}", sample_rate, self.config.resolution);
        self.sample_rate = sample_rate;
        self.scheduler.prepare(sample_rate, self.config.pulse_width_ms);
        self.link.prepare(sample_rate);
        self.reset();
    }

    /// Everything back to power-on state, transport included.
    pub fn reset(&mut self) {
        self.reset_timing();
        self.tracker.reset();
        self.pending.clear();
        self.force_reset_pending = false;
        self.resync_pending = false;
        self.rate_changed = false;
        self.last_snapshot = TimelineSnapshot::default();
        self.link.reset();
    }

    /// Restart pulse phase at the next block; transport state is kept.
    pub fn force_reset(&mut self) {
        self.force_reset_pending = true;
    }

    /// Realign to the source's absolute position at the next block.
    pub fn request_resync(&mut self) {
        self.resync_pending = true;
    }

    /// Follow a sample-rate change without dropping phase.
    ///
    /// Phase is rescaled to the new rate. A source with an absolute position
    /// is also realigned to it on the next block. No-op if the rate is
    /// unchanged.
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        if sample_rate == self.sample_rate || !sample_rate.is_finite() || sample_rate <= 0.0 {
            return;
        }
        self.sample_rate = sample_rate;
        self.scheduler
            .set_sample_rate(sample_rate, self.config.pulse_width_ms);
        self.link.prepare(sample_rate);
        self.rate_changed = true;
    }

    fn reset_timing(&mut self) {
        self.scheduler.reset();
        self.detector.reset();
        self.resync.settle();
    }

    // -------------------------------
    // MARK: Configuration
    // -------------------------------

    pub fn set_config(&mut self, config: OutputConfig) {
        self.config = config.sanitized();
    }

    /// Takes effect immediately; phase is kept for re-enable.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Latest playhead from the host, for the next `process`.
    #[inline]
    pub fn set_host_snapshot(&mut self, snapshot: HostSnapshot) {
        self.host.push(snapshot);
    }

    // -------------------------------
    // MARK: Direct commands
    // -------------------------------

    /// Queue an MMC command for offset 0 of the next block.
    ///
    /// Returns `false` if the queue is full.
    pub fn send_mmc_command(&mut self, command: MmcCommand) -> bool {
        let event = MidiEvent::mmc(0, self.config.mmc_device_id, command);
        self.enqueue(event)
    }

    /// Queue an MMC Locate for offset 0 of the next block.
    pub fn send_mmc_locate(&mut self, target: LocateTarget) -> bool {
        let event = MidiEvent::mmc_locate(0, self.config.mmc_device_id, target);
        self.enqueue(event)
    }

    /// Queue a Song Position Pointer (MIDI beats, clamped to 14 bits).
    pub fn send_song_position(&mut self, midi_beats: u32) -> bool {
        let beats = midi_beats.min(MAX_SONG_POSITION as u32) as u16;
        self.enqueue(MidiEvent::song_position(0, beats))
    }

    fn enqueue(&mut self, event: MidiEvent) -> bool {
        self.pending.push(event).is_ok()
    }

    // -------------------------------
    // MARK: Processing
    // -------------------------------

    /// Process one block of `num_samples`.
    ///
    /// MIDI goes to `midi` with offsets in `[0, num_samples)`; audio bursts
    /// are added into `audio` if given. Returns the number of pulse firings.
    ///
    /// Offset-0 order: queued commands, transport edges, resync SPP,
    /// carried note-off, then the periodic stream. A forced reset releases
    /// the carried note-off right after the queued commands.
    pub fn process<M: MidiSink>(
        &mut self,
        num_samples: usize,
        midi: &mut M,
        audio: Option<&mut AudioBuffer>,
    ) -> u32 {
        if num_samples == 0 || !self.config.enabled {
            return 0;
        }

        let config = self.config;

        for event in self.pending.iter() {
            midi.push(*event);
        }
        self.pending.clear();

        if self.force_reset_pending {
            self.force_reset_pending = false;
            // Release before the owed note-off is forgotten.
            self.scheduler.flush_note_off(midi);
            self.reset_timing();
            self.resync_pending = true;
        }

        if config.sync_source != self.last_source {
            self.last_source = config.sync_source;
            self.detector.reset();
        }

        let link_active = self.link.is_enabled();
        if link_active {
            self.link.begin_block(num_samples);
        }

        let manual = ManualTimeline::new(config.manual_bpm);
        let snapshot = resolve(config.sync_source, &self.host, &manual, &self.link);
        self.scheduler.update_rate(snapshot.tempo_bpm, &config);

        let edge = self.tracker.update(&snapshot, &config, midi);

        let discontinuity = if config.sync_source.provides_position() {
            self.detector
                .check(&snapshot, num_samples, self.sample_rate)
        } else {
            Discontinuity::None
        };

        let started_with_position = edge.is_start() && snapshot.has_ppq();
        let rate_resync = std::mem::take(&mut self.rate_changed) && snapshot.has_ppq();
        if discontinuity.is_some() || self.resync_pending || started_with_position || rate_resync
        {
            self.resync_pending = false;
            self.scheduler.realign(
                &mut self.resync,
                snapshot.ppq_position,
                config.resolution,
                config.output_mode,
            );

            // Continue already carried the position.
            if snapshot.has_ppq() && !edge.is_start() {
                MessageEmitter::song_position(0, &config, self.tracker.song_position(), midi);
            }
            self.resync.settle();
        }

        let fired = if snapshot.is_playing || config.send_clock_when_stopped {
            self.scheduler.run_block(&config, num_samples, midi, audio)
        } else {
            self.scheduler.idle_block(midi);
            0
        };

        if link_active {
            self.link.end_block();
        }
        self.last_snapshot = snapshot;

        fired
    }

    // -------------------------------
    // MARK: Accessors
    // -------------------------------

    #[inline]
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Tempo used for the last processed block.
    #[inline]
    pub fn current_bpm(&self) -> f64 {
        self.last_snapshot.tempo_bpm
    }

    /// Pulses per second.
    #[inline]
    pub fn pulse_rate(&self) -> f64 {
        self.scheduler.phase().pulse_rate()
    }

    /// Samples between pulses.
    #[inline]
    pub fn pulse_interval(&self) -> f64 {
        self.scheduler.phase().pulse_interval()
    }

    #[inline]
    pub fn transport_state(&self) -> TransportState {
        self.tracker.state()
    }

    /// MIDI beats (16th notes).
    #[inline]
    pub fn song_position(&self) -> u16 {
        self.tracker.song_position()
    }

    #[inline]
    pub fn resync_state(&self) -> ResyncState {
        self.resync.state()
    }

    /// Phase realignments since construction.
    #[inline]
    pub fn resync_count(&self) -> u64 {
        self.resync.count()
    }

    /// Firings since the last reset.
    #[inline]
    pub fn pulse_count(&self) -> u64 {
        self.scheduler.pulse_count()
    }

    #[inline]
    pub fn phase(&self) -> &PulsePhaseModel {
        self.scheduler.phase()
    }

    #[inline]
    pub fn last_snapshot(&self) -> &TimelineSnapshot {
        &self.last_snapshot
    }

    pub fn link(&self) -> &LinkAdapter<S, C> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut LinkAdapter<S, C> {
        &mut self.link
    }
}
