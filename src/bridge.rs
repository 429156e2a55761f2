//! Thread-safe bridge between the control thread and the audio engine.
//!
//! # Architecture
//!
//! - **Control thread** owns [`ControlHandle`]: writes configuration into
//!   a [`SharedConfig`], queues one-shot commands, reads [`EngineReadback`]
//! - **Audio thread** owns [`EngineHandle`] with the [`PulseEngine`]
//! - Configuration travels through atomics read once per block; one-shot
//!   commands go through an MPSC channel drained at the block boundary
//!
//! # Usage
//!
//! ```ignore
//! let (control, mut engine) = create_bridge(PulseEngine::new(48_000.0));
//!
//! // Control thread
//! control.config().set_sync_source(SyncSource::Manual);
//! control.send_mmc(MmcCommand::Play);
//!
//! // Audio thread
//! engine.process(512, &mut midi, None);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering},
    mpsc::{self, Receiver, Sender},
};

use log::{debug, info};

use crate::audio_buffer::AudioBuffer;
use crate::config::SharedConfig;
use crate::engine::PulseEngine;
use crate::event::{LocateTarget, MidiSink, MmcCommand};
use crate::link::{HostClock, LinkSession, LocalSession, SystemClock};
use crate::params::{self, ParamId, ParamResult};
use crate::timeline::HostSnapshot;
use crate::transport::TransportState;

/// One-shot request from the control thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SendMmc(MmcCommand),
    /// MIDI beats
    SendSongPosition(u32),
    Locate(LocateTarget),
    SetLinkEnabled(bool),
    SetLinkTempo(f64),
    SetLinkPlaying(bool),
    /// Full reset, transport included
    Reset,
}

/// Snapshot of engine state for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineReadback {
    pub bpm: f64,
    pub pulse_interval: f64,
    pub song_position: u16,
    pub transport_state: TransportState,
    pub pulse_count: u64,
    pub resync_count: u64,
    pub link_enabled: bool,
    pub link_peers: usize,
}

/// Lock-free shared state for engine -> control readback.
///
/// Floats are stored as their bit patterns (no AtomicF64 in std).
struct SharedReadback {
    bpm_bits: AtomicU64,
    pulse_interval_bits: AtomicU64,
    song_position: AtomicU32,
    transport_state: AtomicU8,
    pulse_count: AtomicU64,
    resync_count: AtomicU64,
    link_enabled: AtomicBool,
    link_peers: AtomicU32,
}

impl SharedReadback {
    fn new() -> Self {
        Self {
            bpm_bits: AtomicU64::new(crate::tempo::DEFAULT_BPM.to_bits()),
            pulse_interval_bits: AtomicU64::new(0.0_f64.to_bits()),
            song_position: AtomicU32::new(0),
            transport_state: AtomicU8::new(TransportState::Stopped as u8),
            pulse_count: AtomicU64::new(0),
            resync_count: AtomicU64::new(0),
            link_enabled: AtomicBool::new(false),
            link_peers: AtomicU32::new(0),
        }
    }
}

/// Handle for the control thread.
///
/// All methods are safe to call from the main/UI thread. `Clone` shares
/// the same engine.
#[derive(Clone)]
pub struct ControlHandle {
    config: Arc<SharedConfig>,
    command_tx: Sender<Command>,
    readback: Arc<SharedReadback>,
}

/// Handle for the audio thread. Owns the engine.
pub struct EngineHandle<S: LinkSession = LocalSession, C: HostClock = SystemClock> {
    engine: PulseEngine<S, C>,
    config: Arc<SharedConfig>,
    command_rx: Receiver<Command>,
    readback: Arc<SharedReadback>,
}

/// Create a linked pair of handles around `engine`.
///
/// The engine's current configuration seeds the shared configuration.
pub fn create_bridge<S: LinkSession, C: HostClock>(
    engine: PulseEngine<S, C>,
) -> (ControlHandle, EngineHandle<S, C>) {
    let (command_tx, command_rx) = mpsc::channel();
    let config = Arc::new(SharedConfig::new(*engine.config()));
    let readback = Arc::new(SharedReadback::new());
    debug!("bridge created at {} Hz", engine.sample_rate());

    let control = ControlHandle {
        config: Arc::clone(&config),
        command_tx,
        readback: Arc::clone(&readback),
    };

    let engine = EngineHandle {
        engine,
        config,
        command_rx,
        readback,
    };

    (control, engine)
}

// ═══════════════════════════════════════════════════════════════════
// ControlHandle - Control Thread API
// ═══════════════════════════════════════════════════════════════════

impl ControlHandle {
    /// Shared configuration; setters take effect at the next block.
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// Set a parameter by id (plain value).
    pub fn set_param(&self, id: ParamId, value: f32) -> ParamResult<f32> {
        params::apply(&self.config, id, value)
    }

    /// Set a parameter by id (0..1).
    pub fn set_param_normalized(&self, id: ParamId, normalized: f32) -> ParamResult<f32> {
        params::apply_normalized(&self.config, id, normalized)
    }

    pub fn param(&self, id: ParamId) -> ParamResult<f32> {
        params::read(&self.config.snapshot(), id)
    }

    fn send(&self, command: Command) {
        // The engine side may already be gone during teardown.
        let _ = self.command_tx.send(command);
    }

    // ───────────────────────────────────────────────────────────────
    // Block-boundary requests
    // ───────────────────────────────────────────────────────────────

    /// Restart pulse phase at the next block, keeping transport state.
    pub fn force_reset(&self) {
        self.config.request_force_reset();
    }

    /// Realign to the source's absolute position at the next block.
    pub fn request_resync(&self) {
        self.config.request_resync();
    }

    /// Full reset at the next block, transport included.
    pub fn reset(&self) {
        debug!("reset requested");
        self.send(Command::Reset);
    }

    // ───────────────────────────────────────────────────────────────
    // One-shot messages
    // ───────────────────────────────────────────────────────────────

    pub fn send_mmc(&self, command: MmcCommand) {
        self.send(Command::SendMmc(command));
    }

    pub fn send_song_position(&self, midi_beats: u32) {
        self.send(Command::SendSongPosition(midi_beats));
    }

    pub fn send_locate(&self, target: LocateTarget) {
        self.send(Command::Locate(target));
    }

    // ───────────────────────────────────────────────────────────────
    // Link
    // ───────────────────────────────────────────────────────────────

    pub fn set_link_enabled(&self, enabled: bool) {
        info!("link {}", if enabled { "enabled" } else { "disabled" });
        self.send(Command::SetLinkEnabled(enabled));
    }

    pub fn set_link_tempo(&self, bpm: f64) {
        self.send(Command::SetLinkTempo(bpm));
    }

    pub fn set_link_playing(&self, playing: bool) {
        self.send(Command::SetLinkPlaying(playing));
    }

    // ───────────────────────────────────────────────────────────────
    // Readback
    // ───────────────────────────────────────────────────────────────

    pub fn readback(&self) -> EngineReadback {
        let r = &self.readback;
        EngineReadback {
            bpm: f64::from_bits(r.bpm_bits.load(Ordering::Relaxed)),
            pulse_interval: f64::from_bits(r.pulse_interval_bits.load(Ordering::Relaxed)),
            song_position: r.song_position.load(Ordering::Relaxed) as u16,
            transport_state: TransportState::from_index(r.transport_state.load(Ordering::Relaxed)),
            pulse_count: r.pulse_count.load(Ordering::Relaxed),
            resync_count: r.resync_count.load(Ordering::Relaxed),
            link_enabled: r.link_enabled.load(Ordering::Relaxed),
            link_peers: r.link_peers.load(Ordering::Relaxed) as usize,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// EngineHandle - Audio Thread API
// ═══════════════════════════════════════════════════════════════════

impl<S: LinkSession, C: HostClock> EngineHandle<S, C> {
    /// Pull configuration and drain pending commands.
    ///
    /// Called by `process`; call it directly only when driving the engine
    /// by hand.
    pub fn process_commands(&mut self) {
        self.engine.set_config(self.config.snapshot());

        if self.config.take_force_reset() {
            self.engine.force_reset();
        }
        if self.config.take_resync_request() {
            self.engine.request_resync();
        }

        while let Ok(command) = self.command_rx.try_recv() {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::SendMmc(cmd) => {
                self.engine.send_mmc_command(cmd);
            }
            Command::SendSongPosition(beats) => {
                self.engine.send_song_position(beats);
            }
            Command::Locate(target) => {
                self.engine.send_mmc_locate(target);
            }
            Command::SetLinkEnabled(enabled) => self.engine.link_mut().set_enabled(enabled),
            Command::SetLinkTempo(bpm) => self.engine.link_mut().set_tempo(bpm),
            Command::SetLinkPlaying(playing) => self.engine.link_mut().set_is_playing(playing),
            Command::Reset => self.engine.reset(),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Audio Processing (delegates to PulseEngine)
    // ───────────────────────────────────────────────────────────────

    /// Latest host playhead, before `process`.
    #[inline]
    pub fn set_host_snapshot(&mut self, snapshot: HostSnapshot) {
        self.engine.set_host_snapshot(snapshot);
    }

    /// Run one block and publish readback.
    pub fn process<M: MidiSink>(
        &mut self,
        num_samples: usize,
        midi: &mut M,
        audio: Option<&mut AudioBuffer>,
    ) -> u32 {
        self.process_commands();
        let fired = self.engine.process(num_samples, midi, audio);
        self.sync_readback();
        fired
    }

    pub fn prepare(&mut self, sample_rate: f64) {
        self.engine.prepare(sample_rate);
        self.sync_readback();
    }

    #[inline]
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.engine.set_sample_rate(sample_rate);
    }

    /// Sync readback state from the engine.
    pub fn sync_readback(&self) {
        let r = &self.readback;
        let e = &self.engine;
        r.bpm_bits.store(e.current_bpm().to_bits(), Ordering::Relaxed);
        r.pulse_interval_bits
            .store(e.pulse_interval().to_bits(), Ordering::Relaxed);
        r.song_position
            .store(e.song_position() as u32, Ordering::Relaxed);
        r.transport_state
            .store(e.transport_state() as u8, Ordering::Relaxed);
        r.pulse_count.store(e.pulse_count(), Ordering::Relaxed);
        r.resync_count.store(e.resync_count(), Ordering::Relaxed);
        r.link_enabled.store(e.link().is_enabled(), Ordering::Relaxed);
        r.link_peers
            .store(e.link().num_peers() as u32, Ordering::Relaxed);
    }

    pub fn engine(&self) -> &PulseEngine<S, C> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PulseEngine<S, C> {
        &mut self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MidiEvent;
    use crate::params::ids;
    use crate::timeline::SyncSource;

    fn bridge() -> (ControlHandle, EngineHandle) {
        let mut engine = PulseEngine::new(48_000.0);
        engine.prepare(48_000.0);
        create_bridge(engine)
    }

    #[test]
    fn test_config_reaches_engine_at_block_start() {
        let (control, mut engine) = bridge();
        control.config().set_sync_source(SyncSource::Manual);
        control.set_param(ids::MANUAL_BPM, 150.0).unwrap();

        let mut midi: Vec<MidiEvent> = Vec::new();
        engine.process(64, &mut midi, None);

        assert_eq!(engine.engine().config().sync_source, SyncSource::Manual);
        assert_eq!(control.readback().bpm, 150.0);
        assert_eq!(control.readback().transport_state, TransportState::Playing);
        assert_eq!(control.param(ids::MANUAL_BPM), Ok(150.0));
    }

    #[test]
    fn test_commands_are_emitted_next_block() {
        let (control, mut engine) = bridge();
        control.config().set_send_mmc(true);
        control.send_mmc(MmcCommand::RecordPause);
        control.send_song_position(48);

        let mut midi: Vec<MidiEvent> = Vec::new();
        engine.process(64, &mut midi, None);
        assert_eq!(midi[0].mmc_command(), Some(MmcCommand::RecordPause));
        assert_eq!(midi[1].song_position_value(), Some(48));
    }

    #[test]
    fn test_disabled_via_config_is_silent() {
        let (control, mut engine) = bridge();
        control.config().set_sync_source(SyncSource::Manual);
        control.config().set_enabled(false);

        let mut midi: Vec<MidiEvent> = Vec::new();
        engine.process(48_000, &mut midi, None);
        assert!(midi.is_empty());
        assert_eq!(control.readback().pulse_count, 0);
    }

    #[test]
    fn test_link_commands() {
        let (control, mut engine) = bridge();
        control.set_link_enabled(true);
        control.set_link_tempo(97.0);

        let mut midi: Vec<MidiEvent> = Vec::new();
        engine.process(64, &mut midi, None);
        let readback = control.readback();
        assert!(readback.link_enabled);
        assert_eq!(readback.link_peers, 0);
        assert_eq!(engine.engine().link().tempo(), 97.0);
    }

    #[test]
    fn test_force_reset_flag_consumed() {
        let (control, mut engine) = bridge();
        control.config().set_sync_source(SyncSource::Manual);
        let mut midi: Vec<MidiEvent> = Vec::new();
        engine.process(500, &mut midi, None);
        assert_eq!(control.readback().pulse_count, 1);

        control.force_reset();
        midi.clear();
        engine.process(10, &mut midi, None);
        // phase restarted: fires again at offset 0
        assert!(midi.iter().any(|e| e.is_clock() && e.offset == 0));
        assert_eq!(control.readback().pulse_count, 1);
    }
}
