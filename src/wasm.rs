//! WebAssembly bindings via wasm-bindgen for browser integration.
//!
//! This module is only compiled when the `web` feature is enabled.
//!
//! # Usage
//!
//! Build with wasm-pack:
//! ```bash
//! wasm-pack build --target web --features web
//! ```
//!
//! # JavaScript Example
//!
//! ```javascript
//! import init, { pulse24sync_init, WebPulseEngine } from './pulse24sync.js';
//!
//! await init();
//! pulse24sync_init();
//!
//! const sync = new WebPulseEngine(sampleRate, 128);
//! sync.set_param(PARAM_SYNC_SOURCE, 1); // manual
//!
//! // In the AudioWorklet's process():
//! sync.process_audio(outputs[0][0], outputs[0][1]);
//! const midi = sync.take_midi(); // [offset u32 LE, len, bytes...]*
//! ```

use wasm_bindgen::prelude::*;

use crate::audio_buffer::AudioBuffer;
use crate::bridge::{ControlHandle, EngineHandle, EngineReadback, create_bridge};
use crate::engine::PulseEngine;
use crate::event::{MidiBuffer, MmcCommand};
use crate::params;
use crate::timeline::HostSnapshot;

// Default audio configuration
const DEFAULT_MAX_BLOCK: usize = 128;
const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;
const MIDI_CAPACITY: usize = 256;

// ═══════════════════════════════════════════════════════════════════════════
// Initialization
// ═══════════════════════════════════════════════════════════════════════════

/// Initialize the wasm module. Call this once before using any other functions.
/// Sets up panic hooks and console logging.
#[wasm_bindgen]
pub fn pulse24sync_init() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Debug).ok();
}

// ═══════════════════════════════════════════════════════════════════════════
// Readback Data
// ═══════════════════════════════════════════════════════════════════════════

/// Readback data from the engine (for UI displays).
#[wasm_bindgen]
#[derive(Clone, Copy, Default)]
pub struct Pulse24Readback {
    /// Tempo of the active source.
    pub bpm: f64,
    /// Samples between pulses.
    pub pulse_interval: f64,
    /// Song position in MIDI beats (16ths).
    pub song_position: u16,
    /// 0 stopped, 1 playing, 2 paused, 3 recording.
    pub transport_state: u8,
    /// Pulses fired since the last reset.
    pub pulse_count: f64,
    /// Number of realignments since the last reset.
    pub resync_count: f64,
    pub link_enabled: bool,
    pub link_peers: u32,
}

impl From<EngineReadback> for Pulse24Readback {
    fn from(r: EngineReadback) -> Self {
        Self {
            bpm: r.bpm,
            pulse_interval: r.pulse_interval,
            song_position: r.song_position,
            transport_state: r.transport_state as u8,
            pulse_count: r.pulse_count as f64,
            resync_count: r.resync_count as f64,
            link_enabled: r.link_enabled,
            link_peers: r.link_peers as u32,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════

/// Pulse engine for an AudioWorklet.
///
/// Holds both bridge halves: a worklet owns the engine and receives
/// control messages on the same thread.
#[wasm_bindgen]
pub struct WebPulseEngine {
    control: ControlHandle,
    engine: EngineHandle,
    scratch: Vec<f32>,
    midi: MidiBuffer,
    /// Offset-tagged MIDI from the last processed block, ready for JS
    packed: Vec<u8>,
}

#[wasm_bindgen]
impl WebPulseEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: f64, max_block: u32) -> WebPulseEngine {
        let sample_rate = if sample_rate.is_finite() && sample_rate > 0.0 {
            sample_rate
        } else {
            DEFAULT_SAMPLE_RATE
        };
        let max_block = if max_block == 0 {
            DEFAULT_MAX_BLOCK
        } else {
            max_block as usize
        };

        let mut engine = PulseEngine::new(sample_rate);
        engine.prepare(sample_rate);
        let (control, engine) = create_bridge(engine);

        WebPulseEngine {
            control,
            engine,
            scratch: vec![0.0; max_block],
            midi: MidiBuffer::with_capacity(MIDI_CAPACITY),
            packed: Vec::with_capacity(MIDI_CAPACITY * 8),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Parameters
    // ─────────────────────────────────────────────────────────────────────────

    /// Set a parameter by id. Returns the stored value, or NaN if rejected.
    pub fn set_param(&self, id: u32, value: f32) -> f32 {
        self.control.set_param(id, value).unwrap_or(f32::NAN)
    }

    /// Set a parameter from a 0..1 slider position.
    pub fn set_param_normalized(&self, id: u32, normalized: f32) -> f32 {
        self.control
            .set_param_normalized(id, normalized)
            .unwrap_or(f32::NAN)
    }

    pub fn get_param(&self, id: u32) -> f32 {
        self.control.param(id).unwrap_or(f32::NAN)
    }

    /// Display string for a parameter value, e.g. "22.0 ms".
    pub fn format_param(&self, id: u32, value: f32) -> Option<String> {
        params::param_info(id).ok().map(|info| info.format(value))
    }

    pub fn param_name(&self, id: u32) -> Option<String> {
        params::param_info(id).ok().map(|info| info.name.to_string())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────────

    pub fn reset(&self) {
        self.control.reset();
    }

    pub fn force_reset(&self) {
        self.control.force_reset();
    }

    pub fn request_resync(&self) {
        self.control.request_resync();
    }

    /// Queue an MMC command by command byte. Returns false if unknown.
    pub fn send_mmc(&self, command: u8) -> bool {
        match MmcCommand::from_byte(command) {
            Some(cmd) => {
                self.control.send_mmc(cmd);
                true
            }
            None => false,
        }
    }

    pub fn send_song_position(&self, midi_beats: u32) {
        self.control.send_song_position(midi_beats);
    }

    pub fn set_link_enabled(&self, enabled: bool) {
        self.control.set_link_enabled(enabled);
    }

    pub fn set_link_tempo(&self, bpm: f64) {
        self.control.set_link_tempo(bpm);
    }

    pub fn set_link_playing(&self, playing: bool) {
        self.control.set_link_playing(playing);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Processing
    // ─────────────────────────────────────────────────────────────────────────

    /// Host playhead for the next block. NaN means "not reported".
    pub fn set_host_position(
        &mut self,
        bpm: f64,
        is_playing: bool,
        is_recording: bool,
        position_seconds: f64,
        ppq_position: f64,
    ) {
        let reported = |v: f64| if v.is_nan() { None } else { Some(v) };
        self.engine.set_host_snapshot(HostSnapshot {
            bpm: reported(bpm),
            is_playing,
            is_recording,
            position_seconds: reported(position_seconds),
            ppq_position: reported(ppq_position),
        });
    }

    /// Render one block. Burst audio is added into both channels; MIDI is
    /// collected for `take_midi`. Returns the number of pulses fired.
    pub fn process_audio(&mut self, left: &mut [f32], right: &mut [f32]) -> u32 {
        let frames = left.len().min(right.len()).min(self.scratch.len());
        self.midi.clear();

        let scratch = &mut self.scratch[..frames];
        scratch.fill(0.0);
        let mut mono = AudioBuffer::planar(scratch, 1);
        let fired = self.engine.process(frames, &mut self.midi, Some(&mut mono));

        for (i, s) in self.scratch[..frames].iter().enumerate() {
            left[i] += *s;
            right[i] += *s;
        }

        self.pack_midi();
        fired
    }

    /// Run a block with no audio output; returns its packed MIDI.
    pub fn process_midi(&mut self, frames: u32) -> Vec<u8> {
        self.midi.clear();
        self.engine.process(frames as usize, &mut self.midi, None);
        self.pack_midi();
        self.take_midi()
    }

    /// MIDI from the last block as `[offset u32 LE, len u8, bytes...]` records.
    ///
    /// Returns a copy; the reserved pack buffer stays with the engine.
    pub fn take_midi(&mut self) -> Vec<u8> {
        self.packed.clone()
    }

    pub fn readback(&self) -> Pulse24Readback {
        self.control.readback().into()
    }

    fn pack_midi(&mut self) {
        self.packed.clear();
        for event in self.midi.iter() {
            let bytes = event.as_bytes();
            self.packed.extend_from_slice(&event.offset.to_le_bytes());
            self.packed.push(bytes.len() as u8);
            self.packed.extend_from_slice(bytes);
        }
    }
}
