// src/lib.rs
//
// Library entry point for plugin shells (C ABI, wasm) and Rust consumers.

mod audio_buffer;
mod bridge;
mod config;
mod detector;
mod emitter;
mod engine;
mod link;
mod phase;
mod scheduler;
mod tempo;
mod timeline;
mod transport;

pub mod event;
pub mod ffi;
pub mod params;

#[cfg(feature = "web")]
mod wasm;

// Re-export key types for Rust consumers
pub use audio_buffer::{AudioBuffer, Layout};
pub use bridge::{Command, ControlHandle, EngineHandle, EngineReadback, create_bridge};
pub use config::{OutputConfig, SharedConfig};
pub use detector::{Discontinuity, ResyncState, Resynchronizer, TempoChangeDetector};
pub use emitter::{MessageEmitter, OutputMode};
pub use engine::PulseEngine;
pub use event::{LocateTarget, MidiBuffer, MidiEvent, MidiSink, MmcCommand};
pub use link::{
    HostClock, HostTime, HostTimeFilter, LinkAdapter, LinkSession, LocalSession, ManualClock, SystemClock,
};
pub use phase::{AudioBurstState, PulsePhaseModel};
pub use scheduler::PulseScheduler;
pub use tempo::{InvalidResolution, Resolution, pulse_interval_samples, pulse_rate};
pub use timeline::{
    HostSnapshot, HostTimeline, ManualTimeline, SyncSource, TimelineSnapshot, TimelineSource,
};
pub use transport::{TransportEdge, TransportState, TransportTracker, song_position_from_ppq};
