// C-compatible FFI bindings for the native plugin shell.
//
// Safety requirements:
// - All pointers must be non-null unless documented otherwise
// - All handles must be created by this module and not fabricated
// - Engine functions are called from the audio thread only, control
//   functions from any single non-audio thread
// - Caller must call the corresponding _destroy function for each _create

use log::{debug, info, warn};

use crate::audio_buffer::AudioBuffer;
use crate::bridge::{ControlHandle, EngineHandle, EngineReadback, create_bridge};
use crate::engine::PulseEngine;
use crate::event::{LocateTarget, MAX_EVENT_BYTES, MidiEvent, MidiSink, MmcCommand};
use crate::params;
use crate::timeline::HostSnapshot;

// Default audio configuration
const DEFAULT_MAX_BLOCK: usize = 4096;
const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

// ═══════════════════════════════════════════════════════════════════════════
// Logger Initialization
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(feature = "ios")]
const LOG_SUBSYSTEM: &str = "com.pulse24sync.engine";

/// Initialize the oslog logger.
///
/// Call once at startup before any other FFI function. Output appears in
/// Console.app and Xcode's debug console.
#[cfg(feature = "ios")]
#[unsafe(no_mangle)]
pub extern "C" fn pulse24sync_init_logger() {
    use log::LevelFilter;
    use oslog::OsLogger;

    OsLogger::new(LOG_SUBSYSTEM)
        .level_filter(LevelFilter::Debug)
        .init()
        .ok();
}

// ═══════════════════════════════════════════════════════════════════════════
// Opaque Handle Types
// ═══════════════════════════════════════════════════════════════════════════

/// Opaque handle to the ControlHandle (UI/message-thread side).
pub struct P24Control {
    inner: ControlHandle,
}

/// Opaque handle to the EngineHandle (audio side).
pub struct P24Engine {
    inner: EngineHandle,
    /// Mono burst scratch, `max_block` frames
    scratch: Vec<f32>,
    max_block: usize,
    /// Events that did not fit the caller's array in the last block
    dropped_events: u32,
}

// ═══════════════════════════════════════════════════════════════════════════
// FFI Types
// ═══════════════════════════════════════════════════════════════════════════

/// Host playhead for one block. NaN in a float field means "not reported".
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct P24HostPosition {
    pub bpm: f64,
    pub position_seconds: f64,
    pub ppq_position: f64,
    pub is_playing: bool,
    pub is_recording: bool,
}

impl From<P24HostPosition> for HostSnapshot {
    fn from(p: P24HostPosition) -> Self {
        let reported = |v: f64| if v.is_nan() { None } else { Some(v) };
        HostSnapshot {
            bpm: reported(p.bpm),
            is_playing: p.is_playing,
            is_recording: p.is_recording,
            position_seconds: reported(p.position_seconds),
            ppq_position: reported(p.ppq_position),
        }
    }
}

/// One MIDI message at a sample offset within the processed block.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct P24MidiEvent {
    pub offset: u32,
    pub len: u8,
    pub data: [u8; MAX_EVENT_BYTES],
}

impl From<MidiEvent> for P24MidiEvent {
    fn from(event: MidiEvent) -> Self {
        let bytes = event.as_bytes();
        let mut data = [0u8; MAX_EVENT_BYTES];
        data[..bytes.len()].copy_from_slice(bytes);
        Self {
            offset: event.offset,
            len: bytes.len() as u8,
            data,
        }
    }
}

/// Engine state for UI displays.
#[repr(C)]
pub struct P24Readback {
    pub bpm: f64,
    pub pulse_interval: f64,
    pub pulse_count: u64,
    pub resync_count: u64,
    pub song_position: u16,
    /// 0 stopped, 1 playing, 2 paused, 3 recording
    pub transport_state: u8,
    pub link_enabled: bool,
    pub link_peers: u32,
}

impl From<EngineReadback> for P24Readback {
    fn from(r: EngineReadback) -> Self {
        Self {
            bpm: r.bpm,
            pulse_interval: r.pulse_interval,
            pulse_count: r.pulse_count,
            resync_count: r.resync_count,
            song_position: r.song_position,
            transport_state: r.transport_state as u8,
            link_enabled: r.link_enabled,
            link_peers: r.link_peers as u32,
        }
    }
}

/// Parameter metadata for host registration.
#[repr(C)]
pub struct P24ParamInfo {
    pub id: u32,
    pub min_value: f32,
    pub max_value: f32,
    pub default_value: f32,
    /// 0 = continuous
    pub step: f32,
}

/// Caller-owned event array. Overflow is counted, never reallocated.
struct EventSlice<'a> {
    out: &'a mut [P24MidiEvent],
    len: usize,
    /// Added to every offset when a host block is split into chunks
    base: u32,
    dropped: usize,
}

impl MidiSink for EventSlice<'_> {
    #[inline]
    fn push(&mut self, mut event: MidiEvent) {
        event.offset += self.base;
        match self.out.get_mut(self.len) {
            Some(slot) => {
                *slot = event.into();
                self.len += 1;
            }
            None => self.dropped += 1,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Creation / Destruction
// ═══════════════════════════════════════════════════════════════════════════

/// Create a control/engine handle pair.
///
/// Returns the control handle; the engine handle is written to `out_engine`.
/// `max_block` of 0 selects the default (4096). Longer host blocks are
/// processed in chunks.
///
/// # Safety
/// `out_engine` must be a valid pointer to store the engine handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_create(
    sample_rate: f64,
    max_block: u32,
    out_engine: *mut *mut P24Engine,
) -> *mut P24Control {
    if out_engine.is_null() {
        warn!("pulse24sync_create: null out_engine");
        return std::ptr::null_mut();
    }

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

    info!("engine created: {} Hz, max block {}", sample_rate, max_block);

    unsafe {
        *out_engine = Box::into_raw(Box::new(P24Engine {
            inner: engine,
            scratch: vec![0.0; max_block],
            max_block,
            dropped_events: 0,
        }));
    }

    Box::into_raw(Box::new(P24Control { inner: control }))
}

/// # Safety
/// `control` must be a valid pointer returned by `pulse24sync_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_control_destroy(control: *mut P24Control) {
    if !control.is_null() {
        debug!("control handle destroyed");
        unsafe { drop(Box::from_raw(control)) };
    }
}

/// # Safety
/// `engine` must be a valid pointer returned via `pulse24sync_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_engine_destroy(engine: *mut P24Engine) {
    if !engine.is_null() {
        debug!("engine handle destroyed");
        unsafe { drop(Box::from_raw(engine)) };
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Engine - Audio Thread
// ═══════════════════════════════════════════════════════════════════════════

/// Re-initialize for a sample rate. Not real-time safe (logs).
///
/// # Safety
/// `engine` must be a valid engine handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_engine_prepare(engine: *mut P24Engine, sample_rate: f64) {
    if engine.is_null() || !(sample_rate.is_finite() && sample_rate > 0.0) {
        return;
    }
    unsafe { (*engine).inner.prepare(sample_rate) };
}

/// Push the host playhead for the next `pulse24sync_engine_process`.
///
/// # Safety
/// `engine` and `position` must be valid pointers.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_engine_set_host_position(
    engine: *mut P24Engine,
    position: *const P24HostPosition,
) {
    if engine.is_null() || position.is_null() {
        return;
    }
    unsafe {
        let position = std::ptr::read(position);
        (*engine).inner.set_host_snapshot(position.into());
    }
}

/// Process one host block.
///
/// - `sample_rate`: current host rate; a change is followed without losing phase
/// - `channels`: `num_channels` pointers to `frames` floats each; burst
///   audio is added into every channel. May be NULL for MIDI-only use.
/// - `events`: caller array of `capacity` events, filled in offset order
///
/// Returns the number of events written.
///
/// # Safety
/// - Must be called from the audio thread
/// - All buffers must be valid for the given sizes
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_engine_process(
    engine: *mut P24Engine,
    sample_rate: f64,
    frames: u32,
    channels: *const *mut f32,
    num_channels: u32,
    events: *mut P24MidiEvent,
    capacity: u32,
) -> u32 {
    if engine.is_null() {
        return 0;
    }
    let wrapper = unsafe { &mut *engine };
    wrapper.inner.set_sample_rate(sample_rate);

    let out: &mut [P24MidiEvent] = if events.is_null() {
        &mut []
    } else {
        unsafe { std::slice::from_raw_parts_mut(events, capacity as usize) }
    };
    let mut sink = EventSlice {
        out,
        len: 0,
        base: 0,
        dropped: 0,
    };

    let total_frames = frames as usize;
    let has_audio = !channels.is_null() && num_channels > 0;

    // Process in chunks of max_block size
    let mut offset = 0;
    while offset < total_frames {
        let chunk_frames = (total_frames - offset).min(wrapper.max_block);
        sink.base = offset as u32;

        if has_audio {
            let scratch = &mut wrapper.scratch[..chunk_frames];
            scratch.fill(0.0);
            let mut mono = AudioBuffer::planar(scratch, 1);
            wrapper.inner.process(chunk_frames, &mut sink, Some(&mut mono));

            for ch in 0..num_channels as usize {
                let ptr = unsafe { *channels.add(ch) };
                if ptr.is_null() {
                    continue;
                }
                let out = unsafe { std::slice::from_raw_parts_mut(ptr.add(offset), chunk_frames) };
                for (o, s) in out.iter_mut().zip(wrapper.scratch[..chunk_frames].iter()) {
                    *o += *s;
                }
            }
        } else {
            wrapper.inner.process(chunk_frames, &mut sink, None);
        }

        offset += chunk_frames;
    }

    wrapper.dropped_events = sink.dropped as u32;
    sink.len as u32
}

/// Events lost to a full array in the last `pulse24sync_engine_process`.
///
/// # Safety
/// `engine` must be a valid engine handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_engine_dropped_events(engine: *const P24Engine) -> u32 {
    if engine.is_null() {
        return 0;
    }
    unsafe { (*engine).dropped_events }
}

// ═══════════════════════════════════════════════════════════════════════════
// Control - Parameters
// ═══════════════════════════════════════════════════════════════════════════

#[unsafe(no_mangle)]
pub extern "C" fn pulse24sync_param_count() -> u32 {
    params::all_params().len() as u32
}

/// # Safety
/// `out` must be a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_param_info(id: u32, out: *mut P24ParamInfo) -> bool {
    if out.is_null() {
        return false;
    }
    match params::param_info(id) {
        Ok(info) => {
            unsafe {
                *out = P24ParamInfo {
                    id: info.id,
                    min_value: info.min,
                    max_value: info.max,
                    default_value: info.default,
                    step: info.step,
                };
            }
            true
        }
        Err(_) => false,
    }
}

/// Set a parameter by id (plain value). Returns `false` on unknown id or
/// non-finite value.
///
/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_set_param(control: *mut P24Control, id: u32, value: f32) -> bool {
    if control.is_null() {
        return false;
    }
    match unsafe { (*control).inner.set_param(id, value) } {
        Ok(_) => true,
        Err(e) => {
            warn!("set_param: {}", e);
            false
        }
    }
}

/// Read a parameter's plain value. NaN for unknown ids.
///
/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_get_param(control: *const P24Control, id: u32) -> f32 {
    if control.is_null() {
        return f32::NAN;
    }
    unsafe { (*control).inner.param(id).unwrap_or(f32::NAN) }
}

// ═══════════════════════════════════════════════════════════════════════════
// Control - Requests & Messages
// ═══════════════════════════════════════════════════════════════════════════

/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_reset(control: *mut P24Control) {
    if !control.is_null() {
        unsafe { (*control).inner.reset() };
    }
}

/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_force_reset(control: *mut P24Control) {
    if !control.is_null() {
        unsafe { (*control).inner.force_reset() };
    }
}

/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_request_resync(control: *mut P24Control) {
    if !control.is_null() {
        unsafe { (*control).inner.request_resync() };
    }
}

/// Queue an MMC command by its command byte. Returns `false` for
/// unknown commands.
///
/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_send_mmc(control: *mut P24Control, command: u8) -> bool {
    if control.is_null() {
        return false;
    }
    match MmcCommand::from_byte(command) {
        Some(cmd) => {
            unsafe { (*control).inner.send_mmc(cmd) };
            true
        }
        None => {
            warn!("unknown MMC command {:#04x}", command);
            false
        }
    }
}

/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_send_song_position(control: *mut P24Control, midi_beats: u32) {
    if !control.is_null() {
        unsafe { (*control).inner.send_song_position(midi_beats) };
    }
}

/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_send_locate(
    control: *mut P24Control,
    hours: u8,
    minutes: u8,
    seconds: u8,
    frames: u8,
    sub_frames: u8,
) {
    if control.is_null() {
        return;
    }
    let target = LocateTarget {
        hours,
        minutes,
        seconds,
        frames,
        sub_frames,
    };
    unsafe { (*control).inner.send_locate(target) };
}

// ═══════════════════════════════════════════════════════════════════════════
// Control - Link
// ═══════════════════════════════════════════════════════════════════════════

/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_set_link_enabled(control: *mut P24Control, enabled: bool) {
    if !control.is_null() {
        unsafe { (*control).inner.set_link_enabled(enabled) };
    }
}

/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_set_link_tempo(control: *mut P24Control, bpm: f64) {
    if !control.is_null() {
        unsafe { (*control).inner.set_link_tempo(bpm) };
    }
}

/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_set_link_playing(control: *mut P24Control, playing: bool) {
    if !control.is_null() {
        unsafe { (*control).inner.set_link_playing(playing) };
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Control - Readback
// ═══════════════════════════════════════════════════════════════════════════

/// # Safety
/// `control` must be a valid control handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn pulse24sync_readback(control: *const P24Control) -> P24Readback {
    if control.is_null() {
        return P24Readback {
            bpm: crate::tempo::DEFAULT_BPM,
            pulse_interval: 0.0,
            pulse_count: 0,
            resync_count: 0,
            song_position: 0,
            transport_state: 0,
            link_enabled: false,
            link_peers: 0,
        };
    }
    unsafe { (*control).inner.readback().into() }
}
