//! Scripted engine backend.
//!
//! Plays an authored timeline on a real playback thread, delivering beat
//! and marker callbacks the way an external engine would: from a thread
//! the host does not control, with an opaque user-data token attached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bl_timeline::{marker_name, EventMask, MarkerName, TimelineEvent};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::traits::{
    AudioEngine, EngineError, EventInstance, RawHandle, StopMode, TimelineCallback,
    RAW_HANDLE_NONE,
};

/// Fade window honored by `StopMode::AllowFadeout`.
const FADEOUT_MS: u64 = 120;
/// Playback thread wakeup interval.
const CLOCK_STEP: Duration = Duration::from_millis(2);
/// Command ring capacity (a burst of parameter changes).
const COMMAND_CAPACITY: usize = 64;

const STOP_NONE: u8 = 0;
const STOP_FADEOUT: u8 = 1;
const STOP_IMMEDIATE: u8 = 2;

/// An authored timeline: a tempo map plus named markers.
#[derive(Clone, Debug)]
pub struct TimelineScript {
    length_ms: u32,
    beats_per_bar: u32,
    /// (at_ms, bpm), sorted, always starting at 0
    tempo_changes: Vec<(u32, f32)>,
    /// (at_ms, name), sorted
    markers: Vec<(u32, MarkerName)>,
}

impl TimelineScript {
    /// New script at `bpm`, 4 beats per bar, zero length.
    pub fn new(bpm: f32) -> Self {
        Self {
            length_ms: 0,
            beats_per_bar: 4,
            tempo_changes: vec![(0, bpm.max(1.0))],
            markers: Vec::new(),
        }
    }

    /// Set the timeline length in milliseconds.
    pub fn length_ms(mut self, ms: u32) -> Self {
        self.length_ms = ms;
        self
    }

    /// Set the number of beats per bar (time signature upper).
    pub fn beats_per_bar(mut self, beats: u32) -> Self {
        self.beats_per_bar = beats.max(1);
        self
    }

    /// Add a tempo change. Degenerate tempos clamp to 1 BPM.
    pub fn tempo_change(mut self, at_ms: u32, bpm: f32) -> Self {
        let pos = self
            .tempo_changes
            .binary_search_by(|(ms, _)| ms.cmp(&at_ms))
            .unwrap_or_else(|pos| pos);
        self.tempo_changes.insert(pos, (at_ms, bpm.max(1.0)));
        self
    }

    /// Add a named marker.
    pub fn marker(mut self, at_ms: u32, name: &str) -> Self {
        let pos = self
            .markers
            .binary_search_by(|(ms, _)| ms.cmp(&at_ms))
            .unwrap_or_else(|pos| pos);
        self.markers.insert(pos, (at_ms, marker_name(name)));
        self
    }

    /// Tempo in effect at `ms`.
    fn tempo_at(&self, ms: u32) -> f32 {
        self.tempo_changes
            .iter()
            .take_while(|(at, _)| *at <= ms)
            .last()
            .map(|(_, bpm)| *bpm)
            .unwrap_or(1.0)
    }
}

/// Walks a script's beat grid and marker list in timeline order.
///
/// The beat interval is re-derived at every beat boundary, so tempo
/// changes take effect from the next beat on.
struct ScriptCursor<'a> {
    script: &'a TimelineScript,
    next_beat_ms: f64,
    beat_count: u32,
    marker_idx: usize,
}

impl<'a> ScriptCursor<'a> {
    fn new(script: &'a TimelineScript) -> Self {
        Self {
            script,
            next_beat_ms: 0.0,
            beat_count: 0,
            marker_idx: 0,
        }
    }

    /// Next event due at or before `now_ms`. Beats win ties with markers.
    fn next_due(&mut self, now_ms: f64) -> Option<TimelineEvent> {
        let marker_ms = self
            .script
            .markers
            .get(self.marker_idx)
            .map(|(ms, _)| f64::from(*ms))
            .unwrap_or(f64::INFINITY);

        if self.next_beat_ms <= now_ms && self.next_beat_ms <= marker_ms {
            let position_ms = self.next_beat_ms as u32;
            let tempo = self.script.tempo_at(position_ms);
            let beats_per_bar = self.script.beats_per_bar;
            let event = TimelineEvent::Beat {
                bar: self.beat_count / beats_per_bar + 1,
                beat: self.beat_count % beats_per_bar + 1,
                position_ms,
                tempo,
                time_signature: (beats_per_bar.min(255) as u8, 4),
            };
            self.beat_count += 1;
            self.next_beat_ms += 60_000.0 / f64::from(tempo);
            Some(event)
        } else if marker_ms <= now_ms {
            let (ms, name) = self.script.markers[self.marker_idx];
            self.marker_idx += 1;
            Some(TimelineEvent::Marker {
                name,
                position_ms: ms,
            })
        } else {
            None
        }
    }
}

/// Engine that plays registered [`TimelineScript`]s.
pub struct ScriptedEngine {
    scripts: Mutex<HashMap<String, TimelineScript>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
        }
    }

    /// Register `script` under an event-ref path.
    pub fn register(&self, event_ref: &str, script: TimelineScript) {
        self.scripts.lock().insert(event_ref.to_string(), script);
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine for ScriptedEngine {
    fn create_instance(&self, event_ref: &str) -> Result<Box<dyn EventInstance>, EngineError> {
        let script = self
            .scripts
            .lock()
            .get(event_ref)
            .cloned()
            .ok_or_else(|| {
                EngineError::InstanceCreate(format!("unknown event ref: {}", event_ref))
            })?;
        Ok(Box::new(ScriptedInstance::new(script)))
    }
}

enum Command {
    SetParameter(String, f32),
}

/// State shared between the control side and the playback thread.
struct InstanceShared {
    position_ms: AtomicU32,
    user_data: AtomicU64,
    /// Held across every callback invocation, so taking it is a true
    /// detach barrier.
    callback: Mutex<Option<(TimelineCallback, EventMask)>>,
    parameters: Mutex<HashMap<String, f32>>,
    stop_request: AtomicU8,
    finished: AtomicBool,
}

/// One playable occurrence of a scripted timeline.
pub struct ScriptedInstance {
    script: TimelineScript,
    shared: Arc<InstanceShared>,
    commands: HeapProd<Command>,
    command_rx: Option<HeapCons<Command>>,
    thread: Option<JoinHandle<()>>,
    released: bool,
}

impl ScriptedInstance {
    pub fn new(script: TimelineScript) -> Self {
        let (commands, command_rx) = HeapRb::<Command>::new(COMMAND_CAPACITY).split();
        Self {
            script,
            shared: Arc::new(InstanceShared {
                position_ms: AtomicU32::new(0),
                user_data: AtomicU64::new(RAW_HANDLE_NONE),
                callback: Mutex::new(None),
                parameters: Mutex::new(HashMap::new()),
                stop_request: AtomicU8::new(STOP_NONE),
                finished: AtomicBool::new(false),
            }),
            commands,
            command_rx: Some(command_rx),
            thread: None,
            released: false,
        }
    }

    /// Has the playback thread delivered its `Stopped` event?
    pub fn finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Last applied value of a parameter, if any.
    pub fn parameter_by_name(&self, name: &str) -> Option<f32> {
        self.shared.parameters.lock().get(name).copied()
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl EventInstance for ScriptedInstance {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.released {
            return Err(EngineError::Released);
        }
        // Restart is not supported; re-create the instance instead.
        let Some(commands) = self.command_rx.take() else {
            return Ok(());
        };
        let script = self.script.clone();
        let shared = Arc::clone(&self.shared);
        self.thread = Some(std::thread::spawn(move || {
            playback_thread(script, shared, commands);
        }));
        Ok(())
    }

    fn stop(&mut self, mode: StopMode) -> Result<(), EngineError> {
        if self.released {
            return Err(EngineError::Released);
        }
        let request = match mode {
            StopMode::AllowFadeout => STOP_FADEOUT,
            StopMode::Immediate => STOP_IMMEDIATE,
        };
        self.shared.stop_request.fetch_max(request, Ordering::AcqRel);
        // Joining is what makes this a barrier: once stop returns, the
        // playback thread is gone and no callback can fire.
        self.join_thread();
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.shared
            .stop_request
            .fetch_max(STOP_IMMEDIATE, Ordering::AcqRel);
        self.join_thread();
        self.shared.callback.lock().take();
        self.released = true;
    }

    fn set_parameter_by_name(&mut self, name: &str, value: f32) -> Result<(), EngineError> {
        if self.released {
            return Err(EngineError::Released);
        }
        self.commands
            .try_push(Command::SetParameter(name.to_string(), value))
            .map_err(|_| EngineError::CommandQueue)
    }

    fn timeline_position(&self) -> Result<u32, EngineError> {
        if self.released {
            return Err(EngineError::Released);
        }
        Ok(self.shared.position_ms.load(Ordering::Acquire))
    }

    fn set_callback(
        &mut self,
        callback: TimelineCallback,
        mask: EventMask,
    ) -> Result<(), EngineError> {
        if self.released {
            return Err(EngineError::Released);
        }
        *self.shared.callback.lock() = Some((callback, mask));
        Ok(())
    }

    fn clear_callback(&mut self) -> Result<(), EngineError> {
        if self.released {
            return Err(EngineError::Released);
        }
        self.shared.callback.lock().take();
        Ok(())
    }

    fn set_user_data(&mut self, data: RawHandle) -> Result<(), EngineError> {
        if self.released {
            return Err(EngineError::Released);
        }
        self.shared.user_data.store(data, Ordering::Release);
        Ok(())
    }

    fn user_data(&self) -> Result<RawHandle, EngineError> {
        if self.released {
            return Err(EngineError::Released);
        }
        Ok(self.shared.user_data.load(Ordering::Acquire))
    }
}

impl Drop for ScriptedInstance {
    fn drop(&mut self) {
        self.release();
    }
}

fn playback_thread(
    script: TimelineScript,
    shared: Arc<InstanceShared>,
    mut commands: HeapCons<Command>,
) {
    let started_at = Instant::now();
    let mut fade_deadline: Option<Instant> = None;
    let mut cursor = ScriptCursor::new(&script);

    deliver(&shared, &TimelineEvent::Started);

    loop {
        while let Some(command) = commands.try_pop() {
            match command {
                Command::SetParameter(name, value) => {
                    shared.parameters.lock().insert(name, value);
                }
            }
        }

        match shared.stop_request.load(Ordering::Acquire) {
            STOP_IMMEDIATE => {
                finish(&shared);
                return;
            }
            STOP_FADEOUT => {
                if fade_deadline.is_none() {
                    fade_deadline = Some(Instant::now() + Duration::from_millis(FADEOUT_MS));
                }
            }
            _ => {}
        }
        if let Some(deadline) = fade_deadline {
            if Instant::now() >= deadline {
                finish(&shared);
                return;
            }
        }

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        let now_ms = elapsed_ms.min(f64::from(script.length_ms));

        while let Some(event) = cursor.next_due(now_ms) {
            deliver(&shared, &event);
        }

        shared.position_ms.store(now_ms as u32, Ordering::Release);

        if elapsed_ms >= f64::from(script.length_ms) && fade_deadline.is_none() {
            finish(&shared);
            return;
        }

        std::thread::sleep(CLOCK_STEP);
    }
}

/// Invoke the registered callback for `event`, if its mask matches.
/// The callback lock is held across the invocation.
fn deliver(shared: &InstanceShared, event: &TimelineEvent) {
    let guard = shared.callback.lock();
    if let Some((callback, mask)) = guard.as_ref() {
        if mask.contains(event.kind()) {
            let user_data = shared.user_data.load(Ordering::Acquire);
            if let Err(err) = callback(event, user_data) {
                log::error!("timeline callback failed: {}", err);
            }
        }
    }
}

fn finish(shared: &InstanceShared) {
    deliver(shared, &TimelineEvent::Stopped);
    shared.finished.store(true, Ordering::Release);
}
