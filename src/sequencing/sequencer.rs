use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::synth::{PolySynth, SynthEvent, SynthEventType};
use crate::SEQUENCE_EXTENSION;

use super::parse::{parse_sequence, ParsedSequence, SequenceIoError};

/// Handle for unsubscribing a sequencer observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

type TimeChangeCallback = Box<dyn FnMut(f64) + Send>;
type BeginCallback = Box<dyn FnMut(&str) + Send>;

/// Default minimum musical-time gap between time-change notifications.
const NOTIFY_INTERVAL: f64 = 0.05;

/// Replays sequence files against a [`PolySynth`].
///
/// Events load from `.synthSequence` files into a time-ordered pending
/// queue; every `tick` advances the playback clock and dispatches events
/// whose start time has passed. The sequencer never owns the synth — the
/// caller passes it into `tick` so voice state keeps a single writer.
///
/// Multiple event streams can be interleaved through `play_events`;
/// equal start times keep their relative order (queued events before
/// newly merged ones).
pub struct SynthSequencer {
    directory: PathBuf,
    time: f64,
    rate: f64,
    playing: bool,
    finished: bool,
    loaded: Vec<SynthEvent>,
    queue: VecDeque<SynthEvent>,
    /// File correlation id -> live voice id for pending trigger-offs.
    id_map: HashMap<u64, u64>,
    current: Option<String>,
    notify_interval: f64,
    last_notified: f64,
    next_observer: u64,
    time_change: Vec<(ObserverId, TimeChangeCallback)>,
    begin: Vec<(ObserverId, BeginCallback)>,
}

impl SynthSequencer {
    pub fn new() -> Self {
        Self {
            directory: PathBuf::from("."),
            time: 0.0,
            rate: 1.0,
            playing: false,
            finished: false,
            loaded: Vec::new(),
            queue: VecDeque::new(),
            id_map: HashMap::new(),
            current: None,
            notify_interval: NOTIFY_INTERVAL,
            last_notified: 0.0,
            next_observer: 0,
            time_change: Vec::new(),
            begin: Vec::new(),
        }
    }

    /// Directory searched for sequence files.
    pub fn set_directory(&mut self, dir: impl Into<PathBuf>) {
        self.directory = dir.into();
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn sequence_path(&self, name: &str) -> PathBuf {
        self.directory
            .join(format!("{}{}", name, SEQUENCE_EXTENSION))
    }

    fn read_file(
        &self,
        name: &str,
        start_time: f64,
        tempo_override: Option<f64>,
    ) -> Result<ParsedSequence, SequenceIoError> {
        let path = self.sequence_path(name);
        let file = File::open(&path).map_err(|source| SequenceIoError {
            path: path.clone(),
            source,
        })?;
        parse_sequence(BufReader::new(file), start_time, tempo_override)
            .map_err(|source| SequenceIoError { path, source })
    }

    /// Parse a sequence file into the loaded event list, every event
    /// offset by `start_time`. Replaces any previously loaded sequence.
    pub fn load_sequence(
        &mut self,
        name: &str,
        start_time: f64,
    ) -> Result<&[SynthEvent], SequenceIoError> {
        self.load_sequence_with_tempo(name, start_time, None)
    }

    /// As `load_sequence`, additionally rescaling event times after the
    /// file's `t` declaration by `declared / override_bpm`.
    pub fn load_sequence_with_tempo(
        &mut self,
        name: &str,
        start_time: f64,
        override_bpm: Option<f64>,
    ) -> Result<&[SynthEvent], SequenceIoError> {
        let parsed = self.read_file(name, start_time, override_bpm)?;
        self.loaded = parsed.events;
        self.current = Some(name.to_owned());
        Ok(&self.loaded)
    }

    /// Load `name` and start playing it from the top at the given rate.
    pub fn play_sequence(
        &mut self,
        name: &str,
        rate: f64,
        start_offset: f64,
    ) -> Result<(), SequenceIoError> {
        self.load_sequence(name, start_offset)?;
        self.queue = self.loaded.iter().cloned().collect();
        self.id_map.clear();
        self.time = 0.0;
        self.last_notified = 0.0;
        self.rate = if rate > 0.0 { rate } else { 1.0 };
        self.playing = true;
        self.finished = false;
        let name = name.to_owned();
        for (_, cb) in &mut self.begin {
            cb(&name);
        }
        Ok(())
    }

    /// Merge an event list into the pending queue and start (or keep)
    /// playing. The merge is a stable sort on start time, so equal-time
    /// events keep their order: already queued first, then `events` in
    /// the order given.
    pub fn play_events(&mut self, events: Vec<SynthEvent>) {
        let mut merged: Vec<SynthEvent> = self.queue.drain(..).collect();
        merged.extend(events);
        merged.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
        self.queue = merged.into();
        self.playing = true;
        self.finished = false;
    }

    /// Halt playback. With `clear` the pending queue is emptied and all
    /// sounding voices are silenced (stop); without it the queue and
    /// voices are left alone so playback can resume (pause).
    pub fn stop_sequence(&mut self, clear: bool, synth: &mut PolySynth) {
        self.playing = false;
        if clear {
            self.queue.clear();
            self.id_map.clear();
            synth.all_notes_off();
        }
    }

    /// Seek to `t` seconds. Re-queues loaded events at or after `t` and
    /// notifies time-change observers immediately.
    ///
    /// Sounding voices are silenced: the seek drops any pending
    /// trigger-offs, so leaving them running would orphan them.
    pub fn set_time(&mut self, t: f64, synth: &mut PolySynth) {
        synth.all_notes_off();
        self.time = t;
        self.queue = self.loaded.iter().filter(|e| e.time >= t).cloned().collect();
        self.id_map.clear();
        self.finished = self.queue.is_empty();
        self.last_notified = t;
        for (_, cb) in &mut self.time_change {
            cb(t);
        }
    }

    /// Advance the playback clock and dispatch due events into `synth`.
    ///
    /// Dispatch failures (unknown voice type, bad fields) are logged and
    /// skipped; nothing propagates into the realtime caller.
    pub fn tick(&mut self, dt: f64, synth: &mut PolySynth) {
        if !self.playing {
            return;
        }
        self.time += dt * self.rate;

        while self.queue.front().is_some_and(|e| e.time <= self.time) {
            if let Some(event) = self.queue.pop_front() {
                self.dispatch(event, synth);
            }
        }

        if self.queue.is_empty() && !self.finished {
            self.finished = true;
        }

        // Observers see the clock at a bounded rate, not every tick.
        if (self.time - self.last_notified).abs() >= self.notify_interval {
            self.last_notified = self.time;
            let t = self.time;
            for (_, cb) in &mut self.time_change {
                cb(t);
            }
        }
    }

    fn dispatch(&mut self, event: SynthEvent, synth: &mut PolySynth) {
        match event.event_type {
            SynthEventType::TriggerOn => match synth.trigger_on(&event.synth_name, &event.fields) {
                Ok(live_id) => {
                    self.id_map.insert(event.id, live_id);
                }
                Err(e) => log::warn!("sequencer dropped trigger-on: {}", e),
            },
            SynthEventType::TriggerOff => match self.id_map.remove(&event.id) {
                Some(live_id) => synth.trigger_off(live_id),
                None => log::debug!("trigger-off for unknown event id {}", event.id),
            },
        }
    }

    /// Scan a sequence file and return its total duration (end of the
    /// last event) without touching playback state.
    pub fn get_sequence_duration(&self, name: &str) -> Result<f64, SequenceIoError> {
        Ok(self.read_file(name, 0.0, None)?.duration())
    }

    /// Names (stems) of every sequence file in the directory, sorted.
    pub fn sequence_list(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.directory) else {
            return names;
        };
        for entry in entries.flatten() {
            if let Some(file_name) = entry.file_name().to_str() {
                if let Some(stem) = file_name.strip_suffix(SEQUENCE_EXTENSION) {
                    names.push(stem.to_owned());
                }
            }
        }
        names.sort_unstable();
        names
    }

    pub fn running(&self) -> bool {
        self.playing
    }

    pub fn playback_finished(&self) -> bool {
        self.finished
    }

    pub fn current_sequence(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Minimum musical-time gap between time-change notifications.
    pub fn set_notify_interval(&mut self, seconds: f64) {
        self.notify_interval = seconds.max(0.0);
    }

    pub fn register_time_change_callback(
        &mut self,
        cb: impl FnMut(f64) + Send + 'static,
    ) -> ObserverId {
        let id = self.alloc_observer();
        self.time_change.push((id, Box::new(cb)));
        id
    }

    /// Observe the start of a named sequence from `play_sequence`.
    pub fn register_begin_callback(
        &mut self,
        cb: impl FnMut(&str) + Send + 'static,
    ) -> ObserverId {
        let id = self.alloc_observer();
        self.begin.push((id, Box::new(cb)));
        id
    }

    pub fn unregister_observer(&mut self, id: ObserverId) {
        self.time_change.retain(|(oid, _)| *oid != id);
        self.begin.retain(|(oid, _)| *oid != id);
    }

    fn alloc_observer(&mut self) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        id
    }
}

impl Default for SynthSequencer {
    fn default() -> Self {
        Self::new()
    }
}
