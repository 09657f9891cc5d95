use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::synth::{CallbackId, ParameterField, PolySynth, SynthEvent, SynthEventType};
use crate::SEQUENCE_EXTENSION;

use super::quantize::QuantizeGrid;

/// Output encoding for a saved recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RecorderFormat {
    /// Builder-call source text, one `s.add<...>(...)` line per
    /// trigger-on. Output only; never re-parsed.
    CppFormat,
    /// `@ <start> <duration> <voiceType> <fields>` with trigger-on/off
    /// pairs matched by id; unmatched trigger-ons are dropped with a
    /// warning. Start times are quantized when quantization is on.
    SequencerEvent,
    /// Raw `+`/`-` trigger lines, unpaired and unquantized.
    SequencerTriggers,
}

/// Live capture buffer shared with the synth's observer callbacks.
///
/// Callbacks run in whatever context drives the synth, so they only
/// timestamp and append; all file work happens in `stop_record` on the
/// control thread.
#[derive(Default)]
struct CaptureState {
    recording: bool,
    origin: Option<Instant>,
    buffer: Vec<SynthEvent>,
}

impl CaptureState {
    fn timestamp(&mut self) -> f64 {
        match self.origin {
            Some(origin) => origin.elapsed().as_secs_f64(),
            None => {
                // start_on_event: the first event defines time zero
                self.origin = Some(Instant::now());
                0.0
            }
        }
    }
}

/// Captures live trigger events from a [`PolySynth`] and serializes them
/// to a `.synthSequence` file on stop.
pub struct SynthRecorder {
    format: RecorderFormat,
    directory: PathBuf,
    sequence_name: String,
    overwrite: bool,
    tempo: u32,
    note: u32,
    quantize: bool,
    last_sequence_name: Option<String>,
    state: Arc<Mutex<CaptureState>>,
    registrations: Vec<CallbackId>,
}

impl SynthRecorder {
    pub fn new() -> Self {
        Self {
            format: RecorderFormat::CppFormat,
            directory: PathBuf::from("."),
            sequence_name: String::new(),
            overwrite: true,
            tempo: 120,
            note: 8,
            quantize: false,
            last_sequence_name: None,
            state: Arc::new(Mutex::new(CaptureState::default())),
            registrations: Vec::new(),
        }
    }

    pub fn set_format(&mut self, format: RecorderFormat) {
        self.format = format;
    }

    pub fn format(&self) -> RecorderFormat {
        self.format
    }

    /// Directory sequence files are written into.
    pub fn set_directory(&mut self, dir: impl Into<PathBuf>) {
        self.directory = dir.into();
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().unwrap().recording
    }

    /// Number of events captured so far (for control-surface display).
    pub fn pending_events(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }

    /// Name the last recording was saved under, without extension.
    pub fn last_sequence_name(&self) -> Option<&str> {
        self.last_sequence_name.as_deref()
    }

    /// Subscribe to the synth's trigger observers so every live event is
    /// captured with a timestamp relative to record start.
    pub fn register_poly_synth(&mut self, synth: &mut PolySynth) {
        let state = self.state.clone();
        let on = synth.register_trigger_on_callback(move |id, name, fields| {
            let mut state = state.lock().unwrap();
            if !state.recording {
                return;
            }
            let time = state.timestamp();
            state
                .buffer
                .push(SynthEvent::trigger_on(time, id, name, fields.to_vec()));
        });
        let state = self.state.clone();
        let off = synth.register_trigger_off_callback(move |id| {
            let mut state = state.lock().unwrap();
            if !state.recording {
                return;
            }
            let time = state.timestamp();
            state.buffer.push(SynthEvent::trigger_off(time, id, ""));
        });
        self.registrations.push(on);
        self.registrations.push(off);
    }

    /// Remove this recorder's observers from `synth`.
    pub fn unregister_poly_synth(&mut self, synth: &mut PolySynth) {
        for id in self.registrations.drain(..) {
            synth.unregister_callback(id);
        }
    }

    /// Begin capturing under the given sequence name, clearing any prior
    /// unsaved buffer.
    ///
    /// `tempo` and `note` arrive as strings from control surfaces; a
    /// non-numeric value is an `InvalidArgument` error, never a silent
    /// default. With `start_on_event` the clock starts at the first
    /// captured event instead of at this call.
    pub fn start_record(
        &mut self,
        name: impl Into<String>,
        overwrite: bool,
        tempo: &str,
        quantize: bool,
        note: &str,
        start_on_event: bool,
    ) -> Result<(), RecordError> {
        let tempo: u32 = tempo.trim().parse().map_err(|_| {
            RecordError::InvalidArgument(format!("tempo '{}' is not a number", tempo))
        })?;
        let note: u32 = note.trim().parse().map_err(|_| {
            RecordError::InvalidArgument(format!("note '{}' is not a number", note))
        })?;

        self.sequence_name = name.into();
        self.overwrite = overwrite;
        self.tempo = tempo;
        self.note = note;
        self.quantize = quantize;

        let mut state = self.state.lock().unwrap();
        state.buffer.clear();
        state.recording = true;
        state.origin = if start_on_event {
            None
        } else {
            Some(Instant::now())
        };
        Ok(())
    }

    /// Append a pre-timestamped event to the capture buffer. Useful for
    /// programmatic capture; live capture goes through the registered
    /// observers. Ignored while not recording.
    pub fn push_event(&self, event: SynthEvent) {
        let mut state = self.state.lock().unwrap();
        if state.recording {
            state.buffer.push(event);
        } else {
            log::debug!("push_event while not recording; dropped");
        }
    }

    /// Stop capturing and serialize the buffer.
    ///
    /// Resolves the output filename (appending `_0`, `_1`, ... while the
    /// target exists when overwrite is off) and writes the configured
    /// format, borrowing a free voice per used type from `synth`'s pool
    /// to enumerate trigger parameter names for the `#` trailer.
    ///
    /// On I/O failure the capture buffer is kept so the save can be
    /// retried; it clears only after a successful write.
    pub fn stop_record(&mut self, synth: &mut PolySynth) -> Result<PathBuf, RecordError> {
        let events = {
            let mut state = self.state.lock().unwrap();
            state.recording = false;
            state.buffer.clone()
        };

        let mut stem = self.sequence_name.clone();
        let mut path = self
            .directory
            .join(format!("{}{}", stem, SEQUENCE_EXTENSION));
        if !self.overwrite {
            let mut counter = 0;
            while path.exists() {
                stem = format!("{}_{}", self.sequence_name, counter);
                counter += 1;
                path = self
                    .directory
                    .join(format!("{}{}", stem, SEQUENCE_EXTENSION));
            }
        }

        if let Err(source) = self.write_sequence(&path, &events, synth) {
            log::warn!("error writing sequence file {}: {}", path.display(), source);
            return Err(RecordError::Io { path, source });
        }

        self.state.lock().unwrap().buffer.clear();
        self.last_sequence_name = Some(stem);
        log::info!("recorded {}", path.display());
        Ok(path)
    }

    fn write_sequence(
        &self,
        path: &Path,
        events: &[SynthEvent],
        synth: &mut PolySynth,
    ) -> Result<(), std::io::Error> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);

        if self.quantize {
            writeln!(out, "t {}", self.tempo)?;
        }

        // Voice types in first-use order, for the trailer
        let mut used: Vec<&str> = Vec::new();
        for event in events {
            if event.event_type == SynthEventType::TriggerOn
                && !used.contains(&event.synth_name.as_str())
            {
                used.push(&event.synth_name);
            }
        }

        match self.format {
            RecorderFormat::CppFormat => {
                for event in events {
                    if event.event_type != SynthEventType::TriggerOn {
                        continue;
                    }
                    write!(out, "s.add<{}>({}).set(", event.synth_name, event.time)?;
                    for (i, field) in event.fields.iter().enumerate() {
                        if i > 0 {
                            write!(out, ", ")?;
                        }
                        write!(out, "{}", fmt_field(field))?;
                    }
                    writeln!(out, ");")?;
                }
            }
            RecorderFormat::SequencerEvent => {
                let grid = QuantizeGrid::new(self.tempo, self.note);
                let mut pending: HashMap<u64, &SynthEvent> = HashMap::new();
                for event in events {
                    match event.event_type {
                        SynthEventType::TriggerOn => {
                            pending.insert(event.id, event);
                        }
                        SynthEventType::TriggerOff => {
                            let Some(on) = pending.remove(&event.id) else {
                                continue;
                            };
                            let duration = event.time - on.time;
                            let start = if self.quantize {
                                grid.snap(on.time)
                            } else {
                                on.time
                            };
                            write!(out, "@ {} {} {}", start, duration, on.synth_name)?;
                            for field in &on.fields {
                                write!(out, " {}", fmt_field(field))?;
                            }
                            writeln!(out)?;
                        }
                    }
                }
                if !pending.is_empty() {
                    let mut ids: Vec<u64> = pending.keys().copied().collect();
                    ids.sort_unstable();
                    log::warn!(
                        "{} trigger-on event(s) without a matching trigger-off \
                         excluded from output (ids {:?})",
                        ids.len(),
                        ids
                    );
                }
            }
            RecorderFormat::SequencerTriggers => {
                for event in events {
                    match event.event_type {
                        SynthEventType::TriggerOn => {
                            write!(out, "+ {} {} {}", event.time, event.id, event.synth_name)?;
                            for field in &event.fields {
                                write!(out, " {}", fmt_field(field))?;
                            }
                            writeln!(out)?;
                        }
                        SynthEventType::TriggerOff => {
                            write!(out, "- {} {}", event.time, event.id)?;
                            for field in &event.fields {
                                write!(out, " {}", fmt_field(field))?;
                            }
                            writeln!(out)?;
                        }
                    }
                }
            }
        }

        // Parameter-name index: borrow a free voice of each used type
        // just long enough to ask for its schema
        for name in used {
            match synth.pool().get_voice(name) {
                Ok(voice) => {
                    write!(out, "# {}", name)?;
                    for param in voice.trigger_param_names() {
                        write!(out, " {}", param)?;
                    }
                    writeln!(out)?;
                    synth.pool().insert_free_voice(name, voice);
                }
                Err(e) => log::warn!("no parameter index for '{}': {}", name, e),
            }
        }

        out.flush()
    }
}

impl Default for SynthRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn fmt_field(field: &ParameterField) -> String {
    match field {
        ParameterField::Float(v) => v.to_string(),
        ParameterField::Str(s) => format!("\"{}\"", s),
    }
}

/// Errors from recorder control calls.
#[derive(Debug)]
pub enum RecordError {
    /// Non-numeric tempo or note input.
    InvalidArgument(String),
    /// Opening or writing the output file failed; the capture buffer is
    /// preserved for retry.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            RecordError::Io { path, source } => {
                write!(f, "writing {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordError::InvalidArgument(_) => None,
            RecordError::Io { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SynthVoice;
    use crate::voices::SineEnv;

    fn synth() -> PolySynth {
        let mut synth = PolySynth::new();
        synth.register_voice("SineEnv", || Box::new(SineEnv::new()) as Box<dyn SynthVoice>);
        synth
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn non_numeric_tempo_or_note_rejected() {
        let mut rec = SynthRecorder::new();
        assert!(matches!(
            rec.start_record("x", true, "fast", false, "8", false),
            Err(RecordError::InvalidArgument(_))
        ));
        assert!(matches!(
            rec.start_record("x", true, "120", false, "eighth", false),
            Err(RecordError::InvalidArgument(_))
        ));
        assert!(!rec.is_recording());

        rec.start_record("x", true, " 120 ", false, "8", false).unwrap();
        assert!(rec.is_recording());
    }

    #[test]
    fn sequencer_event_format_pairs_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = synth();
        let mut rec = SynthRecorder::new();
        rec.set_directory(dir.path());
        rec.set_format(RecorderFormat::SequencerEvent);

        rec.start_record("pairs", true, "120", false, "8", false).unwrap();
        rec.push_event(SynthEvent::trigger_on(
            0.5,
            1,
            "SineEnv",
            vec![440.0.into(), 0.5.into()],
        ));
        rec.push_event(SynthEvent::trigger_on(
            1.0,
            2,
            "SineEnv",
            vec![550.0.into(), 0.25.into()],
        ));
        rec.push_event(SynthEvent::trigger_off(1.5, 1, ""));
        rec.push_event(SynthEvent::trigger_off(2.0, 2, ""));
        let path = rec.stop_record(&mut synth).unwrap();

        let text = read(&path);
        assert_eq!(
            text,
            "@ 0.5 1 SineEnv 440 0.5\n@ 1 1 SineEnv 550 0.25\n# SineEnv frequency amplitude\n"
        );
        assert_eq!(rec.last_sequence_name(), Some("pairs"));
        assert_eq!(rec.pending_events(), 0);
    }

    #[test]
    fn unmatched_trigger_on_excluded_from_event_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = synth();
        let mut rec = SynthRecorder::new();
        rec.set_directory(dir.path());
        rec.set_format(RecorderFormat::SequencerEvent);

        rec.start_record("orphan", true, "120", false, "8", false).unwrap();
        rec.push_event(SynthEvent::trigger_on(0.0, 1, "SineEnv", vec![440.0.into()]));
        rec.push_event(SynthEvent::trigger_on(0.5, 2, "SineEnv", vec![550.0.into()]));
        rec.push_event(SynthEvent::trigger_off(1.0, 1, ""));
        let path = rec.stop_record(&mut synth).unwrap();

        let text = read(&path);
        assert!(text.contains("@ 0 1 SineEnv 440"));
        assert!(!text.contains("550"));
    }

    #[test]
    fn triggers_format_keeps_unpaired_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = synth();
        let mut rec = SynthRecorder::new();
        rec.set_directory(dir.path());
        rec.set_format(RecorderFormat::SequencerTriggers);

        rec.start_record("raw", true, "120", false, "8", false).unwrap();
        rec.push_event(SynthEvent::trigger_on(0.0, 7, "SineEnv", vec![440.0.into()]));
        rec.push_event(SynthEvent::trigger_on(0.5, 8, "SineEnv", vec![550.0.into()]));
        rec.push_event(SynthEvent::trigger_off(1.0, 7, ""));
        let path = rec.stop_record(&mut synth).unwrap();

        let text = read(&path);
        assert_eq!(
            text,
            "+ 0 7 SineEnv 440\n+ 0.5 8 SineEnv 550\n- 1 7\n# SineEnv frequency amplitude\n"
        );
    }

    #[test]
    fn cpp_format_renders_builder_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = synth();
        let mut rec = SynthRecorder::new();
        rec.set_directory(dir.path());
        rec.set_format(RecorderFormat::CppFormat);

        rec.start_record("code", true, "120", false, "8", false).unwrap();
        rec.push_event(SynthEvent::trigger_on(
            0.25,
            1,
            "SineEnv",
            vec![440.0.into(), "lead".into()],
        ));
        rec.push_event(SynthEvent::trigger_off(1.0, 1, ""));
        let path = rec.stop_record(&mut synth).unwrap();

        let text = read(&path);
        assert!(text.starts_with("s.add<SineEnv>(0.25).set(440, \"lead\");\n"));
    }

    #[test]
    fn overwrite_off_appends_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = synth();
        let mut rec = SynthRecorder::new();
        rec.set_directory(dir.path());
        rec.set_format(RecorderFormat::SequencerEvent);

        rec.start_record("take", false, "120", false, "8", false).unwrap();
        let first = rec.stop_record(&mut synth).unwrap();
        rec.start_record("take", false, "120", false, "8", false).unwrap();
        let second = rec.stop_record(&mut synth).unwrap();

        assert!(first.ends_with("take.synthSequence"));
        assert!(second.ends_with("take_0.synthSequence"));
        assert_eq!(rec.last_sequence_name(), Some("take_0"));
    }

    #[test]
    fn quantize_snaps_start_times_and_declares_tempo() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = synth();
        let mut rec = SynthRecorder::new();
        rec.set_directory(dir.path());
        rec.set_format(RecorderFormat::SequencerEvent);

        rec.start_record("tight", true, "120", true, "8", false).unwrap();
        rec.push_event(SynthEvent::trigger_on(0.24, 1, "SineEnv", vec![440.0.into()]));
        rec.push_event(SynthEvent::trigger_off(1.24, 1, ""));
        let path = rec.stop_record(&mut synth).unwrap();

        let text = read(&path);
        assert!(text.starts_with("t 120\n"));
        // start snapped to the 0.25 grid point, duration untouched
        assert!(text.contains("\n@ 0.25 "));
        assert!(text.contains("SineEnv 440"));
    }

    #[test]
    fn io_failure_keeps_buffer_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = synth();
        let mut rec = SynthRecorder::new();
        rec.set_format(RecorderFormat::SequencerEvent);
        rec.set_directory(dir.path().join("does/not/exist"));

        rec.start_record("keep", true, "120", false, "8", false).unwrap();
        rec.push_event(SynthEvent::trigger_on(0.0, 1, "SineEnv", vec![440.0.into()]));
        rec.push_event(SynthEvent::trigger_off(0.5, 1, ""));
        assert!(matches!(
            rec.stop_record(&mut synth),
            Err(RecordError::Io { .. })
        ));
        assert_eq!(rec.pending_events(), 2);

        // retry into a writable directory succeeds and drains the buffer
        rec.set_directory(dir.path());
        let path = rec.stop_record(&mut synth).unwrap();
        assert!(read(&path).contains("@ 0 0.5 SineEnv 440"));
        assert_eq!(rec.pending_events(), 0);
    }

    #[test]
    fn start_record_clears_previous_buffer() {
        let rec = {
            let mut rec = SynthRecorder::new();
            rec.start_record("a", true, "120", false, "8", false).unwrap();
            rec.push_event(SynthEvent::trigger_on(0.0, 1, "SineEnv", vec![]));
            assert_eq!(rec.pending_events(), 1);
            rec.start_record("b", true, "120", false, "8", false).unwrap();
            rec
        };
        assert_eq!(rec.pending_events(), 0);
    }

    #[test]
    fn live_capture_through_observers() {
        let dir = tempfile::tempdir().unwrap();
        let mut synth = synth();
        let mut rec = SynthRecorder::new();
        rec.set_directory(dir.path());
        rec.set_format(RecorderFormat::SequencerTriggers);
        rec.register_poly_synth(&mut synth);

        // start_on_event pins the first event to time zero
        rec.start_record("live", true, "120", false, "8", true).unwrap();
        let id = synth.trigger_on("SineEnv", &[440.0.into(), 0.5.into()]).unwrap();
        synth.trigger_off(id);
        let path = rec.stop_record(&mut synth).unwrap();

        let text = read(&path);
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            format!("+ 0 {} SineEnv 440 0.5", id)
        );
        assert!(lines.next().unwrap().starts_with("- "));

        // after unregistering, triggers are no longer captured
        rec.unregister_poly_synth(&mut synth);
        rec.start_record("silent", true, "120", false, "8", false).unwrap();
        synth.trigger_on("SineEnv", &[440.0.into(), 0.5.into()]).unwrap();
        assert_eq!(rec.pending_events(), 0);
    }
}
