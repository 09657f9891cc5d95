use super::{
    field::{FieldError, ParameterField},
    message::{CommandReceiver, SynthCommand},
    pool::{UnknownVoiceType, VoiceFactory, VoicePool},
    voice::{SynthVoice, VoiceState},
};

/// Handle returned from observer registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

type TriggerOnCallback = Box<dyn FnMut(u64, &str, &[ParameterField]) + Send>;
type TriggerOffCallback = Box<dyn FnMut(u64) + Send>;
type FreeCallback = Box<dyn FnMut(u64, &str) + Send>;

struct ActiveVoice {
    id: u64,
    type_name: String,
    state: VoiceState,
    voice: Box<dyn SynthVoice>,
}

/// The active-voice scheduler.
///
/// Owns a [`VoicePool`] and the list of currently sounding voices, and
/// moves voices through their lifecycle:
///
/// ```text
/// Free --trigger_on--> Active --trigger_off--> Releasing --done--> Free
/// ```
///
/// `tick`, `trigger_on` and `trigger_off` are realtime-safe for already
/// pooled voices (no locks, no I/O); allocation happens only when a
/// type's free list is empty. Observer callbacks run synchronously in the
/// calling context, in registration order, and must not block.
///
/// Voice state is single-writer: every mutating call must come from the
/// one context that drives `tick`. Other threads talk to that context
/// through a [`SynthCommand`] channel drained at the top of each tick.
pub struct PolySynth {
    pool: VoicePool,
    active: Vec<ActiveVoice>,
    next_id: u64,
    next_callback_id: u64,
    on_trigger_on: Vec<(CallbackId, TriggerOnCallback)>,
    on_trigger_off: Vec<(CallbackId, TriggerOffCallback)>,
    on_free: Vec<(CallbackId, FreeCallback)>,
    commands: Option<Box<dyn CommandReceiver>>,
    temp_buffer: Vec<f32>,
}

impl PolySynth {
    pub fn new() -> Self {
        Self {
            pool: VoicePool::new(),
            active: Vec::new(),
            next_id: 0,
            next_callback_id: 0,
            on_trigger_on: Vec::new(),
            on_trigger_off: Vec::new(),
            on_free: Vec::new(),
            commands: None,
            temp_buffer: vec![0.0; crate::MAX_BLOCK_SIZE],
        }
    }

    /// Attach a command receiver drained at the top of every `tick`.
    pub fn with_commands(mut self, rx: impl CommandReceiver + 'static) -> Self {
        self.commands = Some(Box::new(rx));
        self
    }

    /// Register a voice type with the underlying pool.
    pub fn register_voice(
        &mut self,
        name: impl Into<String>,
        factory: impl VoiceFactory + 'static,
    ) {
        self.pool.register(name, factory);
    }

    pub fn pool(&mut self) -> &mut VoicePool {
        &mut self.pool
    }

    /// Start a voice of the given type with a freshly assigned id.
    pub fn trigger_on(
        &mut self,
        synth_name: &str,
        fields: &[ParameterField],
    ) -> Result<u64, SynthError> {
        let id = self.next_id;
        self.next_id += 1;
        self.trigger_on_with_id(synth_name, id, fields)?;
        Ok(id)
    }

    /// Start a voice under a caller-chosen correlation id. The id must
    /// not collide with a currently active voice.
    pub fn trigger_on_with_id(
        &mut self,
        synth_name: &str,
        id: u64,
        fields: &[ParameterField],
    ) -> Result<(), SynthError> {
        if self.active.iter().any(|v| v.id == id) {
            return Err(SynthError::IdInUse(id));
        }
        let mut voice = self.pool.get_voice(synth_name)?;
        if let Err(e) = voice.set_trigger_fields(fields) {
            self.pool.insert_free_voice(synth_name, voice);
            return Err(SynthError::BadField(e));
        }
        voice.on_trigger_on();
        self.active.push(ActiveVoice {
            id,
            type_name: synth_name.to_owned(),
            state: VoiceState::Active,
            voice,
        });
        self.next_id = self.next_id.max(id + 1);
        for (_, cb) in &mut self.on_trigger_on {
            cb(id, synth_name, fields);
        }
        Ok(())
    }

    /// Begin the release phase of the voice with the given id.
    ///
    /// The voice stays in the active list until its done condition is
    /// met; a missing or already released id is a logged no-op so the
    /// realtime caller never sees an error.
    pub fn trigger_off(&mut self, id: u64) {
        let Some(entry) = self
            .active
            .iter_mut()
            .find(|v| v.id == id && v.state == VoiceState::Active)
        else {
            log::debug!("trigger_off: no active voice with id {}", id);
            return;
        };
        entry.voice.on_trigger_off();
        entry.state = VoiceState::Releasing;
        for (_, cb) in &mut self.on_trigger_off {
            cb(id);
        }
    }

    /// Advance all active voices by `dt` seconds.
    ///
    /// Drains pending commands first, then ticks each voice and recycles
    /// any whose done condition has become true.
    pub fn tick(&mut self, dt: f64) {
        self.drain_commands();

        for entry in &mut self.active {
            entry.voice.tick(dt);
        }

        self.reap_done();
    }

    fn reap_done(&mut self) {
        let mut i = 0;
        while i < self.active.len() {
            if self.active[i].voice.is_done() {
                let entry = self.active.remove(i);
                for (_, cb) in &mut self.on_free {
                    cb(entry.id, &entry.type_name);
                }
                self.pool.insert_free_voice(&entry.type_name, entry.voice);
            } else {
                i += 1;
            }
        }
    }

    /// Audio-context variant of `tick`: drain commands, mix every active
    /// voice into `out`, and recycle finished voices. Advances voice state
    /// by `out.len() / sample_rate` seconds.
    pub fn render_block(&mut self, out: &mut [f32], sample_rate: f32) {
        self.drain_commands();

        out.fill(0.0);
        let len = out.len().min(self.temp_buffer.len());
        for entry in &mut self.active {
            self.temp_buffer[..len].fill(0.0);
            entry.voice.render(&mut self.temp_buffer[..len], sample_rate);
            for (o, v) in out.iter_mut().zip(&self.temp_buffer[..len]) {
                *o += v;
            }
        }

        self.reap_done();
    }

    /// Panic control: release and immediately free every active voice,
    /// ignoring done conditions.
    pub fn all_notes_off(&mut self) {
        for mut entry in self.active.drain(..) {
            if entry.state == VoiceState::Active {
                entry.voice.on_trigger_off();
                for (_, cb) in &mut self.on_trigger_off {
                    cb(entry.id);
                }
            }
            for (_, cb) in &mut self.on_free {
                cb(entry.id, &entry.type_name);
            }
            self.pool.insert_free_voice(&entry.type_name, entry.voice);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn voice_state(&self, id: u64) -> Option<VoiceState> {
        self.active.iter().find(|v| v.id == id).map(|v| v.state)
    }

    pub fn register_trigger_on_callback(
        &mut self,
        cb: impl FnMut(u64, &str, &[ParameterField]) + Send + 'static,
    ) -> CallbackId {
        let id = self.alloc_callback_id();
        self.on_trigger_on.push((id, Box::new(cb)));
        id
    }

    pub fn register_trigger_off_callback(
        &mut self,
        cb: impl FnMut(u64) + Send + 'static,
    ) -> CallbackId {
        let id = self.alloc_callback_id();
        self.on_trigger_off.push((id, Box::new(cb)));
        id
    }

    /// Observe voices returning to the free list (either done or forced
    /// by `all_notes_off`).
    pub fn register_free_callback(
        &mut self,
        cb: impl FnMut(u64, &str) + Send + 'static,
    ) -> CallbackId {
        let id = self.alloc_callback_id();
        self.on_free.push((id, Box::new(cb)));
        id
    }

    /// Remove a previously registered observer. Unknown ids are ignored.
    pub fn unregister_callback(&mut self, id: CallbackId) {
        self.on_trigger_on.retain(|(cid, _)| *cid != id);
        self.on_trigger_off.retain(|(cid, _)| *cid != id);
        self.on_free.retain(|(cid, _)| *cid != id);
    }

    fn alloc_callback_id(&mut self) -> CallbackId {
        let id = CallbackId(self.next_callback_id);
        self.next_callback_id += 1;
        id
    }

    fn drain_commands(&mut self) {
        let Some(mut rx) = self.commands.take() else {
            return;
        };
        while let Some(cmd) = rx.pop() {
            match cmd {
                SynthCommand::TriggerOn { synth_name, fields } => {
                    if let Err(e) = self.trigger_on(&synth_name, &fields) {
                        log::warn!("dropped trigger-on command: {}", e);
                    }
                }
                SynthCommand::TriggerOff { id } => self.trigger_off(id),
                SynthCommand::AllNotesOff => self.all_notes_off(),
            }
        }
        self.commands = Some(rx);
    }
}

impl Default for PolySynth {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors from scheduler calls. In the realtime context these degrade to
/// logged no-ops at the call site rather than propagating.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthError {
    UnknownVoiceType(String),
    IdInUse(u64),
    BadField(FieldError),
}

impl From<UnknownVoiceType> for SynthError {
    fn from(e: UnknownVoiceType) -> Self {
        SynthError::UnknownVoiceType(e.0)
    }
}

impl std::fmt::Display for SynthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthError::UnknownVoiceType(name) => write!(f, "unknown voice type: {}", name),
            SynthError::IdInUse(id) => write!(f, "voice id {} is already active", id),
            SynthError::BadField(e) => write!(f, "bad trigger field: {}", e),
        }
    }
}

impl std::error::Error for SynthError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voices::{Pad, SineEnv};

    fn synth() -> PolySynth {
        let mut synth = PolySynth::new();
        synth.register_voice("SineEnv", || Box::new(SineEnv::new()) as Box<dyn SynthVoice>);
        synth.register_voice("Pad", || Box::new(Pad::new()) as Box<dyn SynthVoice>);
        synth
    }

    #[test]
    fn voice_lifecycle_two_phase_release() {
        let mut synth = synth();
        let id = synth
            .trigger_on("Pad", &[440.0.into(), 0.5.into()])
            .unwrap();
        assert_eq!(synth.voice_state(id), Some(VoiceState::Active));

        // Sustaining voices never self-complete
        synth.tick(1.0);
        assert_eq!(synth.voice_state(id), Some(VoiceState::Active));

        synth.trigger_off(id);
        assert_eq!(synth.voice_state(id), Some(VoiceState::Releasing));

        // Pad release is 2 seconds; still sounding after a short tick
        synth.tick(0.1);
        assert_eq!(synth.voice_state(id), Some(VoiceState::Releasing));

        // After the full release the voice is recycled
        synth.tick(5.0);
        assert_eq!(synth.voice_state(id), None);
        assert_eq!(synth.active_count(), 0);
        assert_eq!(synth.pool().free_count("Pad"), 1);
    }

    #[test]
    fn all_notes_off_frees_immediately() {
        let mut synth = synth();
        let a = synth.trigger_on("Pad", &[220.0.into(), 0.5.into()]).unwrap();
        let b = synth.trigger_on("Pad", &[330.0.into(), 0.5.into()]).unwrap();
        synth.trigger_off(b); // already releasing

        synth.all_notes_off();
        assert_eq!(synth.active_count(), 0);
        assert_eq!(synth.voice_state(a), None);
        assert_eq!(synth.pool().free_count("Pad"), 2);
    }

    #[test]
    fn unknown_voice_type_errors() {
        let mut synth = synth();
        assert!(matches!(
            synth.trigger_on("NoSuch", &[]),
            Err(SynthError::UnknownVoiceType(_))
        ));
    }

    #[test]
    fn explicit_id_collision_rejected() {
        let mut synth = synth();
        synth
            .trigger_on_with_id("SineEnv", 7, &[440.0.into(), 0.5.into()])
            .unwrap();
        assert_eq!(
            synth.trigger_on_with_id("SineEnv", 7, &[440.0.into(), 0.5.into()]),
            Err(SynthError::IdInUse(7))
        );
        // Fresh ids continue past the explicit one
        let next = synth.trigger_on("SineEnv", &[440.0.into(), 0.5.into()]).unwrap();
        assert!(next > 7);
    }

    #[test]
    fn observers_fire_in_registration_order_and_unsubscribe() {
        use std::sync::{Arc, Mutex};

        let mut synth = synth();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let first = synth.register_trigger_on_callback(move |id, name, _| {
            s1.lock().unwrap().push(format!("a:{}:{}", name, id));
        });
        let s2 = seen.clone();
        synth.register_trigger_on_callback(move |id, _, _| {
            s2.lock().unwrap().push(format!("b:{}", id));
        });

        let id = synth.trigger_on("SineEnv", &[440.0.into(), 0.5.into()]).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![format!("a:SineEnv:{}", id), format!("b:{}", id)]
        );

        synth.unregister_callback(first);
        seen.lock().unwrap().clear();
        let id2 = synth.trigger_on("SineEnv", &[440.0.into(), 0.5.into()]).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![format!("b:{}", id2)]);
    }

    #[cfg(feature = "rtrb")]
    #[test]
    fn command_channel_drained_on_tick() {
        use crate::synth::message::command_channel;

        let (mut tx, rx) = command_channel(16);
        let mut synth = synth().with_commands(rx);

        tx.push(SynthCommand::TriggerOn {
            synth_name: "SineEnv".into(),
            fields: vec![440.0.into(), 0.5.into()],
        })
        .unwrap();
        assert_eq!(synth.active_count(), 0);

        synth.tick(0.01);
        assert_eq!(synth.active_count(), 1);

        tx.push(SynthCommand::AllNotesOff).unwrap();
        synth.tick(0.01);
        assert_eq!(synth.active_count(), 0);
    }
}
