use super::field::{FieldError, ParameterField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Free,      // Available for allocation
    Active,    // Triggered, sounding
    Releasing, // Trigger-off received, waiting for the done condition
}

/// One schedulable instrument voice.
///
/// Implementations hold their own DSP state plus a set of named trigger
/// parameters. The scheduler drives the lifecycle: `on_trigger_on` when the
/// voice starts, `on_trigger_off` when it should begin its release, then
/// `tick` every frame until `is_done` reports the release has finished.
///
/// A voice is not freed on trigger-off; it keeps sounding (envelope tail,
/// cymbal decay) until `is_done` turns true. `reset` must return all
/// internal state to a just-constructed condition so the instance can be
/// recycled through the pool.
pub trait SynthVoice: Send {
    /// Trigger parameter names, in the order fields appear in sequence
    /// files and in the `#` trailer.
    fn trigger_param_names(&self) -> &[&'static str];

    /// Current trigger parameter values, in `trigger_param_names` order.
    fn trigger_fields(&self) -> Vec<ParameterField>;

    /// Apply trigger parameters before `on_trigger_on`. Extra fields are
    /// ignored so newer files can carry parameters older voices lack.
    fn set_trigger_fields(&mut self, fields: &[ParameterField]) -> Result<(), FieldError>;

    /// Called when the voice becomes active.
    fn on_trigger_on(&mut self);

    /// Called when the voice should begin its release phase.
    fn on_trigger_off(&mut self);

    /// Advance internal processing by `dt` seconds. Called from the
    /// realtime context; must not block or allocate.
    fn tick(&mut self, dt: f64);

    /// True once the release has decayed and the voice can be recycled.
    fn is_done(&self) -> bool;

    /// Mix one block of samples into `out`, advancing internal state by
    /// `out.len() / sample_rate` seconds. Voices that produce no audio
    /// (visual voices, control voices) keep the default no-op and are
    /// advanced through `tick` instead.
    fn render(&mut self, _out: &mut [f32], _sample_rate: f32) {}

    /// Return to a just-constructed state for reuse.
    fn reset(&mut self);
}
