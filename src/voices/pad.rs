//! Pad voice - slow swell, long release.
//!
//! Useful for testing the two-phase release: after trigger-off this voice
//! keeps sounding for a full two seconds before its done condition turns
//! true. Trigger parameters are `frequency` (Hz) and `amplitude` (0..1).

use crate::synth::{FieldError, ParameterField, SynthVoice};

use super::LineEnv;

pub struct Pad {
    frequency: f32,
    amplitude: f32,
    env: LineEnv,
    phase: f64,
}

impl Pad {
    pub fn new() -> Self {
        Self {
            frequency: 220.0,
            amplitude: 0.3,
            env: LineEnv::new(0.5, 2.0),
            phase: 0.0,
        }
    }
}

impl Default for Pad {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthVoice for Pad {
    fn trigger_param_names(&self) -> &[&'static str] {
        &["frequency", "amplitude"]
    }

    fn trigger_fields(&self) -> Vec<ParameterField> {
        vec![self.frequency.into(), self.amplitude.into()]
    }

    fn set_trigger_fields(&mut self, fields: &[ParameterField]) -> Result<(), FieldError> {
        if let Some(f) = fields.first() {
            self.frequency = f.as_float()?;
        }
        if let Some(a) = fields.get(1) {
            self.amplitude = a.as_float()?;
        }
        Ok(())
    }

    fn on_trigger_on(&mut self) {
        self.phase = 0.0;
        self.env.trigger();
    }

    fn on_trigger_off(&mut self) {
        self.env.release();
    }

    fn tick(&mut self, dt: f64) {
        self.env.advance(dt);
    }

    fn is_done(&self) -> bool {
        self.env.is_done()
    }

    fn render(&mut self, out: &mut [f32], sample_rate: f32) {
        let dt = 1.0 / sample_rate as f64;
        for sample in out.iter_mut() {
            let level = self.env.advance(dt);
            // Two slightly detuned sines for a little width
            let a = (self.phase * std::f64::consts::TAU).sin();
            let b = (self.phase * 1.005 * std::f64::consts::TAU).sin();
            *sample += ((a + b) * 0.5) as f32 * level as f32 * self.amplitude;
            self.phase += self.frequency as f64 * dt;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
    }

    fn reset(&mut self) {
        self.frequency = 220.0;
        self.amplitude = 0.3;
        self.env.reset();
        self.phase = 0.0;
    }
}
