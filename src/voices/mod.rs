//! Example instrument voices.
//!
//! These are deliberately small: enough DSP to exercise the full voice
//! lifecycle (attack, sustain, release tail, done condition) and to give
//! the demo binary something audible. Real applications register their
//! own [`SynthVoice`](crate::synth::SynthVoice) implementations.

mod pad;
mod sine_env;

pub use pad::Pad;
pub use sine_env::SineEnv;

/// Linear attack / sustain / linear release envelope shared by the
/// example voices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum EnvStage {
    Idle,
    Attack,
    Sustain,
    Release,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LineEnv {
    attack: f64,
    release: f64,
    level: f64,
    stage: EnvStage,
}

// Level below which a releasing envelope counts as silent.
const SILENCE: f64 = 1e-4;

impl LineEnv {
    pub(crate) fn new(attack: f64, release: f64) -> Self {
        Self {
            attack,
            release,
            level: 0.0,
            stage: EnvStage::Idle,
        }
    }

    pub(crate) fn trigger(&mut self) {
        self.level = 0.0;
        self.stage = EnvStage::Attack;
    }

    pub(crate) fn release(&mut self) {
        if matches!(self.stage, EnvStage::Attack | EnvStage::Sustain) {
            self.stage = EnvStage::Release;
        }
    }

    pub(crate) fn advance(&mut self, dt: f64) -> f64 {
        match self.stage {
            EnvStage::Idle | EnvStage::Done => {}
            EnvStage::Attack => {
                self.level += if self.attack > 0.0 { dt / self.attack } else { 1.0 };
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvStage::Sustain;
                }
            }
            EnvStage::Sustain => {}
            EnvStage::Release => {
                self.level -= if self.release > 0.0 { dt / self.release } else { 1.0 };
                if self.level <= SILENCE {
                    self.level = 0.0;
                    self.stage = EnvStage::Done;
                }
            }
        }
        self.level
    }

    pub(crate) fn is_done(&self) -> bool {
        self.stage == EnvStage::Done
    }

    pub(crate) fn reset(&mut self) {
        self.level = 0.0;
        self.stage = EnvStage::Idle;
    }
}
