// Purpose: voice lifecycle, polyphony, trigger scheduling
// This layer owns the pool of instrument voices and the active-voice list

pub mod event;
pub mod field;
pub mod message;
pub mod pool;
pub mod poly;
pub mod voice;

pub use event::{SynthEvent, SynthEventType};
pub use field::{FieldError, FieldKind, ParameterField};
pub use message::{CommandReceiver, SynthCommand};
pub use pool::{UnknownVoiceType, VoiceFactory, VoicePool};
pub use poly::{CallbackId, PolySynth, SynthError};
pub use voice::{SynthVoice, VoiceState};
