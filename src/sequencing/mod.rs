// Purpose: musical timing, sequence persistence, playback, recording

pub mod parse;
pub mod quantize;
pub mod recorder;
pub mod sequencer;

pub use parse::{ParseError, ParsedSequence, SequenceIoError, SequenceLine};
pub use quantize::QuantizeGrid;
pub use recorder::{RecordError, RecorderFormat, SynthRecorder};
pub use sequencer::{ObserverId, SynthSequencer};
