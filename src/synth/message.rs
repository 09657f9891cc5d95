use super::field::ParameterField;

/// Control messages sent from a UI or control-surface thread into the
/// realtime context that owns the [`PolySynth`](super::poly::PolySynth).
///
/// The synth drains its receiver at the top of every `tick`, so voice
/// state stays single-writer: only the realtime context ever mutates the
/// free and active lists.
#[derive(Debug, Clone)]
pub enum SynthCommand {
    TriggerOn {
        synth_name: String,
        fields: Vec<ParameterField>,
    },
    TriggerOff { id: u64 },
    AllNotesOff,
}

pub trait CommandReceiver: Send {
    fn pop(&mut self) -> Option<SynthCommand>;
}

#[cfg(feature = "rtrb")]
impl CommandReceiver for rtrb::Consumer<SynthCommand> {
    fn pop(&mut self) -> Option<SynthCommand> {
        rtrb::Consumer::pop(self).ok()
    }
}

/// Build a bounded command channel for feeding a synth across threads.
#[cfg(feature = "rtrb")]
pub fn command_channel(
    capacity: usize,
) -> (rtrb::Producer<SynthCommand>, rtrb::Consumer<SynthCommand>) {
    rtrb::RingBuffer::new(capacity)
}
