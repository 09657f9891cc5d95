use super::field::ParameterField;

/// Whether an event starts or releases a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SynthEventType {
    TriggerOn,
    TriggerOff,
}

/// One timestamped trigger record, either captured live by the recorder
/// or parsed from a sequence file.
///
/// `id` correlates a trigger-on with its eventual trigger-off within a
/// recording or playback session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SynthEvent {
    /// Seconds from sequence start.
    pub time: f64,
    pub event_type: SynthEventType,
    /// Voice instance correlation key.
    pub id: u64,
    /// Voice type identifier; empty for trigger-off records, whose id
    /// alone identifies the voice.
    pub synth_name: String,
    pub fields: Vec<ParameterField>,
}

impl SynthEvent {
    pub fn trigger_on(
        time: f64,
        id: u64,
        synth_name: impl Into<String>,
        fields: Vec<ParameterField>,
    ) -> Self {
        Self {
            time,
            event_type: SynthEventType::TriggerOn,
            id,
            synth_name: synth_name.into(),
            fields,
        }
    }

    pub fn trigger_off(time: f64, id: u64, synth_name: impl Into<String>) -> Self {
        Self {
            time,
            event_type: SynthEventType::TriggerOff,
            id,
            synth_name: synth_name.into(),
            fields: Vec::new(),
        }
    }
}
