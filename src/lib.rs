pub mod sequencing; // Timing grid, sequence files, playback and recording
pub mod synth; // Voice management and polyphony
pub mod voices; // Example instrument voices

/// File extension for persisted sequences.
pub const SEQUENCE_EXTENSION: &str = ".synthSequence";

pub const MAX_BLOCK_SIZE: usize = 2048;
