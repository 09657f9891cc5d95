//! polyseq - record/replay demo
//!
//! Records a short phrase programmatically, saves it as a
//! `.synthSequence` file, then loads it back and plays it through the
//! default audio output. Run with: cargo run

use color_eyre::eyre::{eyre, Result as EyreResult, WrapErr};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use polyseq::sequencing::{RecorderFormat, SynthRecorder, SynthSequencer};
use polyseq::synth::{PolySynth, SynthEvent, SynthVoice};
use polyseq::voices::{Pad, SineEnv};
use polyseq::MAX_BLOCK_SIZE;

fn build_synth() -> PolySynth {
    let mut synth = PolySynth::new();
    synth.register_voice("SineEnv", || Box::new(SineEnv::new()) as Box<dyn SynthVoice>);
    synth.register_voice("Pad", || Box::new(Pad::new()) as Box<dyn SynthVoice>);
    synth
}

/// Write the demo phrase: an arpeggio over a held pad.
fn record_phrase(dir: &std::path::Path) -> EyreResult<String> {
    let mut synth = build_synth();
    let mut recorder = SynthRecorder::new();
    recorder.set_directory(dir);
    recorder.set_format(RecorderFormat::SequencerEvent);
    recorder.start_record("demo", true, "120", true, "8", false)?;

    recorder.push_event(SynthEvent::trigger_on(
        0.0,
        100,
        "Pad",
        vec![110.0.into(), 0.2.into()],
    ));
    recorder.push_event(SynthEvent::trigger_off(4.0, 100, ""));

    let arpeggio = [261.63f32, 329.63, 392.0, 523.25, 392.0, 329.63, 261.63, 329.63];
    for (i, freq) in arpeggio.iter().enumerate() {
        let start = i as f64 * 0.5;
        recorder.push_event(SynthEvent::trigger_on(
            start,
            i as u64,
            "SineEnv",
            vec![(*freq).into(), 0.3.into()],
        ));
        recorder.push_event(SynthEvent::trigger_off(start + 0.4, i as u64, ""));
    }

    let path = recorder.stop_record(&mut synth)?;
    println!("Recorded: {}", path.display());
    Ok(recorder
        .last_sequence_name()
        .ok_or_else(|| eyre!("recording saved without a name"))?
        .to_owned())
}

fn main() -> EyreResult<()> {
    color_eyre::install()?;

    let dir = std::env::temp_dir().join("polyseq-demo");
    std::fs::create_dir_all(&dir).wrap_err("failed to create demo directory")?;
    let name = record_phrase(&dir)?;

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| eyre!("no default output device available"))?;
    let config = device
        .default_output_config()
        .wrap_err("failed to fetch default output config")?;
    let sample_rate = config.sample_rate().0 as f32;
    let channels = config.channels() as usize;

    let mut synth = build_synth();
    let mut sequencer = SynthSequencer::new();
    sequencer.set_directory(&dir);
    let duration = sequencer.get_sequence_duration(&name)?;
    sequencer.play_sequence(&name, 1.0, 0.0)?;

    println!("=== polyseq ===");
    println!("Sample rate: {} Hz", sample_rate);
    println!("Channels: {}", channels);
    println!("Sequence: {} ({:.2} s)", name, duration);

    let mut render_buf = vec![0.0f32; MAX_BLOCK_SIZE];
    let stream = device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _| {
            let total_frames = data.len() / channels;
            let mut frames_written = 0;

            while frames_written < total_frames {
                let frames = (total_frames - frames_written).min(MAX_BLOCK_SIZE);
                let block_dt = frames as f64 / sample_rate as f64;

                sequencer.tick(block_dt, &mut synth);

                let block = &mut render_buf[..frames];
                synth.render_block(block, sample_rate);

                // Mono to all channels
                let out_off = frames_written * channels;
                for (i, &s) in block.iter().enumerate() {
                    for ch in 0..channels {
                        data[out_off + i * channels + ch] = s;
                    }
                }

                frames_written += frames;
            }
        },
        |err| eprintln!("Audio error: {}", err),
        None,
    )?;

    stream.play()?;

    // Sequence length plus the longest release tail
    std::thread::sleep(std::time::Duration::from_secs_f64(duration + 2.5));
    println!("Done.");
    Ok(())
}
