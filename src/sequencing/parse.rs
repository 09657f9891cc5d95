//! Line-oriented parser for `.synthSequence` files.
//!
//! One event per line, keyed by the first token:
//!
//! ```text
//! @ <time> <duration> <voiceType> <field>...   paired event
//! + <time> <id> <voiceType> <field>...         raw trigger-on
//! - <time> <id> <field>...                     raw trigger-off
//! t <bpm>                                      tempo declaration
//! # <voiceType> <paramName>...                 trigger parameter index
//! ```
//!
//! Fields are bare floats or double-quoted strings (quotes may enclose
//! spaces). Parsing is best-effort: malformed lines are logged and
//! skipped, and unknown line prefixes are ignored so newer writers stay
//! readable by older parsers.

use std::io::BufRead;
use std::path::PathBuf;

use crate::synth::{ParameterField, SynthEvent, SynthEventType};

/// One recognized line of a sequence file.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceLine {
    Event {
        time: f64,
        duration: f64,
        synth_name: String,
        fields: Vec<ParameterField>,
    },
    TriggerOn {
        time: f64,
        id: u64,
        synth_name: String,
        fields: Vec<ParameterField>,
    },
    TriggerOff {
        time: f64,
        id: u64,
        fields: Vec<ParameterField>,
    },
    Tempo(f64),
    Index {
        synth_name: String,
        params: Vec<String>,
    },
}

/// A fully parsed sequence: flattened trigger events in file order plus
/// the trailing voice-type index.
#[derive(Debug, Clone, Default)]
pub struct ParsedSequence {
    pub events: Vec<SynthEvent>,
    /// `(voiceType, triggerParamNames)` pairs from `#` lines.
    pub index: Vec<(String, Vec<String>)>,
    /// Tempo declared by the first `t` line, if any.
    pub declared_tempo: Option<f64>,
}

impl ParsedSequence {
    /// End of the last event, i.e. max over trigger-off times (a paired
    /// `@` line contributes `time + duration` through its off event).
    pub fn duration(&self) -> f64 {
        self.events.iter().map(|e| e.time).fold(0.0, f64::max)
    }
}

#[derive(Debug)]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for ParseError {}

/// Opening or reading a sequence file failed.
#[derive(Debug)]
pub struct SequenceIoError {
    pub path: PathBuf,
    pub source: std::io::Error,
}

impl std::fmt::Display for SequenceIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sequence file {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for SequenceIoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// A whitespace-separated token, tracking whether it was double-quoted.
#[derive(Debug, Clone, PartialEq)]
struct Token {
    text: String,
    quoted: bool,
}

fn tokenize(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut text = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                text.push(c);
            }
            tokens.push(Token { text, quoted: true });
        } else {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                text.push(c);
                chars.next();
            }
            tokens.push(Token { text, quoted: false });
        }
    }
    tokens
}

fn number(token: &Token, line: usize, what: &str) -> Result<f64, ParseError> {
    if token.quoted {
        return Err(ParseError {
            line,
            reason: format!("expected {}, found quoted string", what),
        });
    }
    token.text.parse::<f64>().map_err(|_| ParseError {
        line,
        reason: format!("expected {}, found '{}'", what, token.text),
    })
}

fn event_id(token: &Token, line: usize) -> Result<u64, ParseError> {
    if token.quoted {
        return Err(ParseError {
            line,
            reason: "expected id, found quoted string".to_owned(),
        });
    }
    // Ids are unsigned integers; a float or negative token here would
    // silently collide with another event's id if coerced.
    token.text.parse::<u64>().map_err(|_| ParseError {
        line,
        reason: format!("expected id, found '{}'", token.text),
    })
}

fn fields(tokens: &[Token], line: usize) -> Result<Vec<ParameterField>, ParseError> {
    tokens
        .iter()
        .map(|t| {
            if t.quoted {
                Ok(ParameterField::Str(t.text.clone()))
            } else {
                t.text
                    .parse::<f32>()
                    .map(ParameterField::Float)
                    .map_err(|_| ParseError {
                        line,
                        reason: format!("unparseable field '{}'", t.text),
                    })
            }
        })
        .collect()
}

/// Parse one line. `Ok(None)` means the line is empty or carries an
/// unknown prefix and should be ignored.
pub fn parse_line(raw: &str, line: usize) -> Result<Option<SequenceLine>, ParseError> {
    let tokens = tokenize(raw);
    let Some(head) = tokens.first() else {
        return Ok(None);
    };
    if head.quoted {
        return Ok(None);
    }
    let need = |n: usize| -> Result<(), ParseError> {
        if tokens.len() < n {
            Err(ParseError {
                line,
                reason: format!("'{}' line needs at least {} tokens", head.text, n),
            })
        } else {
            Ok(())
        }
    };
    match head.text.as_str() {
        "@" => {
            need(4)?;
            Ok(Some(SequenceLine::Event {
                time: number(&tokens[1], line, "time")?,
                duration: number(&tokens[2], line, "duration")?,
                synth_name: tokens[3].text.clone(),
                fields: fields(&tokens[4..], line)?,
            }))
        }
        "+" => {
            need(4)?;
            Ok(Some(SequenceLine::TriggerOn {
                time: number(&tokens[1], line, "time")?,
                id: event_id(&tokens[2], line)?,
                synth_name: tokens[3].text.clone(),
                fields: fields(&tokens[4..], line)?,
            }))
        }
        "-" => {
            need(3)?;
            Ok(Some(SequenceLine::TriggerOff {
                time: number(&tokens[1], line, "time")?,
                id: event_id(&tokens[2], line)?,
                fields: fields(&tokens[3..], line)?,
            }))
        }
        "t" => {
            need(2)?;
            Ok(Some(SequenceLine::Tempo(number(&tokens[1], line, "bpm")?)))
        }
        "#" => {
            need(2)?;
            Ok(Some(SequenceLine::Index {
                synth_name: tokens[1].text.clone(),
                params: tokens[2..].iter().map(|t| t.text.clone()).collect(),
            }))
        }
        _ => Ok(None),
    }
}

/// Parse a whole file into flattened trigger events.
///
/// Paired `@` lines expand into a trigger-on/trigger-off pair sharing a
/// synthesized correlation id; raw `+`/`-` lines keep their file ids.
/// Every event time is offset by `start_time`. When `tempo_override` is
/// given and the file declares a tempo, events after the declaration are
/// scaled by `declared / override` (doubling the tempo halves all times).
///
/// Malformed lines are logged and skipped; only I/O errors are fatal.
pub fn parse_sequence(
    reader: impl BufRead,
    start_time: f64,
    tempo_override: Option<f64>,
) -> Result<ParsedSequence, std::io::Error> {
    let mut parsed = ParsedSequence::default();
    let mut next_pair_id: u64 = 0;
    let mut tempo_factor = 1.0;
    let mut saw_pair = false;
    let mut saw_trigger = false;

    for (idx, raw) in reader.lines().enumerate() {
        let raw = raw?;
        let lineno = idx + 1;
        let line = match parse_line(&raw, lineno) {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("skipping sequence line: {}", e);
                continue;
            }
        };
        match line {
            SequenceLine::Event {
                time,
                duration,
                synth_name,
                fields,
            } => {
                saw_pair = true;
                let id = next_pair_id;
                next_pair_id += 1;
                let on_time = start_time + time * tempo_factor;
                let off_time = start_time + (time + duration) * tempo_factor;
                parsed
                    .events
                    .push(SynthEvent::trigger_on(on_time, id, synth_name.clone(), fields));
                parsed
                    .events
                    .push(SynthEvent::trigger_off(off_time, id, synth_name));
            }
            SequenceLine::TriggerOn {
                time,
                id,
                synth_name,
                fields,
            } => {
                saw_trigger = true;
                parsed.events.push(SynthEvent::trigger_on(
                    start_time + time * tempo_factor,
                    id,
                    synth_name,
                    fields,
                ));
            }
            SequenceLine::TriggerOff { time, id, .. } => {
                saw_trigger = true;
                parsed.events.push(SynthEvent::trigger_off(
                    start_time + time * tempo_factor,
                    id,
                    String::new(),
                ));
            }
            SequenceLine::Tempo(bpm) => {
                if parsed.declared_tempo.is_none() {
                    parsed.declared_tempo = Some(bpm);
                }
                if let Some(target) = tempo_override {
                    if target > 0.0 && bpm > 0.0 {
                        tempo_factor = bpm / target;
                    }
                }
            }
            SequenceLine::Index { synth_name, params } => {
                parsed.index.push((synth_name, params));
            }
        }
    }

    if saw_pair && saw_trigger {
        log::warn!("sequence mixes '@' and '+/-' lines; pair ids may collide with file ids");
    }

    // Events must replay in time order regardless of file order. Stable
    // sort keeps file order for equal times.
    parsed
        .events
        .sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));

    // With an index present, voice types that never appear in it usually
    // mean a file written for a different voice set.
    if !parsed.index.is_empty() {
        for event in &parsed.events {
            if event.event_type == SynthEventType::TriggerOn
                && !parsed.index.iter().any(|(name, _)| *name == event.synth_name)
            {
                log::warn!("voice type '{}' missing from sequence index", event.synth_name);
            }
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_paired_event_line() {
        let line = parse_line("@ 0.5 1.25 SineEnv 440 0.5 \"soft pad\"", 1)
            .unwrap()
            .unwrap();
        assert_eq!(
            line,
            SequenceLine::Event {
                time: 0.5,
                duration: 1.25,
                synth_name: "SineEnv".into(),
                fields: vec![
                    ParameterField::Float(440.0),
                    ParameterField::Float(0.5),
                    ParameterField::Str("soft pad".into()),
                ],
            }
        );
    }

    #[test]
    fn parses_trigger_lines() {
        assert_eq!(
            parse_line("+ 0.1 3 Pad 220 0.4", 1).unwrap().unwrap(),
            SequenceLine::TriggerOn {
                time: 0.1,
                id: 3,
                synth_name: "Pad".into(),
                fields: vec![ParameterField::Float(220.0), ParameterField::Float(0.4)],
            }
        );
        assert_eq!(
            parse_line("- 0.9 3", 1).unwrap().unwrap(),
            SequenceLine::TriggerOff {
                time: 0.9,
                id: 3,
                fields: vec![],
            }
        );
    }

    #[test]
    fn unknown_prefix_and_blank_lines_ignored() {
        assert_eq!(parse_line("", 1).unwrap(), None);
        assert_eq!(parse_line("   ", 2).unwrap(), None);
        assert_eq!(parse_line("? what is this", 3).unwrap(), None);
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(parse_line("@ notatime 1.0 SineEnv", 1).is_err());
        assert!(parse_line("@ 1.0", 2).is_err());
        assert!(parse_line("+ 0.0 1 SineEnv nope", 3).is_err());
    }

    #[test]
    fn non_integer_ids_are_errors_not_coerced() {
        // a negative id must not coerce into a collision with id 0
        assert!(parse_line("- 0.5 -1", 1).is_err());
        assert!(parse_line("- 0.5 1.5", 2).is_err());
        assert!(parse_line("+ 0.0 -3 SineEnv 440", 3).is_err());
    }

    #[test]
    fn event_lines_expand_to_on_off_pairs() {
        let text = "@ 0 1 SineEnv 440 0.5\n@ 0.5 1 SineEnv 550 0.5\n# SineEnv frequency amplitude\n";
        let parsed = parse_sequence(Cursor::new(text), 0.0, None).unwrap();
        assert_eq!(parsed.events.len(), 4);
        assert_eq!(parsed.index, vec![("SineEnv".into(), vec!["frequency".into(), "amplitude".into()])]);

        let ons: Vec<_> = parsed
            .events
            .iter()
            .filter(|e| e.event_type == SynthEventType::TriggerOn)
            .collect();
        let offs: Vec<_> = parsed
            .events
            .iter()
            .filter(|e| e.event_type == SynthEventType::TriggerOff)
            .collect();
        assert_eq!(ons.len(), 2);
        assert_eq!(offs.len(), 2);
        assert_eq!(ons[0].id, offs[0].id);
        assert_eq!(offs[0].time, 1.0);
        assert_eq!(offs[1].time, 1.5);
    }

    #[test]
    fn start_time_offsets_all_events() {
        let parsed = parse_sequence(Cursor::new("@ 1 1 SineEnv 440 0.5\n"), 10.0, None).unwrap();
        assert_eq!(parsed.events[0].time, 11.0);
        assert_eq!(parsed.events[1].time, 12.0);
    }

    #[test]
    fn bad_lines_are_skipped_not_fatal() {
        let text = "@ 0 1 SineEnv 440 0.5\n@ broken line here\n@ 2 1 SineEnv 550 0.5\n";
        let parsed = parse_sequence(Cursor::new(text), 0.0, None).unwrap();
        assert_eq!(parsed.events.len(), 4);
    }

    #[test]
    fn tempo_override_rescales_subsequent_events() {
        let text = "t 60\n@ 1 1 SineEnv 440 0.5\n";
        // Playing a 60 bpm file at 120 bpm halves every time.
        let parsed = parse_sequence(Cursor::new(text), 0.0, Some(120.0)).unwrap();
        assert_eq!(parsed.declared_tempo, Some(60.0));
        assert_eq!(parsed.events[0].time, 0.5);
        assert_eq!(parsed.events[1].time, 1.0);

        // Without an override the declared tempo is informational only.
        let parsed = parse_sequence(Cursor::new(text), 0.0, None).unwrap();
        assert_eq!(parsed.events[0].time, 1.0);
    }

    #[test]
    fn duration_is_last_event_end() {
        let text = "@ 0 1 SineEnv 440 0.5\n@ 2 1.5 SineEnv 550 0.5\n";
        let parsed = parse_sequence(Cursor::new(text), 0.0, None).unwrap();
        assert_eq!(parsed.duration(), 3.5);
    }

    #[test]
    fn events_sorted_by_time_stably() {
        let text = "+ 1.0 1 SineEnv 440 0.5\n+ 0.5 2 SineEnv 550 0.5\n+ 1.0 3 SineEnv 660 0.5\n";
        let parsed = parse_sequence(Cursor::new(text), 0.0, None).unwrap();
        let ids: Vec<u64> = parsed.events.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }
}
