//! The fixed MIDI ↔ OSC translation table.
//!
//! Addresses mirror the event kinds one-to-one. The one asymmetry: an
//! incoming note-off becomes OSC args `[channel, note, 0]`, while the
//! OSC→MIDI direction for `/note_off` takes only `[channel, note]` — the
//! velocity is dropped on the wire.

use ostinato_types::Value;

pub const NOTE_ON: &str = "/note_on";
pub const NOTE_OFF: &str = "/note_off";
pub const CONTROL_CHANGE: &str = "/control_change";
pub const PROGRAM_CHANGE: &str = "/program_change";
pub const PITCH_BEND: &str = "/pitch_bend";
pub const SYSEX: &str = "/sysex";
pub const START: &str = "/start";
pub const STOP: &str = "/stop";

/// A decoded MIDI event, transport-agnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    PitchBend { channel: u8, value: i16 },
    /// Raw system-exclusive payload, passed through unchanged.
    Sysex(Vec<u8>),
    Start,
    Stop,
}

/// Translate a MIDI event into its OSC address and argument list.
pub fn midi_to_osc(event: &MidiEvent) -> (String, Vec<Value>) {
    match event {
        MidiEvent::NoteOn {
            channel,
            note,
            velocity,
        } => (
            NOTE_ON.to_string(),
            vec![
                Value::Int(*channel as i32),
                Value::Int(*note as i32),
                Value::Int(*velocity as i32),
            ],
        ),
        MidiEvent::NoteOff { channel, note } => (
            NOTE_OFF.to_string(),
            vec![
                Value::Int(*channel as i32),
                Value::Int(*note as i32),
                Value::Int(0),
            ],
        ),
        MidiEvent::ControlChange {
            channel,
            controller,
            value,
        } => (
            CONTROL_CHANGE.to_string(),
            vec![
                Value::Int(*channel as i32),
                Value::Int(*controller as i32),
                Value::Int(*value as i32),
            ],
        ),
        MidiEvent::ProgramChange { channel, program } => (
            PROGRAM_CHANGE.to_string(),
            vec![Value::Int(*channel as i32), Value::Int(*program as i32)],
        ),
        MidiEvent::PitchBend { channel, value } => (
            PITCH_BEND.to_string(),
            vec![Value::Int(*channel as i32), Value::Int(*value as i32)],
        ),
        MidiEvent::Sysex(bytes) => (
            SYSEX.to_string(),
            bytes.iter().map(|b| Value::Int(*b as i32)).collect(),
        ),
        MidiEvent::Start => (START.to_string(), vec![]),
        MidiEvent::Stop => (STOP.to_string(), vec![]),
    }
}

/// Translate an OSC address and argument list back into a MIDI event.
///
/// All numeric-looking arguments coerce to integers; an argument that fails
/// to coerce — or a missing one — aborts the conversion for the message.
pub fn osc_to_midi(address: &str, args: &[Value]) -> Option<MidiEvent> {
    let ints: Option<Vec<i32>> = args.iter().map(Value::as_int).collect();
    let ints = ints?;
    match address {
        NOTE_ON => Some(MidiEvent::NoteOn {
            channel: *ints.first()? as u8,
            note: *ints.get(1)? as u8,
            velocity: *ints.get(2)? as u8,
        }),
        // Asymmetric: only channel and note go back to the wire.
        NOTE_OFF => Some(MidiEvent::NoteOff {
            channel: *ints.first()? as u8,
            note: *ints.get(1)? as u8,
        }),
        CONTROL_CHANGE => Some(MidiEvent::ControlChange {
            channel: *ints.first()? as u8,
            controller: *ints.get(1)? as u8,
            value: *ints.get(2)? as u8,
        }),
        PROGRAM_CHANGE => Some(MidiEvent::ProgramChange {
            channel: *ints.first()? as u8,
            program: *ints.get(1)? as u8,
        }),
        PITCH_BEND => Some(MidiEvent::PitchBend {
            channel: *ints.first()? as u8,
            value: (*ints.get(1)?).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        }),
        SYSEX => Some(MidiEvent::Sysex(
            ints.iter().map(|v| *v as u8).collect(),
        )),
        START => Some(MidiEvent::Start),
        STOP => Some(MidiEvent::Stop),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_converts_both_ways() {
        let event = MidiEvent::NoteOn {
            channel: 1,
            note: 60,
            velocity: 100,
        };
        let (address, args) = midi_to_osc(&event);
        assert_eq!(address, "/note_on");
        assert_eq!(
            args,
            vec![Value::Int(1), Value::Int(60), Value::Int(100)]
        );
        assert_eq!(osc_to_midi(&address, &args), Some(event));
    }

    #[test]
    fn note_off_is_asymmetric() {
        let event = MidiEvent::NoteOff {
            channel: 2,
            note: 64,
        };
        let (address, args) = midi_to_osc(&event);
        // Inbound direction appends an explicit zero velocity.
        assert_eq!(args, vec![Value::Int(2), Value::Int(64), Value::Int(0)]);
        // Outbound direction needs channel and note only.
        assert_eq!(
            osc_to_midi("/note_off", &[Value::Int(2), Value::Int(64)]),
            Some(event)
        );
    }

    #[test]
    fn numeric_looking_args_coerce() {
        let event = osc_to_midi(
            "/control_change",
            &[Value::Float(1.0), Value::Str("7".into()), Value::Int(127)],
        );
        assert_eq!(
            event,
            Some(MidiEvent::ControlChange {
                channel: 1,
                controller: 7,
                value: 127,
            })
        );
    }

    #[test]
    fn uncoercible_arg_aborts() {
        assert_eq!(
            osc_to_midi(
                "/note_on",
                &[Value::Int(1), Value::Str("sixty".into()), Value::Int(100)]
            ),
            None
        );
    }

    #[test]
    fn missing_arg_aborts() {
        assert_eq!(osc_to_midi("/note_on", &[Value::Int(1)]), None);
    }

    #[test]
    fn sysex_passes_through() {
        let event = MidiEvent::Sysex(vec![0xF0, 0x7E, 0xF7]);
        let (address, args) = midi_to_osc(&event);
        assert_eq!(address, "/sysex");
        assert_eq!(osc_to_midi(&address, &args), Some(event));
    }

    #[test]
    fn transport_events_have_no_args() {
        assert_eq!(midi_to_osc(&MidiEvent::Start), ("/start".to_string(), vec![]));
        assert_eq!(osc_to_midi("/stop", &[]), Some(MidiEvent::Stop));
    }

    #[test]
    fn unknown_address_is_none() {
        assert_eq!(osc_to_midi("/nope", &[]), None);
    }
}
