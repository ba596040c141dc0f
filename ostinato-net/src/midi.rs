//! MIDI adapter: midir port management plus raw byte encode/decode bridging
//! the engine's MIDI↔OSC translation table.
//!
//! Inbound bytes decode to `MidiEvent`, translate through the table and land
//! on the engine's inbound channel as messages whose port is the MIDI device
//! name. Outbound messages translate back and are written to the matching
//! output connection.

use std::collections::HashMap;

use crossbeam_channel::Sender;
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use ostinato_core::midi::{midi_to_osc, osc_to_midi, MidiEvent};
use ostinato_types::{Message, PortSpec, Protocol};

/// Decode one raw MIDI packet. Running status is not handled — every packet
/// must carry its status byte, which is what midir delivers.
pub fn parse_midi_bytes(data: &[u8]) -> Option<MidiEvent> {
    let status = *data.first()?;
    if status == 0xF0 {
        // Sysex: strip the 0xF0/0xF7 frame, keep the payload.
        let end = data.iter().position(|b| *b == 0xF7).unwrap_or(data.len());
        return Some(MidiEvent::Sysex(data[1..end].to_vec()));
    }
    if status == 0xFA {
        return Some(MidiEvent::Start);
    }
    if status == 0xFC {
        return Some(MidiEvent::Stop);
    }
    let channel = status & 0x0F;
    match status & 0xF0 {
        0x80 if data.len() >= 3 => Some(MidiEvent::NoteOff {
            channel,
            note: data[1],
        }),
        0x90 if data.len() >= 3 => {
            // Velocity zero is a note-off in disguise.
            if data[2] == 0 {
                Some(MidiEvent::NoteOff {
                    channel,
                    note: data[1],
                })
            } else {
                Some(MidiEvent::NoteOn {
                    channel,
                    note: data[1],
                    velocity: data[2],
                })
            }
        }
        0xB0 if data.len() >= 3 => Some(MidiEvent::ControlChange {
            channel,
            controller: data[1],
            value: data[2],
        }),
        0xC0 if data.len() >= 2 => Some(MidiEvent::ProgramChange {
            channel,
            program: data[1],
        }),
        0xE0 if data.len() >= 3 => {
            let lsb = data[1] as i16;
            let msb = data[2] as i16;
            Some(MidiEvent::PitchBend {
                channel,
                value: ((msb << 7) | lsb) - 8192,
            })
        }
        _ => None,
    }
}

/// Encode a `MidiEvent` back to raw bytes.
pub fn encode_midi_event(event: &MidiEvent) -> Vec<u8> {
    match event {
        MidiEvent::NoteOn {
            channel,
            note,
            velocity,
        } => vec![0x90 | (channel & 0x0F), *note & 0x7F, *velocity & 0x7F],
        MidiEvent::NoteOff { channel, note } => {
            vec![0x80 | (channel & 0x0F), *note & 0x7F, 0]
        }
        MidiEvent::ControlChange {
            channel,
            controller,
            value,
        } => vec![0xB0 | (channel & 0x0F), *controller & 0x7F, *value & 0x7F],
        MidiEvent::ProgramChange { channel, program } => {
            vec![0xC0 | (channel & 0x0F), *program & 0x7F]
        }
        MidiEvent::PitchBend { channel, value } => {
            let raw = (i32::from(*value) + 8192).clamp(0, 16383) as u16;
            vec![
                0xE0 | (channel & 0x0F),
                (raw & 0x7F) as u8,
                (raw >> 7) as u8,
            ]
        }
        MidiEvent::Sysex(payload) => {
            let mut bytes = Vec::with_capacity(payload.len() + 2);
            bytes.push(0xF0);
            bytes.extend_from_slice(payload);
            bytes.push(0xF7);
            bytes
        }
        MidiEvent::Start => vec![0xFA],
        MidiEvent::Stop => vec![0xFC],
    }
}

/// Inbound MIDI: connects named ports and forwards decoded traffic to the
/// engine's inbound channel.
pub struct MidiInputAdapter {
    connections: HashMap<String, MidiInputConnection<()>>,
    inbound: Sender<Message>,
}

impl MidiInputAdapter {
    pub fn new(inbound: Sender<Message>) -> MidiInputAdapter {
        MidiInputAdapter {
            connections: HashMap::new(),
            inbound,
        }
    }

    /// Names of MIDI input ports currently visible on the system.
    pub fn available_ports() -> Vec<String> {
        let Ok(midi_in) = MidiInput::new("ostinato") else {
            return Vec::new();
        };
        midi_in
            .ports()
            .iter()
            .filter_map(|p| midi_in.port_name(p).ok())
            .collect()
    }

    /// Connect a port whose name contains `device`. Inbound events arrive as
    /// messages with `PortSpec::Device(device)`.
    pub fn connect(&mut self, device: &str) -> Result<(), String> {
        if self.connections.contains_key(device) {
            return Ok(());
        }
        let midi_in = MidiInput::new("ostinato").map_err(|e| e.to_string())?;
        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| {
                midi_in
                    .port_name(p)
                    .map(|n| n.contains(device))
                    .unwrap_or(false)
            })
            .ok_or_else(|| format!("no MIDI input port matching \"{}\"", device))?;
        let inbound = self.inbound.clone();
        let device_name = device.to_string();
        let callback_device = device_name.clone();
        let connection = midi_in
            .connect(
                port,
                "ostinato-input",
                move |_timestamp, bytes, _| {
                    let Some(event) = parse_midi_bytes(bytes) else {
                        return;
                    };
                    let (address, args) = midi_to_osc(&event);
                    let message = Message::new(
                        Protocol::Midi,
                        PortSpec::Device(callback_device.clone()),
                        address,
                        args,
                    );
                    if inbound.send(message).is_err() {
                        log::debug!(target: "net::midi", "engine gone, dropping MIDI input");
                    }
                },
                (),
            )
            .map_err(|e| e.to_string())?;
        self.connections.insert(device_name, connection);
        Ok(())
    }

    pub fn disconnect(&mut self, device: &str) {
        if let Some(connection) = self.connections.remove(device) {
            connection.close();
        }
    }
}

/// Outbound MIDI: translates engine messages through the table and writes
/// raw bytes to the matching output connection.
pub struct MidiOutputAdapter {
    connections: HashMap<String, MidiOutputConnection>,
}

impl MidiOutputAdapter {
    pub fn new() -> MidiOutputAdapter {
        MidiOutputAdapter {
            connections: HashMap::new(),
        }
    }

    pub fn available_ports() -> Vec<String> {
        let Ok(midi_out) = MidiOutput::new("ostinato") else {
            return Vec::new();
        };
        midi_out
            .ports()
            .iter()
            .filter_map(|p| midi_out.port_name(p).ok())
            .collect()
    }

    pub fn connect(&mut self, device: &str) -> Result<(), String> {
        if self.connections.contains_key(device) {
            return Ok(());
        }
        let midi_out = MidiOutput::new("ostinato").map_err(|e| e.to_string())?;
        let ports = midi_out.ports();
        let port = ports
            .iter()
            .find(|p| {
                midi_out
                    .port_name(p)
                    .map(|n| n.contains(device))
                    .unwrap_or(false)
            })
            .ok_or_else(|| format!("no MIDI output port matching \"{}\"", device))?;
        let connection = midi_out
            .connect(port, "ostinato-output")
            .map_err(|e| e.to_string())?;
        self.connections.insert(device.to_string(), connection);
        Ok(())
    }

    pub fn disconnect(&mut self, device: &str) {
        if let Some(connection) = self.connections.remove(device) {
            connection.close();
        }
    }

    /// Send one engine message. Unknown addresses and uncoercible arguments
    /// abort the conversion (logged at debug — the table is deliberately
    /// closed).
    pub fn send(&mut self, message: &Message) {
        let PortSpec::Device(device) = &message.port else {
            log::warn!(
                target: "net::midi",
                "MIDI adapter needs a device port, got {}",
                message.port
            );
            return;
        };
        let Some(event) = osc_to_midi(&message.address, &message.args) else {
            log::debug!(
                target: "net::midi",
                "no MIDI translation for {}, dropping",
                message.address
            );
            return;
        };
        let Some(connection) = self.connections.get_mut(device) else {
            log::warn!(target: "net::midi", "device \"{}\" not connected", device);
            return;
        };
        let bytes = encode_midi_event(&event);
        if let Err(e) = connection.send(&bytes) {
            log::warn!(target: "net::midi", "send to \"{}\" failed: {}", device, e);
        }
    }
}

impl Default for MidiOutputAdapter {
    fn default() -> Self {
        Self::new()
    }
}
