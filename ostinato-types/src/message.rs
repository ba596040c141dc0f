use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Transport protocol a module speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// OSC over UDP.
    Osc,
    /// OSC over TCP.
    OscTcp,
    /// OSC over a unix domain socket.
    OscUnix,
    /// MIDI through a named port.
    Midi,
}

/// Where a message goes (or came from): a network port, a socket path, or a
/// MIDI device/port name, depending on the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortSpec {
    Number(u16),
    Path(String),
    Device(String),
}

impl std::fmt::Display for PortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortSpec::Number(n) => write!(f, "{}", n),
            PortSpec::Path(p) => write!(f, "{}", p),
            PortSpec::Device(d) => write!(f, "{}", d),
        }
    }
}

/// The canonical unit exchanged with transport adapters, in both directions:
/// outbound on the engine's message queue, inbound on the engine's route path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub protocol: Protocol,
    pub port: PortSpec,
    pub address: String,
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(protocol: Protocol, port: PortSpec, address: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            protocol,
            port,
            address: address.into(),
            args,
        }
    }
}
