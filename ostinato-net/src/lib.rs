//! # ostinato-net
//!
//! Transport adapters for the ostinato engine: OSC over UDP and MIDI ports.
//! Adapters consume the engine's outbound `Message` queue on their own
//! threads and feed inbound wire traffic back through the engine's inbound
//! channel — the tick loop never touches a socket.

pub mod midi;
pub mod osc;

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use ostinato_types::{Message, Protocol};

/// Fan the engine's single outbound stream out to per-protocol adapters.
/// Messages for a protocol without an adapter are dropped with a log line.
pub fn spawn_protocol_dispatch(
    rx: Receiver<Message>,
    osc: Option<Sender<Message>>,
    midi: Option<Sender<Message>>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("net-dispatch".into())
        .spawn(move || {
            while let Ok(message) = rx.recv() {
                let target = match message.protocol {
                    Protocol::Osc | Protocol::OscTcp | Protocol::OscUnix => osc.as_ref(),
                    Protocol::Midi => midi.as_ref(),
                };
                match target {
                    Some(tx) => {
                        if tx.send(message).is_err() {
                            log::warn!(target: "net", "adapter gone, dropping outbound message");
                        }
                    }
                    None => {
                        log::debug!(
                            target: "net",
                            "no adapter for {:?}, dropping message",
                            message.protocol
                        );
                    }
                }
            }
        })
        .expect("failed to spawn net-dispatch thread")
}
