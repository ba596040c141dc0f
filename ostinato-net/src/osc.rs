//! OSC-over-UDP adapter.
//!
//! Outbound messages are encoded with `rosc` and pushed through a bounded
//! channel drained by a dedicated sender thread, keeping UDP I/O off the
//! engine tick loop. A receiver thread decodes inbound datagrams and forwards
//! them to the engine's inbound channel, tagged with the peer's port so the
//! engine can route them to the owning module.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};

use ostinato_types::{Message, PortSpec, Protocol, Value};

/// Channel capacity for the outbound queue. The sender thread drains faster
/// than the engine fills it under any sane tick rate.
const SEND_QUEUE_CAPACITY: usize = 512;

const RECV_BUFFER_SIZE: usize = 4096;

pub fn to_osc_type(value: &Value) -> OscType {
    match value {
        Value::Int(v) => OscType::Int(*v),
        Value::Float(v) => OscType::Float(*v),
        Value::Bool(v) => OscType::Bool(*v),
        Value::Str(s) => OscType::String(s.clone()),
    }
}

pub fn from_osc_type(arg: &OscType) -> Option<Value> {
    match arg {
        OscType::Int(v) => Some(Value::Int(*v)),
        OscType::Long(v) => Some(Value::Int(*v as i32)),
        OscType::Float(v) => Some(Value::Float(*v)),
        OscType::Double(v) => Some(Value::Float(*v as f32)),
        OscType::Bool(v) => Some(Value::Bool(*v)),
        OscType::String(s) => Some(Value::Str(s.clone())),
        _ => None,
    }
}

/// UDP OSC endpoint: one socket, one sender thread, one receiver thread.
pub struct OscAdapter {
    outbound_tx: Sender<Message>,
    send_thread: Option<JoinHandle<()>>,
    recv_thread: Option<JoinHandle<()>>,
}

impl OscAdapter {
    /// Bind a local UDP port and start both threads. Inbound messages go to
    /// `inbound` (clone of the engine's inbound sender).
    pub fn bind(local_port: u16, inbound: Sender<Message>) -> Result<OscAdapter, String> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, local_port))
            .map_err(|e| format!("failed to bind UDP port {}: {}", local_port, e))?;
        let recv_socket = socket
            .try_clone()
            .map_err(|e| format!("failed to clone UDP socket: {}", e))?;

        let (outbound_tx, outbound_rx) = crossbeam_channel::bounded(SEND_QUEUE_CAPACITY);
        let send_thread = thread::Builder::new()
            .name("osc-sender".into())
            .spawn(move || sender_loop(socket, outbound_rx))
            .map_err(|e| format!("failed to spawn osc-sender thread: {}", e))?;
        let recv_thread = thread::Builder::new()
            .name("osc-receiver".into())
            .spawn(move || receiver_loop(recv_socket, inbound))
            .map_err(|e| format!("failed to spawn osc-receiver thread: {}", e))?;

        Ok(OscAdapter {
            outbound_tx,
            send_thread: Some(send_thread),
            recv_thread: Some(recv_thread),
        })
    }

    /// Sender the engine's protocol dispatch feeds. Non-blocking: a full
    /// queue drops the message with a warning rather than stalling the tick.
    pub fn outbound(&self) -> Sender<Message> {
        self.outbound_tx.clone()
    }

    /// Queue one outbound message without blocking. Returns `false` when the
    /// queue was full and the message was dropped.
    pub fn try_queue(&self, message: Message) -> bool {
        match self.outbound_tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!(target: "net::osc", "OSC send queue full, dropping message");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for OscAdapter {
    fn drop(&mut self) {
        // Closing the channel ends the sender loop; the receiver thread ends
        // with the process (blocking recv has no portable wakeup).
        let _ = self.send_thread.take();
        let _ = self.recv_thread.take();
    }
}

fn sender_loop(socket: UdpSocket, rx: Receiver<Message>) {
    while let Ok(message) = rx.recv() {
        let target = match &message.port {
            PortSpec::Number(port) => SocketAddr::from((Ipv4Addr::LOCALHOST, *port)),
            other => {
                log::warn!(
                    target: "net::osc",
                    "UDP adapter cannot send to port spec {}, dropping",
                    other
                );
                continue;
            }
        };
        let packet = OscPacket::Message(OscMessage {
            addr: message.address.clone(),
            args: message.args.iter().map(to_osc_type).collect(),
        });
        match encoder::encode(&packet) {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, target) {
                    log::warn!(target: "net::osc", "send to {} failed: {}", target, e);
                }
            }
            Err(e) => log::error!(target: "net::osc", "failed to encode {}: {}", message.address, e),
        }
    }
}

fn receiver_loop(socket: UdpSocket, inbound: Sender<Message>) {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buffer) {
            Ok((len, peer)) => {
                if let Ok((_, packet)) = decoder::decode_udp(&buffer[..len]) {
                    if forward_packet(&packet, peer.port(), &inbound).is_err() {
                        // Engine gone; nothing left to deliver to.
                        return;
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                log::warn!(target: "net::osc", "recv failed, stopping receiver: {}", e);
                return;
            }
        }
    }
}

/// Flatten a packet (messages and nested bundles) into inbound engine
/// messages tagged with the peer's port.
fn forward_packet(
    packet: &OscPacket,
    peer_port: u16,
    inbound: &Sender<Message>,
) -> Result<(), crossbeam_channel::SendError<Message>> {
    match packet {
        OscPacket::Message(msg) => {
            let args: Vec<Value> = msg.args.iter().filter_map(from_osc_type).collect();
            inbound.send(Message::new(
                Protocol::Osc,
                PortSpec::Number(peer_port),
                msg.addr.clone(),
                args,
            ))
        }
        OscPacket::Bundle(bundle) => {
            for inner in &bundle.content {
                forward_packet(inner, peer_port, inbound)?;
            }
            Ok(())
        }
    }
}
