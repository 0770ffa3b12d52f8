//! Plumbing shared by the sender and receiver sessions: the rendezvous
//! join, packet transport over payload frames, and the key agreement
//! both sides run once paired.
use crate::errors::CaesarError;
use crate::protocol::control::{ControlMessage, Role};
use crate::protocol::crypto::{self, KeyExchange};
use crate::protocol::Packet;
use crate::transport::{self, Frame, Transport};
use std::time::Duration;

/// Deadline for the relay to acknowledge a join.
pub(crate) const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline covering pairing and key agreement.
pub(crate) const PAIRING_TIMEOUT: Duration = Duration::from_secs(30);

/// Inter-packet liveness deadline once the transfer is underway.
pub(crate) const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// Ceiling on unacknowledged bytes in flight from the sender.
pub(crate) const CREDIT_WINDOW: u64 = 4 * 1024 * 1024;

/// Announce ourselves to the relay and wait for its verdict.
pub(crate) fn join<T: Transport>(
    stream: &mut T,
    role: Role,
    name: &str,
) -> Result<(), CaesarError> {
    stream.set_read_timeout(Some(JOIN_TIMEOUT))?;
    let msg = ControlMessage::Join {
        role,
        name: name.to_string(),
    };
    transport::write_frame(stream, &Frame::Control(msg.encode()?))?;

    match transport::read_frame(stream)? {
        Frame::Control(body) => match ControlMessage::decode(&body)? {
            ControlMessage::JoinAck { status } => status.into_result(),
            ControlMessage::Leave => Err(CaesarError::TransportClosed),
            _ => Err(CaesarError::BadRequest),
        },
        Frame::Payload(_) => Err(CaesarError::BadRequest),
    }
}

/// Send one peer packet as an opaque payload frame.
pub(crate) fn send_packet<T: Transport>(
    stream: &mut T,
    packet: &Packet,
) -> Result<(), CaesarError> {
    transport::write_frame(stream, &Frame::Payload(packet.encode()))
}

/// Receive the next peer packet. A relay `Leave` means the partner is
/// gone and surfaces as `TransportClosed`; any other control frame
/// after pairing is a protocol violation.
pub(crate) fn recv_packet<T: Transport>(stream: &mut T) -> Result<Packet, CaesarError> {
    match transport::read_frame(stream)? {
        Frame::Payload(body) => Packet::decode(&body),
        Frame::Control(body) => match ControlMessage::decode(&body)? {
            ControlMessage::Leave => Err(CaesarError::TransportClosed),
            _ => Err(CaesarError::MalformedFrame),
        },
    }
}

/// Receive one opaque payload frame without interpreting it, for the
/// raw key agreement messages.
fn recv_raw<T: Transport>(stream: &mut T) -> Result<Vec<u8>, CaesarError> {
    match transport::read_frame(stream)? {
        Frame::Payload(body) => Ok(body),
        Frame::Control(body) => match ControlMessage::decode(&body)? {
            ControlMessage::Leave => Err(CaesarError::TransportClosed),
            _ => Err(CaesarError::MalformedFrame),
        },
    }
}

/// Run the SPAKE2 exchange and key confirmation from either role.
/// Returns the session key both sides now share. Mismatched transfer
/// names surface here as `KeyMismatch` when confirmation tags disagree.
pub(crate) fn establish_key<T: Transport>(
    stream: &mut T,
    name: &str,
    role: Role,
) -> Result<Vec<u8>, CaesarError> {
    let mut exchange = KeyExchange::start(name);
    transport::write_frame(stream, &Frame::Payload(exchange.outbound_msg().to_vec()))?;
    let peer_msg = recv_raw(stream)?;
    let key = exchange.finish(&peer_msg)?;

    let (sender_tag, receiver_tag) = crypto::confirmation_tags(&key, name)?;
    let (ours, theirs) = match role {
        Role::Sender => (sender_tag, receiver_tag),
        Role::Receiver => (receiver_tag, sender_tag),
    };

    transport::write_frame(stream, &Frame::Payload(ours.to_vec()))?;
    let peer_tag = recv_raw(stream)?;
    if peer_tag != theirs {
        return Err(CaesarError::KeyMismatch);
    }

    log::debug!("[{:.6}] session key confirmed as {}", name, role);
    Ok(key)
}

/// Best-effort abort notification toward the peer. Failures are
/// swallowed; the session is already dying.
pub(crate) fn abort<T: Transport>(stream: &mut T, error: &CaesarError) {
    let packet = Packet::Abort {
        reason: error.to_string(),
    };
    let _ = send_packet(stream, &packet);
}
