//! Message framing over an arbitrary byte stream.
//!
//! The relay protocol assumes a transport that delivers ordered,
//! length-preserved binary messages and surfaces close events. This
//! module provides that over anything implementing `Read + Write`:
//!
//! ```text
//! frame := u32_be total_len || u8 kind || body
//! ```
//!
//! `kind` distinguishes textual control records (rendezvous traffic,
//! terminated by the relay) from opaque payloads (peer-to-peer traffic,
//! forwarded verbatim).
use crate::errors::CaesarError;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Ceiling on a single frame body. Anything larger is malformed.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const KIND_CONTROL: u8 = 0;
const KIND_PAYLOAD: u8 = 1;

/// One transport message, as delivered to or accepted from a peer.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Frame {
    /// A textual rendezvous record, parsed by the relay.
    Control(Vec<u8>),
    /// An opaque peer-to-peer payload, never parsed by the relay.
    Payload(Vec<u8>),
}

impl Frame {
    fn kind(&self) -> u8 {
        match self {
            Frame::Control(_) => KIND_CONTROL,
            Frame::Payload(_) => KIND_PAYLOAD,
        }
    }

    fn body(&self) -> &[u8] {
        match self {
            Frame::Control(b) | Frame::Payload(b) => b,
        }
    }
}

/// The seam between sessions and the byte stream carrying them. The
/// read-timeout hook lets sessions arm the join/pairing/liveness
/// deadlines on real sockets while in-memory test streams ignore it.
pub trait Transport: Read + Write {
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> Result<(), CaesarError> {
        let _ = dur;
        Ok(())
    }
}

impl Transport for TcpStream {
    fn set_read_timeout(&mut self, dur: Option<Duration>) -> Result<(), CaesarError> {
        TcpStream::set_read_timeout(self, dur).map_err(CaesarError::from)
    }
}

/// Dial the relay. `relay_url` is `host:port`.
pub fn connect(relay_url: &str) -> Result<TcpStream, CaesarError> {
    let addr = relay_url
        .to_socket_addrs()
        .map_err(|_| CaesarError::ConnectFailed(relay_url.to_string()))?
        .next()
        .ok_or_else(|| CaesarError::ConnectFailed(relay_url.to_string()))?;
    TcpStream::connect_timeout(&addr, Duration::from_secs(10))
        .map_err(|_| CaesarError::ConnectFailed(relay_url.to_string()))
}

/// Write one frame and flush it.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, frame: &Frame) -> Result<(), CaesarError> {
    let body = frame.body();
    if body.len() > MAX_FRAME_SIZE {
        return Err(CaesarError::MalformedFrame);
    }
    let total = (body.len() + 1) as u32;
    writer.write_all(&total.to_be_bytes())?;
    writer.write_all(&[frame.kind()])?;
    writer.write_all(body)?;
    writer.flush()?;
    Ok(())
}

/// Read one complete frame.
///
/// Decoding is total: the caller either gets a whole frame or an error.
/// EOF on a frame boundary is a clean close; EOF inside a frame is
/// malformed. A read timeout armed via [`Transport::set_read_timeout`]
/// surfaces as [`CaesarError::Timeout`].
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Frame, CaesarError> {
    let mut header = [0u8; 4];
    fill(reader, &mut header, true)?;
    let total = u32::from_be_bytes(header) as usize;
    if total == 0 || total - 1 > MAX_FRAME_SIZE {
        return Err(CaesarError::MalformedFrame);
    }

    let mut kind = [0u8; 1];
    fill(reader, &mut kind, false)?;
    let mut body = vec![0u8; total - 1];
    fill(reader, &mut body, false)?;

    match kind[0] {
        KIND_CONTROL => Ok(Frame::Control(body)),
        KIND_PAYLOAD => Ok(Frame::Payload(body)),
        _ => Err(CaesarError::MalformedFrame),
    }
}

/// Fill `buf` completely. `at_boundary` selects how EOF on the very
/// first byte is reported.
fn fill<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    at_boundary: bool,
) -> Result<(), CaesarError> {
    let mut pos = 0;
    while pos < buf.len() {
        match reader.read(&mut buf[pos..]) {
            Ok(0) if pos == 0 && at_boundary => return Err(CaesarError::TransportClosed),
            Ok(0) => return Err(CaesarError::MalformedFrame),
            Ok(n) => pos += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(ref e)
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
            {
                return Err(CaesarError::Timeout)
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
