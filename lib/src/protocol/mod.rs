//! The peer-to-peer packet codec and its supporting pieces.
//!
//! Packets travel as opaque payload frames through the relay. The
//! encoding is a single type tag followed by a type-specific body;
//! integers are big-endian, variable-length fields use unsigned LEB128.
//! Decoding is total: callers get a complete packet or an error, never
//! a partial read.
use crate::errors::CaesarError;

pub mod control;
pub mod crypto;
mod varint;

pub use crypto::{ChunkCipher, KeyExchange, NonceSequence};
use varint::{read_uvarint, write_uvarint};

#[cfg(test)]
mod tests;

/// Version spoken by this build.
pub const PROTOCOL_VERSION: u16 = 1;

const TAG_HANDSHAKE: u8 = 1;
const TAG_HANDSHAKE_RESPONSE: u8 = 2;
const TAG_LIST: u8 = 3;
const TAG_APPROVE: u8 = 4;
const TAG_ABORT: u8 = 5;
const TAG_CHUNK: u8 = 6;
const TAG_FILE_END: u8 = 7;
const TAG_TRANSFER_END: u8 = 8;
const TAG_ACK: u8 = 9;
const TAG_PROGRESS: u8 = 10;

/// Metadata for one file offered by the sender. The index of an entry
/// is its position in the announced list.
#[derive(PartialEq, Debug, Clone)]
pub struct FileEntry {
    /// Base name only; the receiver refuses anything path-like.
    pub name: String,
    /// Size in bytes. Zero is legal and produces no chunks.
    pub size: u64,
}

/// Every message the two peers exchange end-to-end.
#[derive(PartialEq, Debug, Clone)]
pub enum Packet {
    Handshake {
        version: u16,
        session_seed: [u8; crypto::SEED_SIZE],
    },
    HandshakeResponse {
        accepted_version: u16,
    },
    List(Vec<FileEntry>),
    Approve,
    Abort {
        reason: String,
    },
    Chunk {
        file_index: u64,
        offset: u64,
        cipher: Vec<u8>,
        tag: [u8; crypto::TAG_SIZE],
    },
    FileEnd {
        file_index: u64,
        file_hash: [u8; 32],
    },
    TransferEnd,
    Ack {
        file_index: u64,
    },
    Progress {
        file_index: u64,
        bytes_done: u64,
        bytes_total: u64,
    },
}

impl Packet {
    /// Serialize into a payload frame body.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_hint());
        match self {
            Packet::Handshake {
                version,
                session_seed,
            } => {
                buf.push(TAG_HANDSHAKE);
                buf.extend_from_slice(&version.to_be_bytes());
                buf.extend_from_slice(session_seed);
            }
            Packet::HandshakeResponse { accepted_version } => {
                buf.push(TAG_HANDSHAKE_RESPONSE);
                buf.extend_from_slice(&accepted_version.to_be_bytes());
            }
            Packet::List(entries) => {
                buf.push(TAG_LIST);
                write_uvarint(&mut buf, entries.len() as u64);
                for entry in entries {
                    write_uvarint(&mut buf, entry.name.len() as u64);
                    buf.extend_from_slice(entry.name.as_bytes());
                    buf.extend_from_slice(&entry.size.to_be_bytes());
                }
            }
            Packet::Approve => buf.push(TAG_APPROVE),
            Packet::Abort { reason } => {
                buf.push(TAG_ABORT);
                write_uvarint(&mut buf, reason.len() as u64);
                buf.extend_from_slice(reason.as_bytes());
            }
            Packet::Chunk {
                file_index,
                offset,
                cipher,
                tag,
            } => {
                buf.push(TAG_CHUNK);
                write_uvarint(&mut buf, *file_index);
                buf.extend_from_slice(&offset.to_be_bytes());
                write_uvarint(&mut buf, cipher.len() as u64);
                buf.extend_from_slice(cipher);
                buf.extend_from_slice(tag);
            }
            Packet::FileEnd {
                file_index,
                file_hash,
            } => {
                buf.push(TAG_FILE_END);
                write_uvarint(&mut buf, *file_index);
                buf.extend_from_slice(file_hash);
            }
            Packet::TransferEnd => buf.push(TAG_TRANSFER_END),
            Packet::Ack { file_index } => {
                buf.push(TAG_ACK);
                write_uvarint(&mut buf, *file_index);
            }
            Packet::Progress {
                file_index,
                bytes_done,
                bytes_total,
            } => {
                buf.push(TAG_PROGRESS);
                write_uvarint(&mut buf, *file_index);
                buf.extend_from_slice(&bytes_done.to_be_bytes());
                buf.extend_from_slice(&bytes_total.to_be_bytes());
            }
        }
        buf
    }

    /// Parse a complete payload frame body. Unknown tags, truncated
    /// bodies and trailing garbage all fail with `MalformedFrame`.
    pub fn decode(body: &[u8]) -> Result<Packet, CaesarError> {
        let mut r = Reader::new(body);
        let packet = match r.u8()? {
            TAG_HANDSHAKE => Packet::Handshake {
                version: r.u16_be()?,
                session_seed: r.array32()?,
            },
            TAG_HANDSHAKE_RESPONSE => Packet::HandshakeResponse {
                accepted_version: r.u16_be()?,
            },
            TAG_LIST => {
                let count = r.uvarint()?;
                if count > MAX_LIST_ENTRIES {
                    return Err(CaesarError::MalformedFrame);
                }
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let name_len = r.uvarint()? as usize;
                    let name = String::from_utf8(r.bytes(name_len)?.to_vec())
                        .map_err(|_| CaesarError::MalformedFrame)?;
                    let size = r.u64_be()?;
                    entries.push(FileEntry { name, size });
                }
                Packet::List(entries)
            }
            TAG_APPROVE => Packet::Approve,
            TAG_ABORT => {
                let len = r.uvarint()? as usize;
                let reason = String::from_utf8(r.bytes(len)?.to_vec())
                    .map_err(|_| CaesarError::MalformedFrame)?;
                Packet::Abort { reason }
            }
            TAG_CHUNK => {
                let file_index = r.uvarint()?;
                let offset = r.u64_be()?;
                let cipher_len = r.uvarint()? as usize;
                let cipher = r.bytes(cipher_len)?.to_vec();
                let tag = r.array16()?;
                Packet::Chunk {
                    file_index,
                    offset,
                    cipher,
                    tag,
                }
            }
            TAG_FILE_END => Packet::FileEnd {
                file_index: r.uvarint()?,
                file_hash: r.array32()?,
            },
            TAG_TRANSFER_END => Packet::TransferEnd,
            TAG_ACK => Packet::Ack {
                file_index: r.uvarint()?,
            },
            TAG_PROGRESS => Packet::Progress {
                file_index: r.uvarint()?,
                bytes_done: r.u64_be()?,
                bytes_total: r.u64_be()?,
            },
            _ => return Err(CaesarError::MalformedFrame),
        };
        r.finish()?;
        Ok(packet)
    }

    /// A short name for phase errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Handshake { .. } => "handshake",
            Packet::HandshakeResponse { .. } => "handshake-response",
            Packet::List(_) => "list",
            Packet::Approve => "approve",
            Packet::Abort { .. } => "abort",
            Packet::Chunk { .. } => "chunk",
            Packet::FileEnd { .. } => "file-end",
            Packet::TransferEnd => "transfer-end",
            Packet::Ack { .. } => "ack",
            Packet::Progress { .. } => "progress",
        }
    }

    fn encoded_hint(&self) -> usize {
        match self {
            Packet::Chunk { cipher, .. } => cipher.len() + 32,
            Packet::List(entries) => entries.len() * 32 + 8,
            _ => 64,
        }
    }
}

/// Sanity bound on announced list entries; a frame this size would be
/// rejected by the transport ceiling anyway.
const MAX_LIST_ENTRIES: u64 = 1 << 20;

/// Bounds-checked sequential reader over a frame body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, CaesarError> {
        let b = *self.buf.get(self.pos).ok_or(CaesarError::MalformedFrame)?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], CaesarError> {
        let end = self.pos.checked_add(len).ok_or(CaesarError::MalformedFrame)?;
        let slice = self.buf.get(self.pos..end).ok_or(CaesarError::MalformedFrame)?;
        self.pos = end;
        Ok(slice)
    }

    fn u16_be(&mut self) -> Result<u16, CaesarError> {
        let mut b = [0u8; 2];
        b.copy_from_slice(self.bytes(2)?);
        Ok(u16::from_be_bytes(b))
    }

    fn u64_be(&mut self) -> Result<u64, CaesarError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_be_bytes(b))
    }

    fn array16(&mut self) -> Result<[u8; 16], CaesarError> {
        let mut b = [0u8; 16];
        b.copy_from_slice(self.bytes(16)?);
        Ok(b)
    }

    fn array32(&mut self) -> Result<[u8; 32], CaesarError> {
        let mut b = [0u8; 32];
        b.copy_from_slice(self.bytes(32)?);
        Ok(b)
    }

    fn uvarint(&mut self) -> Result<u64, CaesarError> {
        read_uvarint(self.buf, &mut self.pos)
    }

    /// Reject trailing bytes so decoding stays total.
    fn finish(self) -> Result<(), CaesarError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(CaesarError::MalformedFrame)
        }
    }
}
