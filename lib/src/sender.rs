//! The sending side of a transfer session.
//!
//! The sender creates the room, waits to be paired, runs the key
//! agreement as initiator, announces its file list, then streams each
//! file as encrypted chunks with credit-based backpressure against the
//! receiver's progress reports.
use crate::config::CaesarConfig;
use crate::errors::CaesarError;
use crate::name;
use crate::protocol::control::{ControlMessage, Role};
use crate::protocol::crypto::{self, ChunkCipher, NonceSequence};
use crate::protocol::{FileEntry, Packet};
use crate::session::{self, CREDIT_WINDOW, PAIRING_TIMEOUT, TRANSFER_TIMEOUT};
use crate::transport::{self, Frame, Transport};
use memmap::MmapOptions;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::net::TcpStream;
use std::path::{Path, PathBuf};

/// None constant for the optional progress callback.
pub const NO_PROGRESS_CALLBACK: Option<fn(usize, u64, u64)> = None::<fn(usize, u64, u64)>;

/// Name allocation attempts before giving up.
const MAX_NAME_ATTEMPTS: usize = 8;

/// What a completed session moved.
#[derive(PartialEq, Debug, Default, Clone)]
pub struct TransferSummary {
    pub files_sent: usize,
    pub bytes_sent: u64,
    pub chunks_sent: u64,
}

/// A sender session. One instance drives one transfer end-to-end.
#[derive(Debug)]
pub struct Sender {
    config: CaesarConfig,
    name: String,
    generated: bool,
}

impl Sender {
    /// Create a session. When `name` is `None` a mnemonic transfer name
    /// is generated; share it with the receiver out-of-band.
    pub fn new(config: CaesarConfig, name: Option<String>) -> Result<Sender, CaesarError> {
        config.validate()?;
        let (name, generated) = match name {
            Some(n) => (n, false),
            None => (name::gen_name(name::DEFAULT_WORDS), true),
        };
        Ok(Sender {
            config,
            name,
            generated,
        })
    }

    /// The transfer name the receiver must join with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dial the relay and announce the transfer name. Generated names
    /// are regenerated and retried on a clash, up to [`MAX_NAME_ATTEMPTS`];
    /// a caller-supplied name is attempted exactly once.
    pub fn connect(&mut self) -> Result<TcpStream, CaesarError> {
        let attempts = if self.generated { MAX_NAME_ATTEMPTS } else { 1 };
        for attempt in 0..attempts {
            if attempt > 0 {
                self.name = name::gen_name(name::DEFAULT_WORDS);
            }
            let mut stream = transport::connect(&self.config.relay_url)?;
            match self.join(&mut stream) {
                Ok(()) => {
                    log::info!("[{:.6}] announced transfer", self.name);
                    return Ok(stream);
                }
                Err(CaesarError::NameInUse) if self.generated => {
                    log::debug!("[{:.6}] name in use, regenerating", self.name);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(CaesarError::NameAllocationFailed)
    }

    /// Announce the transfer on an already-connected stream.
    pub fn join<T: Transport>(&self, stream: &mut T) -> Result<(), CaesarError> {
        session::join(stream, Role::Sender, &self.name)
    }

    /// Run the session: wait for pairing, agree on a key, offer
    /// `files`, stream them, and confirm completion. The progress
    /// callback observes `(file_index, bytes_done, bytes_total)` after
    /// every chunk. Any error is fatal; an `Abort` is sent best-effort
    /// before it is returned.
    pub fn transfer<T, D>(
        &mut self,
        stream: &mut T,
        files: &[PathBuf],
        progress: Option<D>,
    ) -> Result<TransferSummary, CaesarError>
    where
        T: Transport,
        D: Fn(usize, u64, u64),
    {
        match self.run(stream, files, progress) {
            Ok(summary) => Ok(summary),
            Err(e) => {
                session::abort(stream, &e);
                Err(e)
            }
        }
    }

    fn run<T, D>(
        &mut self,
        stream: &mut T,
        files: &[PathBuf],
        progress: Option<D>,
    ) -> Result<TransferSummary, CaesarError>
    where
        T: Transport,
        D: Fn(usize, u64, u64),
    {
        stream.set_read_timeout(Some(PAIRING_TIMEOUT))?;
        self.await_paired(stream)?;
        log::debug!("[{:.6}] paired with receiver", self.name);

        let key = session::establish_key(stream, &self.name, Role::Sender)?;
        let cipher = ChunkCipher::new(&key)?;

        // Fresh nonce seed per session; the receiver mirrors it.
        let session_seed: [u8; crypto::SEED_SIZE] = rand::thread_rng().gen();
        let mut nseq = NonceSequence::from_seed(&session_seed);
        session::send_packet(
            stream,
            &Packet::Handshake {
                version: self.config.protocol_version,
                session_seed,
            },
        )?;
        match session::recv_packet(stream)? {
            Packet::HandshakeResponse { accepted_version }
                if accepted_version == self.config.protocol_version => {}
            Packet::HandshakeResponse { accepted_version } => {
                return Err(CaesarError::UnknownVersion(accepted_version))
            }
            Packet::Abort { reason } => return Err(CaesarError::SessionAborted(reason)),
            other => return Err(CaesarError::UnexpectedPacket(other.kind())),
        }

        let entries = build_entries(files)?;
        session::send_packet(stream, &Packet::List(entries.clone()))?;

        stream.set_read_timeout(Some(TRANSFER_TIMEOUT))?;
        match session::recv_packet(stream)? {
            Packet::Approve => {}
            Packet::Abort { reason } => return Err(CaesarError::SessionAborted(reason)),
            other => return Err(CaesarError::UnexpectedPacket(other.kind())),
        }
        log::debug!(
            "[{:.6}] receiver approved {} file(s)",
            self.name,
            entries.len()
        );

        let mut summary = TransferSummary::default();
        let mut credit = Credit::new(entries.len());
        for (index, (path, entry)) in files.iter().zip(entries.iter()).enumerate() {
            self.send_file(
                stream,
                &cipher,
                &mut nseq,
                index,
                path,
                entry,
                &mut credit,
                &progress,
                &mut summary,
            )?;
        }

        session::send_packet(stream, &Packet::TransferEnd)?;
        self.await_ack(stream, entries.len() as u64, &mut credit)?;
        log::info!(
            "[{:.6}] transfer complete: {} file(s), {} bytes",
            self.name,
            summary.files_sent,
            summary.bytes_sent
        );
        Ok(summary)
    }

    /// The relay pings the sender with `Paired` once the receiver joins.
    fn await_paired<T: Transport>(&self, stream: &mut T) -> Result<(), CaesarError> {
        match transport::read_frame(stream)? {
            Frame::Control(body) => match ControlMessage::decode(&body)? {
                ControlMessage::Paired => Ok(()),
                ControlMessage::Leave => Err(CaesarError::TransportClosed),
                _ => Err(CaesarError::BadRequest),
            },
            Frame::Payload(_) => Err(CaesarError::UnexpectedPacket("paired")),
        }
    }

    fn send_file<T, D>(
        &self,
        stream: &mut T,
        cipher: &ChunkCipher,
        nseq: &mut NonceSequence,
        index: usize,
        path: &Path,
        entry: &FileEntry,
        credit: &mut Credit,
        progress: &Option<D>,
        summary: &mut TransferSummary,
    ) -> Result<(), CaesarError>
    where
        T: Transport,
        D: Fn(usize, u64, u64),
    {
        let mut hasher = Sha256::new();
        let mut offset: u64 = 0;

        // Zero-length files produce no chunks, only a FileEnd.
        if entry.size > 0 {
            let file = File::open(path)?;
            let mut mmap = unsafe { MmapOptions::new().map_copy(&file)? };
            for chunk in mmap[..].chunks_mut(self.config.chunk_size) {
                hasher.update(&chunk[..]);
                let tag = cipher.seal(nseq, chunk)?;
                let len = chunk.len() as u64;
                session::send_packet(
                    stream,
                    &Packet::Chunk {
                        file_index: index as u64,
                        offset,
                        cipher: chunk.to_vec(),
                        tag,
                    },
                )?;
                offset += len;
                credit.sent(len);
                summary.chunks_sent += 1;
                summary.bytes_sent += len;
                if let Some(cb) = progress.as_ref() {
                    cb(index, offset, entry.size);
                }

                // Backpressure: block on receiver progress once too
                // many bytes are unacknowledged.
                while credit.outstanding() > CREDIT_WINDOW {
                    self.consume_inbound(stream, credit)?;
                }
            }
        }

        if offset != entry.size {
            return Err(CaesarError::SizeMismatch {
                expected: entry.size,
                actual: offset,
            });
        }

        session::send_packet(
            stream,
            &Packet::FileEnd {
                file_index: index as u64,
                file_hash: crypto::file_digest(hasher),
            },
        )?;
        self.await_ack(stream, index as u64, credit)?;
        credit.settle(index, entry.size);
        summary.files_sent += 1;
        log::debug!("[{:.6}] sent {:?} ({} bytes)", self.name, entry.name, offset);
        Ok(())
    }

    /// Drain one inbound packet while inside the credit window.
    fn consume_inbound<T: Transport>(
        &self,
        stream: &mut T,
        credit: &mut Credit,
    ) -> Result<(), CaesarError> {
        match session::recv_packet(stream)? {
            Packet::Progress {
                file_index,
                bytes_done,
                ..
            } => {
                credit.progress(file_index as usize, bytes_done);
                Ok(())
            }
            Packet::Abort { reason } => Err(CaesarError::SessionAborted(reason)),
            other => Err(CaesarError::UnexpectedPacket(other.kind())),
        }
    }

    /// Wait for a specific `Ack`, absorbing progress reports that cross
    /// it on the wire.
    fn await_ack<T: Transport>(
        &self,
        stream: &mut T,
        want: u64,
        credit: &mut Credit,
    ) -> Result<(), CaesarError> {
        loop {
            match session::recv_packet(stream)? {
                Packet::Ack { file_index } if file_index == want => return Ok(()),
                Packet::Progress {
                    file_index,
                    bytes_done,
                    ..
                } => credit.progress(file_index as usize, bytes_done),
                Packet::Abort { reason } => return Err(CaesarError::SessionAborted(reason)),
                other => return Err(CaesarError::UnexpectedPacket(other.kind())),
            }
        }
    }
}

/// Outstanding-byte accounting for backpressure. Progress reports carry
/// cumulative per-file counts; `outstanding` is what the receiver has
/// not yet confirmed writing.
struct Credit {
    sent_total: u64,
    acked: Vec<u64>,
}

impl Credit {
    fn new(files: usize) -> Self {
        Self {
            sent_total: 0,
            acked: vec![0; files],
        }
    }

    fn sent(&mut self, bytes: u64) {
        self.sent_total += bytes;
    }

    fn progress(&mut self, file_index: usize, bytes_done: u64) {
        if let Some(slot) = self.acked.get_mut(file_index) {
            if bytes_done > *slot {
                *slot = bytes_done;
            }
        }
    }

    /// A file's ack confirms all of it, progress reports aside.
    fn settle(&mut self, file_index: usize, size: u64) {
        self.progress(file_index, size);
    }

    fn outstanding(&self) -> u64 {
        let acked: u64 = self.acked.iter().sum();
        self.sent_total.saturating_sub(acked)
    }
}

/// Strip paths down to announced entries. Anything without a printable
/// base name is refused before the list goes out.
fn build_entries(files: &[PathBuf]) -> Result<Vec<FileEntry>, CaesarError> {
    let mut entries = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CaesarError::BadFileName(path.display().to_string()))?;
        let size = path.metadata()?.len();
        entries.push(FileEntry {
            name: name.to_string(),
            size,
        });
    }
    Ok(entries)
}
