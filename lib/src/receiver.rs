//! The receiving side of a transfer session.
//!
//! The receiver joins an existing room by name, runs the key agreement
//! as responder, validates and approves the announced list, then
//! decrypts chunks in arrival order into `.part` staging files that are
//! only renamed into place once their size and hash check out. On any
//! fatal error the staging file is removed (or kept, if the session was
//! built with `keep_partial`), so the destination never holds an
//! unverified file under its final name.
use crate::config::CaesarConfig;
use crate::errors::CaesarError;
use crate::protocol::control::Role;
use crate::protocol::crypto::{self, ChunkCipher, NonceSequence};
use crate::protocol::{FileEntry, Packet};
use crate::session::{self, PAIRING_TIMEOUT, TRANSFER_TIMEOUT};
use crate::transport::{self, Transport};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::net::TcpStream;
use std::path::PathBuf;

/// None constant for the optional list-approval callback.
pub const NO_VERIFY_CALLBACK: Option<fn(&[FileEntry]) -> bool> =
    None::<fn(&[FileEntry]) -> bool>;

/// A receiver session. One instance drives one transfer end-to-end.
#[derive(Debug)]
pub struct Receiver {
    config: CaesarConfig,
    name: String,
    keep_partial: bool,
}

impl Receiver {
    /// Create a session for the given transfer name, writing into
    /// `config.destination_dir`.
    pub fn new(config: CaesarConfig, name: String) -> Result<Receiver, CaesarError> {
        config.validate()?;
        Ok(Receiver {
            config,
            name,
            keep_partial: false,
        })
    }

    /// Keep `.part` staging files around after a failed session instead
    /// of deleting them. Off by default.
    pub fn keep_partial(mut self, keep: bool) -> Receiver {
        self.keep_partial = keep;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dial the relay and join the room. Fails immediately with
    /// `NoSuchTransfer` when no sender announced this name.
    pub fn connect(&self) -> Result<TcpStream, CaesarError> {
        let mut stream = transport::connect(&self.config.relay_url)?;
        self.join(&mut stream)?;
        log::info!("[{:.6}] joined transfer", self.name);
        Ok(stream)
    }

    /// Join on an already-connected stream.
    pub fn join<T: Transport>(&self, stream: &mut T) -> Result<(), CaesarError> {
        session::join(stream, Role::Receiver, &self.name)
    }

    /// Run the session: key agreement, list approval, chunked receive,
    /// verification. Returns the final paths of every completed file.
    /// `verify` may reject the announced list; `progress` observes
    /// `(file_index, bytes_done, bytes_total)` after every chunk.
    pub fn transfer<T, V, D>(
        &self,
        stream: &mut T,
        verify: Option<V>,
        progress: Option<D>,
    ) -> Result<Vec<PathBuf>, CaesarError>
    where
        T: Transport,
        V: Fn(&[FileEntry]) -> bool,
        D: Fn(usize, u64, u64),
    {
        let mut sink: Option<FileSink> = None;
        match self.run(stream, verify, progress, &mut sink) {
            Ok(paths) => Ok(paths),
            Err(e) => {
                if let Some(open) = sink.take() {
                    open.discard(self.keep_partial);
                }
                session::abort(stream, &e);
                Err(e)
            }
        }
    }

    fn run<T, V, D>(
        &self,
        stream: &mut T,
        verify: Option<V>,
        progress: Option<D>,
        sink: &mut Option<FileSink>,
    ) -> Result<Vec<PathBuf>, CaesarError>
    where
        T: Transport,
        V: Fn(&[FileEntry]) -> bool,
        D: Fn(usize, u64, u64),
    {
        stream.set_read_timeout(Some(PAIRING_TIMEOUT))?;
        let key = session::establish_key(stream, &self.name, Role::Receiver)?;
        let cipher = ChunkCipher::new(&key)?;

        let (version, seed) = match session::recv_packet(stream)? {
            Packet::Handshake {
                version,
                session_seed,
            } => (version, session_seed),
            Packet::Abort { reason } => return Err(CaesarError::SessionAborted(reason)),
            other => return Err(CaesarError::UnexpectedPacket(other.kind())),
        };
        if version != self.config.protocol_version {
            return Err(CaesarError::UnknownVersion(version));
        }
        let mut nseq = NonceSequence::from_seed(&seed);
        session::send_packet(
            stream,
            &Packet::HandshakeResponse {
                accepted_version: version,
            },
        )?;

        let entries = match session::recv_packet(stream)? {
            Packet::List(entries) => entries,
            Packet::Abort { reason } => return Err(CaesarError::SessionAborted(reason)),
            other => return Err(CaesarError::UnexpectedPacket(other.kind())),
        };
        self.validate_list(&entries)?;
        if !verify.as_ref().map_or(true, |v| v(&entries)) {
            return Err(CaesarError::Cancelled);
        }
        session::send_packet(stream, &Packet::Approve)?;
        log::debug!("[{:.6}] approved {} file(s)", self.name, entries.len());

        stream.set_read_timeout(Some(TRANSFER_TIMEOUT))?;
        let mut completed = Vec::with_capacity(entries.len());
        let mut next_index = 0usize;
        loop {
            match session::recv_packet(stream)? {
                Packet::Chunk {
                    file_index,
                    offset,
                    cipher: mut data,
                    tag,
                } => {
                    let index = file_index as usize;
                    if sink.is_none() {
                        if index != next_index || index >= entries.len() {
                            return Err(CaesarError::OutOfOrderChunk { file_index, offset });
                        }
                        *sink = Some(FileSink::open(&self.config, &entries[index], index)?);
                    }
                    let open = match sink.as_mut() {
                        Some(open) => open,
                        None => return Err(CaesarError::OutOfOrderChunk { file_index, offset }),
                    };
                    // Chunks must stay within one file and arrive
                    // gap-free in ascending offset order.
                    if index != open.index || offset != open.written {
                        return Err(CaesarError::OutOfOrderChunk { file_index, offset });
                    }
                    cipher.open(&mut nseq, &mut data, &tag)?;
                    open.write(&data)?;
                    session::send_packet(
                        stream,
                        &Packet::Progress {
                            file_index,
                            bytes_done: open.written,
                            bytes_total: open.size,
                        },
                    )?;
                    if let Some(cb) = progress.as_ref() {
                        cb(index, open.written, open.size);
                    }
                }
                Packet::FileEnd {
                    file_index,
                    file_hash,
                } => {
                    let index = file_index as usize;
                    if sink.is_none() {
                        // A zero-length file arrives as a bare FileEnd.
                        if index != next_index || index >= entries.len() {
                            return Err(CaesarError::UnexpectedPacket("file-end"));
                        }
                        *sink = Some(FileSink::open(&self.config, &entries[index], index)?);
                    }
                    let open = match sink.take() {
                        Some(open) if open.index == index => open,
                        _ => return Err(CaesarError::UnexpectedPacket("file-end")),
                    };
                    let path = open.finish(&self.config, &file_hash, self.keep_partial)?;
                    log::debug!(
                        "[{:.6}] completed {:?} ({} bytes)",
                        self.name,
                        entries[index].name,
                        entries[index].size
                    );
                    completed.push(path);
                    next_index += 1;
                    session::send_packet(stream, &Packet::Ack { file_index })?;
                }
                Packet::TransferEnd => {
                    if next_index != entries.len() || sink.is_some() {
                        return Err(CaesarError::UnexpectedPacket("transfer-end"));
                    }
                    session::send_packet(
                        stream,
                        &Packet::Ack {
                            file_index: entries.len() as u64,
                        },
                    )?;
                    log::info!(
                        "[{:.6}] transfer complete: {} file(s)",
                        self.name,
                        completed.len()
                    );
                    return Ok(completed);
                }
                Packet::Progress { .. } => {}
                Packet::Abort { reason } => return Err(CaesarError::SessionAborted(reason)),
                other => return Err(CaesarError::UnexpectedPacket(other.kind())),
            }
        }
    }

    /// Refuse unsafe names, duplicate targets, oversized transfers and
    /// destination clashes before anything touches the disk.
    fn validate_list(&self, entries: &[FileEntry]) -> Result<(), CaesarError> {
        let mut total: u64 = 0;
        let mut seen = HashSet::new();
        for entry in entries {
            if !safe_file_name(&entry.name) {
                return Err(CaesarError::BadFileName(entry.name.clone()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(CaesarError::DestinationConflict(entry.name.clone()));
            }
            total = total
                .checked_add(entry.size)
                .ok_or(CaesarError::ListTooLarge(u64::MAX))?;
        }
        if total > self.config.max_list_bytes {
            return Err(CaesarError::ListTooLarge(total));
        }
        if !self.config.overwrite {
            for entry in entries {
                if self.config.destination_dir.join(&entry.name).exists() {
                    return Err(CaesarError::DestinationConflict(entry.name.clone()));
                }
            }
        }
        Ok(())
    }
}

/// A file's base name as announced by the sender must not be able to
/// escape the destination directory.
fn safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// One in-flight destination file, staged under a `.part` suffix until
/// its contents verify.
struct FileSink {
    index: usize,
    size: u64,
    written: u64,
    hasher: Sha256,
    file: File,
    part_path: PathBuf,
    final_path: PathBuf,
}

impl FileSink {
    fn open(config: &CaesarConfig, entry: &FileEntry, index: usize) -> Result<Self, CaesarError> {
        let final_path = config.destination_dir.join(&entry.name);
        let part_path = config.destination_dir.join(format!("{}.part", entry.name));
        if final_path.exists() && !config.overwrite {
            return Err(CaesarError::DestinationConflict(entry.name.clone()));
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part_path)
            .map_err(CaesarError::WriteFailed)?;
        Ok(Self {
            index,
            size: entry.size,
            written: 0,
            hasher: Sha256::new(),
            file,
            part_path,
            final_path,
        })
    }

    fn write(&mut self, data: &[u8]) -> Result<(), CaesarError> {
        self.file.write_all(data).map_err(CaesarError::WriteFailed)?;
        self.hasher.update(data);
        self.written += data.len() as u64;
        Ok(())
    }

    /// Verify and commit the staged file; on failure the staging file
    /// is cleaned up here before the error propagates.
    fn finish(
        mut self,
        config: &CaesarConfig,
        expected_hash: &[u8; 32],
        keep_partial: bool,
    ) -> Result<PathBuf, CaesarError> {
        match self.verify_and_commit(config, expected_hash) {
            Ok(path) => Ok(path),
            Err(e) => {
                self.discard(keep_partial);
                Err(e)
            }
        }
    }

    fn verify_and_commit(
        &mut self,
        config: &CaesarConfig,
        expected_hash: &[u8; 32],
    ) -> Result<PathBuf, CaesarError> {
        self.file.sync_all().map_err(CaesarError::WriteFailed)?;
        if self.written != self.size {
            return Err(CaesarError::SizeMismatch {
                expected: self.size,
                actual: self.written,
            });
        }
        let actual =
            crypto::file_digest(std::mem::replace(&mut self.hasher, Sha256::new()));
        if &actual != expected_hash {
            return Err(CaesarError::HashMismatch {
                expected: hex::encode(expected_hash),
                actual: hex::encode(actual),
            });
        }
        if self.final_path.exists() && !config.overwrite {
            return Err(CaesarError::DestinationConflict(
                self.final_path.display().to_string(),
            ));
        }
        fs::rename(&self.part_path, &self.final_path).map_err(CaesarError::WriteFailed)?;
        Ok(self.final_path.clone())
    }

    /// Drop the staging file after a failure.
    fn discard(self, keep_partial: bool) {
        let FileSink {
            file, part_path, ..
        } = self;
        drop(file);
        if !keep_partial {
            let _ = fs::remove_file(&part_path);
        }
    }
}
