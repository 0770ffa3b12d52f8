//! Key agreement and chunk encryption.
//!
//! The transfer name doubles as the low-entropy secret for a symmetric
//! SPAKE2 exchange; the derived key is confirmed with HKDF-expanded
//! tags before any file data moves. Chunks are sealed in place with
//! ChaCha20Poly1305 under a session-seeded nonce sequence, so neither
//! side ever puts a nonce on the wire.
use crate::errors::CaesarError;

// Key exchange
use sha2::{Digest, Sha256};
use spake2::{Ed25519Group, Identity, Password, Spake2};

// Key confirmation
use hkdf::Hkdf;

// Chunk encryption
use chacha20poly1305::{aead::AeadInPlace, aead::NewAead, ChaCha20Poly1305, Key, Nonce, Tag};

/// ChaCha20Poly1305 key length.
pub const KEY_SIZE: usize = 32;

/// Detached Poly1305 tag length.
pub const TAG_SIZE: usize = 16;

/// 96-bit nonces.
pub const NONCE_SIZE: usize = 12;

/// Length of the session seed carried by the handshake packet.
pub const SEED_SIZE: usize = 32;

/// Length of a key confirmation tag.
pub const CONFIRM_SIZE: usize = 32;

/// One side of the password-authenticated key agreement. Created per
/// session; consumed when the peer's message arrives.
pub struct KeyExchange {
    state: Option<Spake2<Ed25519Group>>,
    outbound: Vec<u8>,
}

impl KeyExchange {
    /// Start the exchange using the transfer name as the shared secret.
    /// Both sides derive the identity from the name, so mismatched
    /// names yield unrelated keys rather than a protocol error.
    pub fn start(name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        let id_bytes = hasher.finalize();

        let (state, outbound) = Spake2::<Ed25519Group>::start_symmetric(
            &Password::new(name.as_bytes()),
            &Identity::new(&id_bytes),
        );

        Self {
            state: Some(state),
            outbound,
        }
    }

    /// The message to hand to the peer, opaque to the relay.
    pub fn outbound_msg(&self) -> &[u8] {
        &self.outbound
    }

    /// Fold in the peer's message and derive the session key. The
    /// SPAKE2 state is consumed; calling this twice is a logic error
    /// reported as `KeyMismatch`.
    pub fn finish(&mut self, peer_msg: &[u8]) -> Result<Vec<u8>, CaesarError> {
        let state = self.state.take().ok_or(CaesarError::KeyMismatch)?;
        state.finish(peer_msg).map_err(|_| CaesarError::KeyMismatch)
    }
}

/// Derive the two key confirmation tags for a session. Each side sends
/// its own role's tag and expects the partner's; an attacker who never
/// learned the name cannot produce either.
pub fn confirmation_tags(
    key: &[u8],
    name: &str,
) -> Result<([u8; CONFIRM_SIZE], [u8; CONFIRM_SIZE]), CaesarError> {
    let h = Hkdf::<Sha256>::new(None, key);
    let mut sender_tag = [0u8; CONFIRM_SIZE];
    let mut receiver_tag = [0u8; CONFIRM_SIZE];
    h.expand(format!("{}-sender-confirm", name).as_bytes(), &mut sender_tag)
        .map_err(|_| CaesarError::KeyMismatch)?;
    h.expand(
        format!("{}-receiver-confirm", name).as_bytes(),
        &mut receiver_tag,
    )
    .map_err(|_| CaesarError::KeyMismatch)?;
    Ok((sender_tag, receiver_tag))
}

/// A session-scoped nonce sequence. Both peers construct the same
/// sequence from the handshake seed and advance it once per chunk, so
/// every nonce is used exactly once under the session key and the
/// receiver's counter doubles as a replay check: any skipped, repeated
/// or reordered chunk fails authentication.
#[derive(PartialEq, Eq, Debug)]
pub struct NonceSequence {
    base: [u8; NONCE_SIZE],
    counter: u64,
}

impl NonceSequence {
    /// Build the sequence from the 32-byte handshake seed.
    pub fn from_seed(seed: &[u8; SEED_SIZE]) -> Self {
        let mut base = [0u8; NONCE_SIZE];
        base.copy_from_slice(&seed[..NONCE_SIZE]);
        Self { base, counter: 0 }
    }

    /// Advance the sequence. The counter is folded into the low eight
    /// bytes of the base, similar to the TLS 1.3 record nonce.
    pub fn next_unique(&mut self) -> Result<[u8; NONCE_SIZE], CaesarError> {
        let current = self.counter;
        self.counter = current.checked_add(1).ok_or(CaesarError::NonceReuse)?;

        let mut nonce = self.base;
        for (n, c) in nonce[NONCE_SIZE - 8..].iter_mut().zip(current.to_be_bytes().iter()) {
            *n ^= c;
        }
        Ok(nonce)
    }
}

/// Authenticated chunk sealing/opening under the session key.
pub struct ChunkCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for ChunkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCipher").finish_non_exhaustive()
    }
}

impl ChunkCipher {
    pub fn new(key: &[u8]) -> Result<Self, CaesarError> {
        if key.len() != KEY_SIZE {
            return Err(CaesarError::KeyMismatch);
        }
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        })
    }

    /// Encrypt `data` in place, returning the detached tag.
    pub fn seal(
        &self,
        nseq: &mut NonceSequence,
        data: &mut [u8],
    ) -> Result<[u8; TAG_SIZE], CaesarError> {
        let nonce = nseq.next_unique()?;
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", data)
            .map_err(|_| CaesarError::EncryptFailed)?;
        Ok(tag.into())
    }

    /// Decrypt `data` in place, verifying the detached tag.
    pub fn open(
        &self,
        nseq: &mut NonceSequence,
        data: &mut [u8],
        tag: &[u8; TAG_SIZE],
    ) -> Result<(), CaesarError> {
        let nonce = nseq.next_unique()?;
        self.cipher
            .decrypt_in_place_detached(Nonce::from_slice(&nonce), b"", data, Tag::from_slice(tag))
            .map_err(|_| CaesarError::DecryptFailed)
    }
}

/// SHA-256 of a plaintext, as carried by `FileEnd`.
pub fn file_digest(hasher: Sha256) -> [u8; 32] {
    hasher.finalize().into()
}
