use super::crypto::{self, ChunkCipher, KeyExchange, NonceSequence};
use super::{FileEntry, Packet, PROTOCOL_VERSION};
use crate::errors::CaesarError;

macro_rules! assert_err {
    ($expression:expr, $($pattern:tt)+) => {
        match $expression {
            $($pattern)+ => (),
            ref e => panic!("expected `{}` but got `{:?}`", stringify!($($pattern)+), e),
        }
    }
}

fn roundtrip(packet: Packet) {
    let encoded = packet.encode();
    assert_eq!(Packet::decode(&encoded).unwrap(), packet);
}

#[test]
fn packet_roundtrip_every_tag() {
    roundtrip(Packet::Handshake {
        version: PROTOCOL_VERSION,
        session_seed: [7u8; 32],
    });
    roundtrip(Packet::HandshakeResponse {
        accepted_version: PROTOCOL_VERSION,
    });
    roundtrip(Packet::List(vec![
        FileEntry {
            name: "a.bin".into(),
            size: 0,
        },
        FileEntry {
            name: "b.bin".into(),
            size: u64::MAX,
        },
    ]));
    roundtrip(Packet::List(Vec::new()));
    roundtrip(Packet::Approve);
    roundtrip(Packet::Abort {
        reason: "no thanks".into(),
    });
    roundtrip(Packet::Chunk {
        file_index: 3,
        offset: 1 << 40,
        cipher: vec![0xAB; 300],
        tag: [9u8; 16],
    });
    roundtrip(Packet::Chunk {
        file_index: 0,
        offset: 0,
        cipher: Vec::new(),
        tag: [0u8; 16],
    });
    roundtrip(Packet::FileEnd {
        file_index: 2,
        file_hash: [0x42; 32],
    });
    roundtrip(Packet::TransferEnd);
    roundtrip(Packet::Ack { file_index: 128 });
    roundtrip(Packet::Progress {
        file_index: 1,
        bytes_done: 65_536,
        bytes_total: 160_000,
    });
}

#[test]
fn unknown_tag_is_malformed() {
    assert_err!(
        Packet::decode(&[0xEE]),
        Err(CaesarError::MalformedFrame)
    );
    assert_err!(Packet::decode(&[]), Err(CaesarError::MalformedFrame));
}

#[test]
fn truncated_body_is_malformed() {
    let mut encoded = Packet::Handshake {
        version: 1,
        session_seed: [0u8; 32],
    }
    .encode();
    encoded.truncate(encoded.len() - 1);
    assert_err!(Packet::decode(&encoded), Err(CaesarError::MalformedFrame));
}

#[test]
fn trailing_bytes_are_malformed() {
    let mut encoded = Packet::Approve.encode();
    encoded.push(0);
    assert_err!(Packet::decode(&encoded), Err(CaesarError::MalformedFrame));
}

#[test]
fn chunk_length_must_match_payload() {
    // Claim more cipher bytes than the body carries.
    let mut encoded = Packet::Chunk {
        file_index: 0,
        offset: 0,
        cipher: vec![1, 2, 3],
        tag: [0u8; 16],
    }
    .encode();
    // cipher_len is the varint right after tag byte + index varint + 8 offset bytes
    encoded[10] = 200;
    assert_err!(Packet::decode(&encoded), Err(CaesarError::MalformedFrame));
}

#[test]
fn list_name_must_be_utf8() {
    let mut encoded = Packet::List(vec![FileEntry {
        name: "ab".into(),
        size: 1,
    }])
    .encode();
    // Corrupt a name byte into an invalid UTF-8 lead.
    encoded[3] = 0xFF;
    assert_err!(Packet::decode(&encoded), Err(CaesarError::MalformedFrame));
}

#[test]
fn key_agreement_matches_on_same_name() {
    let mut alice = KeyExchange::start("brave-otter-lime");
    let mut bob = KeyExchange::start("brave-otter-lime");

    let alice_msg = alice.outbound_msg().to_vec();
    let bob_msg = bob.outbound_msg().to_vec();

    let alice_key = alice.finish(&bob_msg).unwrap();
    let bob_key = bob.finish(&alice_msg).unwrap();

    assert_eq!(alice_key, bob_key);
    assert_eq!(alice_key.len(), crypto::KEY_SIZE);
}

#[test]
fn key_agreement_diverges_on_name_mismatch() {
    let mut alice = KeyExchange::start("brave-otter-lime");
    let mut bob = KeyExchange::start("brave-otter-lima");

    let alice_msg = alice.outbound_msg().to_vec();
    let bob_msg = bob.outbound_msg().to_vec();

    let alice_key = alice.finish(&bob_msg).unwrap();
    let bob_key = bob.finish(&alice_msg).unwrap();

    assert_ne!(alice_key, bob_key);
}

#[test]
fn finish_twice_is_rejected() {
    let mut alice = KeyExchange::start("x-y-z");
    let mut bob = KeyExchange::start("x-y-z");
    let bob_msg = bob.outbound_msg().to_vec();
    let _ = bob.finish(alice.outbound_msg()).unwrap();
    alice.finish(&bob_msg).unwrap();
    assert_err!(alice.finish(&bob_msg), Err(CaesarError::KeyMismatch));
}

#[test]
fn confirmation_tags_bind_key_and_name() {
    let (s1, r1) = crypto::confirmation_tags(&[1u8; 32], "a-b-c").unwrap();
    let (s2, r2) = crypto::confirmation_tags(&[1u8; 32], "a-b-c").unwrap();
    let (s3, _) = crypto::confirmation_tags(&[2u8; 32], "a-b-c").unwrap();
    let (s4, _) = crypto::confirmation_tags(&[1u8; 32], "a-b-d").unwrap();

    assert_eq!(s1, s2);
    assert_eq!(r1, r2);
    assert_ne!(s1, r1);
    assert_ne!(s1, s3);
    assert_ne!(s1, s4);
}

#[test]
fn nonce_sequence_never_repeats() {
    let mut nseq = NonceSequence::from_seed(&[0x5A; 32]);
    let mut seen = std::collections::HashSet::new();
    for _ in 0..10_000 {
        assert!(seen.insert(nseq.next_unique().unwrap()));
    }
}

#[test]
fn both_sides_derive_identical_nonces() {
    let seed = [0x11; 32];
    let mut ours = NonceSequence::from_seed(&seed);
    let mut theirs = NonceSequence::from_seed(&seed);
    for _ in 0..64 {
        assert_eq!(ours.next_unique().unwrap(), theirs.next_unique().unwrap());
    }
}

#[test]
fn chunk_seal_open_roundtrip() {
    let key = [0x33u8; 32];
    let seed = [0x44u8; 32];
    let cipher = ChunkCipher::new(&key).unwrap();

    let mut sender_nseq = NonceSequence::from_seed(&seed);
    let mut receiver_nseq = NonceSequence::from_seed(&seed);

    let mut data = b"attack at dawn".to_vec();
    let tag = cipher.seal(&mut sender_nseq, &mut data).unwrap();
    assert_ne!(&data, b"attack at dawn");

    cipher.open(&mut receiver_nseq, &mut data, &tag).unwrap();
    assert_eq!(&data, b"attack at dawn");
}

#[test]
fn chunk_bitflip_fails_authentication() {
    let key = [0x33u8; 32];
    let seed = [0x44u8; 32];
    let cipher = ChunkCipher::new(&key).unwrap();

    let mut sender_nseq = NonceSequence::from_seed(&seed);
    let mut receiver_nseq = NonceSequence::from_seed(&seed);

    let mut data = vec![0u8; 1024];
    let tag = cipher.seal(&mut sender_nseq, &mut data).unwrap();

    data[100] ^= 0x01;
    assert_err!(
        cipher.open(&mut receiver_nseq, &mut data, &tag),
        Err(CaesarError::DecryptFailed)
    );
}

#[test]
fn chunk_out_of_sequence_fails_authentication() {
    let key = [0x33u8; 32];
    let seed = [0x44u8; 32];
    let cipher = ChunkCipher::new(&key).unwrap();

    let mut sender_nseq = NonceSequence::from_seed(&seed);
    let mut receiver_nseq = NonceSequence::from_seed(&seed);

    let mut first = vec![1u8; 64];
    let mut second = vec![2u8; 64];
    let _ = cipher.seal(&mut sender_nseq, &mut first).unwrap();
    let tag2 = cipher.seal(&mut sender_nseq, &mut second).unwrap();

    // Receiver sees the second chunk first; its counter disagrees.
    assert_err!(
        cipher.open(&mut receiver_nseq, &mut second, &tag2),
        Err(CaesarError::DecryptFailed)
    );
}

#[test]
fn bad_key_length_is_rejected() {
    assert_err!(ChunkCipher::new(&[0u8; 16]), Err(CaesarError::KeyMismatch));
}
