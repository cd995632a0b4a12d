// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk
// IV-sequenced stream cipher and wire framing used by the game protocol.
// Re-derived from the reference implementation observed on the wire.

use thiserror::Error;

/// Bytes of `seq: u16 | length: u32` preceding every frame body,
/// plaintext handshake included.
pub const HEADER_LEN: usize = 6;

/// Frames above this are assumed to be stream corruption.
pub const MAX_FRAME_LEN: usize = 0x10_0000;

#[derive(Error, Debug, PartialEq)]
pub enum CipherError {
    #[error("frame sequence mismatch (expected {expected:#06x}, got {found:#06x})")]
    Desync { expected: u16, found: u16 },
    #[error("frame length {len:#x} exceeds the {MAX_FRAME_LEN:#x} limit")]
    FrameTooLarge { len: usize },
}

/// The IV advances through an MSVC-style LCG, one step per frame.
#[inline]
fn next_iv(iv: u32) -> u32 {
    iv.wrapping_mul(214013).wrapping_add(2531011)
}

/// Sequence tag carried in a frame header. Both ends derive it from their
/// local IV; a mismatch means the streams are no longer in lock-step.
#[inline]
fn frame_seq(version: u32, iv: u32) -> u16 {
    version as u16 ^ (iv >> 16) as u16
}

/// Per-frame xorshift32 keystream, seeded from the frame IV and the
/// session-constant block IV.
struct KeyStream {
    state: u32,
}

impl KeyStream {
    fn new(iv: u32, block_iv: u32) -> Self {
        let seed = iv ^ block_iv.rotate_left(13);
        KeyStream {
            // xorshift must not start from 0
            state: if seed == 0 { 0x9e37_79b9 } else { seed },
        }
    }

    fn next_byte(&mut self) -> u8 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        (x ^ (x >> 8) ^ (x >> 16) ^ (x >> 24)) as u8
    }

    fn apply(iv: u32, block_iv: u32, buf: &mut [u8]) {
        let mut ks = KeyStream::new(iv, block_iv);
        for b in buf.iter_mut() {
            *b ^= ks.next_byte();
        }
    }
}

fn write_frame_header(dst: &mut Vec<u8>, version: u32, iv: u32, body_len: usize) {
    dst.extend_from_slice(&frame_seq(version, iv).to_le_bytes());
    dst.extend_from_slice(&(body_len as u32).to_le_bytes());
}

/// Write half of the cipher. One instance per connection direction; every
/// produced frame advances the IV exactly once.
pub struct Encryptor {
    version: u32,
    iv: u32,
    block_iv: u32,
}

impl Encryptor {
    pub fn new(version: u32, iv: u32, block_iv: u32) -> Self {
        Encryptor {
            version,
            iv,
            block_iv,
        }
    }

    /// Frame and encrypt one packet.
    pub fn encrypt(&mut self, plain: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + plain.len());
        write_frame_header(&mut out, self.version, self.iv, plain.len());
        out.extend_from_slice(plain);
        KeyStream::apply(self.iv, self.block_iv, &mut out[HEADER_LEN..]);
        self.iv = next_iv(self.iv);
        out
    }

    /// Frame one packet in plaintext. Only ever used for the connection
    /// handshake, which precedes key agreement on the receiving end; the
    /// IV still advances so both ends stay in lock-step afterwards.
    pub fn write_header(&mut self, plain: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + plain.len());
        write_frame_header(&mut out, self.version, self.iv, plain.len());
        out.extend_from_slice(plain);
        self.iv = next_iv(self.iv);
        out
    }
}

/// Read half of the cipher.
pub struct Decryptor {
    version: u32,
    iv: u32,
    block_iv: u32,
}

impl Decryptor {
    pub fn new(version: u32, iv: u32, block_iv: u32) -> Self {
        Decryptor {
            version,
            iv,
            block_iv,
        }
    }

    /// Try to take one frame off the front of `data`.
    ///
    /// Returns `Ok(None)` when `data` holds an incomplete frame. Otherwise
    /// consumes exactly one frame, advances the IV, and yields the number
    /// of bytes consumed together with the decrypted body.
    pub fn try_decrypt(&mut self, data: &[u8]) -> Result<Option<(usize, Vec<u8>)>, CipherError> {
        if data.len() < HEADER_LEN {
            return Ok(None);
        }
        let seq = u16::from_le_bytes([data[0], data[1]]);
        let len = u32::from_le_bytes([data[2], data[3], data[4], data[5]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(CipherError::FrameTooLarge { len });
        }
        if data.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let expected = frame_seq(self.version, self.iv);
        if seq != expected {
            return Err(CipherError::Desync {
                expected,
                found: seq,
            });
        }

        let mut body = data[HEADER_LEN..HEADER_LEN + len].to_vec();
        KeyStream::apply(self.iv, self.block_iv, &mut body);
        self.iv = next_iv(self.iv);
        Ok(Some((HEADER_LEN + len, body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSION: u32 = 12;
    const RIV: u32 = 0xdeadbeef;
    const SIV: u32 = 0xcafebabe;
    const BLOCK_IV: u32 = 0x12345678;

    #[test]
    fn roundtrip() {
        let mut enc = Encryptor::new(VERSION, SIV, BLOCK_IV);
        let mut dec = Decryptor::new(VERSION, SIV, BLOCK_IV);

        for msg in [&b"\x01\x00hello"[..], b"", b"\xff\xfe\x00\x01"] {
            let frame = enc.encrypt(msg);
            if !msg.is_empty() {
                assert_ne!(&frame[HEADER_LEN..], msg, "body must not stay plaintext");
            }
            let (consumed, body) = dec.try_decrypt(&frame).unwrap().unwrap();
            assert_eq!(consumed, frame.len());
            assert_eq!(body, msg);
        }
    }

    #[test]
    fn incomplete_input_yields_none() {
        let mut enc = Encryptor::new(VERSION, SIV, BLOCK_IV);
        let frame = enc.encrypt(b"0123456789");

        let mut dec = Decryptor::new(VERSION, SIV, BLOCK_IV);
        for cut in 0..frame.len() {
            assert_eq!(dec.try_decrypt(&frame[..cut]).unwrap(), None);
        }
        assert!(dec.try_decrypt(&frame).unwrap().is_some());
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut enc = Encryptor::new(VERSION, SIV, BLOCK_IV);
        let mut buf = enc.encrypt(b"first");
        buf.extend_from_slice(&enc.encrypt(b"second"));

        let mut dec = Decryptor::new(VERSION, SIV, BLOCK_IV);
        let (consumed, body) = dec.try_decrypt(&buf).unwrap().unwrap();
        assert_eq!(body, b"first");
        let (_, body) = dec.try_decrypt(&buf[consumed..]).unwrap().unwrap();
        assert_eq!(body, b"second");
    }

    #[test]
    fn desync_is_detected() {
        let mut enc = Encryptor::new(VERSION, SIV, BLOCK_IV);
        // Skip a frame on the sending side only.
        let _lost = enc.encrypt(b"lost on the wire");
        let frame = enc.encrypt(b"arrives");

        let mut dec = Decryptor::new(VERSION, SIV, BLOCK_IV);
        match dec.try_decrypt(&frame) {
            Err(CipherError::Desync { .. }) => {}
            other => panic!("expected Desync, got {other:?}"),
        }
    }

    #[test]
    fn handshake_pre_advance_keeps_lock_step() {
        // Server frames the plaintext handshake, advancing its send IV.
        let mut server_enc = Encryptor::new(VERSION, SIV, BLOCK_IV);
        let handshake = server_enc.write_header(b"plaintext handshake payload");
        let encrypted = server_enc.encrypt(b"first real packet");

        // Client runs the raw handshake through its decryptor once to
        // advance the receive IV to the matching position.
        let mut dec = Decryptor::new(VERSION, SIV, BLOCK_IV);
        let (consumed, _garbage) = dec.try_decrypt(&handshake).unwrap().unwrap();
        assert_eq!(consumed, handshake.len());

        let (_, body) = dec.try_decrypt(&encrypted).unwrap().unwrap();
        assert_eq!(body, b"first real packet");
    }

    #[test]
    fn skipping_pre_advance_desyncs() {
        let mut server_enc = Encryptor::new(VERSION, SIV, BLOCK_IV);
        let _handshake = server_enc.write_header(b"handshake");
        let encrypted = server_enc.encrypt(b"first real packet");

        let mut dec = Decryptor::new(VERSION, SIV, BLOCK_IV);
        assert!(matches!(
            dec.try_decrypt(&encrypted),
            Err(CipherError::Desync { .. })
        ));
    }

    #[test]
    fn directions_are_independent() {
        let mut client_enc = Encryptor::new(VERSION, RIV, BLOCK_IV);
        let mut server_dec = Decryptor::new(VERSION, RIV, BLOCK_IV);

        let frame = client_enc.encrypt(b"client speaks");
        let (_, body) = server_dec.try_decrypt(&frame).unwrap().unwrap();
        assert_eq!(body, b"client speaks");
    }
}
