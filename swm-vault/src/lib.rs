//! Symmetric authenticated encryption for secrets at rest.
//!
//! ## Design
//!
//! Every sub-wallet's two 32-byte secp256k1 scalars are encrypted under a
//! single operator-supplied master key before they touch the ledger store.
//! Rather than a "derive key mode" scheme that samples a per-message
//! 32-byte key-id and HKDF-derives a one-shot AEAD key (avoiding the need
//! to ever transmit a nonce), this vault produces an explicit, versioned,
//! self-describing envelope with a real nonce field — chosen so a future
//! key-rotation migration can read old envelopes and re-encrypt them under
//! a new master key without access to the original key-id derivation.
//! `ring` provides the underlying AES-256-GCM primitive.
//!
//! ## Envelope format
//!
//! ```text
//! byte  0     : version (0x01)
//! byte  1     : iv_length (0x0C == 12)
//! bytes 2..14 : iv (12 bytes)
//! bytes 14..30: auth tag (16 bytes)
//! bytes 30..  : ciphertext
//! ```

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::digest;
use swm_common::rng::Crng;
use thiserror::Error;

const VERSION: u8 = 0x01;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + 1 + IV_LEN + TAG_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("envelope too short to contain a header")]
    Truncated,
    #[error("unknown envelope version byte")]
    BadVersion,
    #[error("iv_length field does not match the expected 12-byte IV")]
    BadIvLength,
    #[error("authentication tag mismatch (tampered ciphertext or wrong key)")]
    AuthFailure,
    #[error("master key must be 64 hex chars, 32-byte base64, or an arbitrary string")]
    InvalidMasterKey,
}

/// A derived 32-byte AES-256-GCM key, held for the process lifetime.
pub struct Vault {
    key_bytes: [u8; 32],
}

impl Vault {
    /// Derives the vault's key from an operator-supplied master key string.
    ///
    /// - 64 lowercase hex characters -> the decoded 32 bytes are the key.
    /// - else 32 bytes of base64 -> those bytes are the key.
    /// - else -> SHA-256 of the UTF-8 input string.
    pub fn from_master_key(master_key: &str) -> Self {
        let key_bytes = derive_key(master_key);
        Self { key_bytes }
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn from_raw_key(key_bytes: [u8; 32]) -> Self {
        Self { key_bytes }
    }

    /// Encrypts `plaintext`, producing a self-describing envelope.
    pub fn encrypt(&self, rng: &mut impl Crng, plaintext: &[u8]) -> Vec<u8> {
        let iv = swm_common::rng::gen_bytes::<IV_LEN>(rng);
        let unbound = UnboundKey::new(&AES_256_GCM, &self.key_bytes)
            .expect("key is exactly 32 bytes");
        let key = LessSafeKey::new(unbound);
        let nonce = Nonce::assume_unique_for_key(iv);

        let mut in_out = plaintext.to_vec();
        let tag = key
            .seal_in_place_separate_tag(nonce, Aad::empty(), &mut in_out)
            .expect("AES-256-GCM sealing cannot fail for an in-bounds buffer");

        let mut out = Vec::with_capacity(HEADER_LEN + in_out.len());
        out.push(VERSION);
        out.push(IV_LEN as u8);
        out.extend_from_slice(&iv);
        out.extend_from_slice(tag.as_ref());
        out.extend_from_slice(&in_out);
        out
    }

    /// Decrypts an envelope produced by [`Vault::encrypt`].
    pub fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, VaultError> {
        if envelope.len() < HEADER_LEN {
            return Err(VaultError::Truncated);
        }
        let version = envelope[0];
        if version != VERSION {
            return Err(VaultError::BadVersion);
        }
        let iv_len = envelope[1] as usize;
        if iv_len != IV_LEN {
            return Err(VaultError::BadIvLength);
        }
        let iv: [u8; IV_LEN] = envelope[2..2 + IV_LEN]
            .try_into()
            .map_err(|_| VaultError::Truncated)?;
        let tag_start = 2 + IV_LEN;
        let tag_end = tag_start + TAG_LEN;
        let tag = &envelope[tag_start..tag_end];
        let ciphertext = &envelope[tag_end..];

        let unbound = UnboundKey::new(&AES_256_GCM, &self.key_bytes)
            .expect("key is exactly 32 bytes");
        let key = LessSafeKey::new(unbound);
        let nonce = Nonce::assume_unique_for_key(iv);

        let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        in_out.extend_from_slice(ciphertext);
        in_out.extend_from_slice(tag);

        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| VaultError::AuthFailure)?;
        Ok(plaintext.to_vec())
    }
}

fn derive_key(master_key: &str) -> [u8; 32] {
    if master_key.len() == 64
        && master_key.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    {
        let mut out = [0u8; 32];
        if hex::decode_to_slice(master_key, &mut out).is_ok() {
            return out;
        }
    }
    if let Ok(decoded) = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        master_key,
    ) {
        if decoded.len() == 32 {
            let mut out = [0u8; 32];
            out.copy_from_slice(&decoded);
            return out;
        }
    }
    let digest = digest::digest(&digest::SHA256, master_key.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}
