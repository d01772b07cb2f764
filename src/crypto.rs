//! XSalsa20-Poly1305 block sealing and Argon2id key derivation.
//!
//! Every on-disk block is one authenticated envelope of exactly
//! [`BLOCK_SIZE`](crate::block::BLOCK_SIZE) bytes:
//!
//! ```text
//! [ nonce (24 B) | ciphertext (4056 B) | Poly1305 tag (16 B) ]  = 4096 B
//! ```
//!
//! The envelope overhead (24 + 16 = 40 bytes) is what fixes the block
//! plaintext at 4056 bytes.  A fresh random nonce is drawn for every seal,
//! including rewrites of the same block position.
//!
//! Key derivation: Argon2id(passphrase, salt) → 32-byte secret.  The salt
//! should be the 16-byte archive identity UUID, giving each container a
//! unique secret even when a passphrase is reused.

use argon2::{Algorithm, Argon2, Params, Version};
use crypto_secretbox::aead::{Aead, AeadCore, KeyInit, OsRng};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use thiserror::Error;

/// Byte length of the XSalsa20 nonce prepended to every sealed block.
pub const NONCE_LEN: usize = 24;

/// Byte length of the Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;

/// Total envelope overhead per block.
pub const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed — wrong secret or corrupted data")]
    DecryptionFailed,
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("Sealed payload too short (minimum {SEAL_OVERHEAD} bytes)")]
    TooShort,
}

/// Derive a 256-bit container secret from a passphrase using Argon2id.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let params = Params::new(64 * 1024, 3, 1, Some(32))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Seal `plaintext` under `secret` with a random nonce.
///
/// Returns `nonce (24 B) || ciphertext || tag (16 B)`; the output is always
/// exactly `plaintext.len() + SEAL_OVERHEAD` bytes.
pub fn seal(secret: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XSalsa20Poly1305::new_from_slice(secret)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let nonce = XSalsa20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open an envelope produced by [`seal`].
///
/// Input must start with the 24-byte nonce followed by ciphertext + tag.
/// Authentication failure and truncation both yield `DecryptionFailed`-class
/// errors; the caller treats either as block corruption.
pub fn open(secret: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::TooShort);
    }
    let cipher = XSalsa20Poly1305::new_from_slice(secret)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &sealed[NONCE_LEN..])
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let secret = [7u8; 32];
        let msg = vec![0xabu8; 4056];
        let sealed = seal(&secret, &msg).unwrap();
        assert_eq!(sealed.len(), msg.len() + SEAL_OVERHEAD);
        assert_eq!(open(&secret, &sealed).unwrap(), msg);
    }

    #[test]
    fn open_rejects_tampering() {
        let secret = [7u8; 32];
        let mut sealed = seal(&secret, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            open(&secret, &sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn open_rejects_wrong_secret() {
        let sealed = seal(&[1u8; 32], b"payload").unwrap();
        assert!(open(&[2u8; 32], &sealed).is_err());
    }

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key("hunter2", &[9u8; 16]).unwrap();
        let b = derive_key("hunter2", &[9u8; 16]).unwrap();
        let c = derive_key("hunter2", &[8u8; 16]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
