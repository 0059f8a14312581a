//! AES-256-GCM-SIV sealing of stored values under a per-write DEK.
//!
//! The storage key path is bound as associated data, so a sealed value only
//! opens under the key it was written to.
//!
//! **Do NOT substitute plain AES-256-GCM.** Nonces are random; GCM-SIV keeps
//! an accidental nonce repeat from exposing the key stream.

use aes_gcm_siv::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    Aes256GcmSiv, Nonce,
};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Errors produced by the cipher layer.
#[derive(Debug, Error)]
pub enum CipherError {
    /// The DEK is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid DEK length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The sealed value is shorter than a nonce plus a tag.
    #[error("sealed value truncated: {0} bytes")]
    Truncated(usize),

    /// AES-GCM-SIV encryption or decryption failed.
    #[error("aead operation failed")]
    AeadFailure,
}

/// Fill a fresh DEK from the OS CSPRNG.
pub fn generate_dek() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Seal `plaintext` under `dek`, authenticating `aad`.
///
/// Output layout: `nonce (12) || ciphertext || tag (16)`.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `dek` is not [`KEY_LEN`] bytes.
/// Returns [`CipherError::AeadFailure`] on an internal AEAD error.
pub fn seal(plaintext: &[u8], dek: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(dek)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CipherError::AeadFailure)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a value produced by [`seal`].
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if `dek` is not [`KEY_LEN`] bytes,
/// [`CipherError::Truncated`] if `sealed` cannot hold a nonce and tag, and
/// [`CipherError::AeadFailure`] if authentication fails (wrong key, wrong
/// `aad`, or tampered data).
pub fn open(sealed: &[u8], dek: &[u8], aad: &[u8]) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(dek)?;
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherError::Truncated(sealed.len()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CipherError::AeadFailure)
}

fn build_cipher(dek: &[u8]) -> Result<Aes256GcmSiv, CipherError> {
    if dek.len() != KEY_LEN {
        return Err(CipherError::InvalidKeyLength(dek.len()));
    }
    Aes256GcmSiv::new_from_slice(dek).map_err(|_| CipherError::InvalidKeyLength(dek.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &[u8] = b"/registry/secrets/ns/name";

    #[test]
    fn seal_open_round_trip() {
        let dek = generate_dek();
        let sealed = seal(b"secret-value", &dek, PATH).unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + b"secret-value".len() + TAG_LEN);
        assert_eq!(open(&sealed, &dek, PATH).unwrap(), b"secret-value");
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let dek = generate_dek();
        let sealed = seal(b"", &dek, PATH).unwrap();
        assert!(open(&sealed, &dek, PATH).unwrap().is_empty());
    }

    #[test]
    fn other_path_fails_authentication() {
        let dek = generate_dek();
        let sealed = seal(b"secret", &dek, PATH).unwrap();
        assert!(matches!(
            open(&sealed, &dek, b"/registry/secrets/ns/other"),
            Err(CipherError::AeadFailure)
        ));
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let sealed = seal(b"secret", &generate_dek(), PATH).unwrap();
        assert!(open(&sealed, &generate_dek(), PATH).is_err());
    }

    #[test]
    fn invalid_key_length_rejected() {
        assert!(matches!(
            seal(b"x", &[0u8; 16], PATH),
            Err(CipherError::InvalidKeyLength(16))
        ));
    }

    #[test]
    fn truncated_input_rejected() {
        let dek = generate_dek();
        assert!(matches!(
            open(&[0u8; NONCE_LEN + TAG_LEN - 1], &dek, PATH),
            Err(CipherError::Truncated(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let dek = generate_dek();
        let mut sealed = seal(b"tamper me", &dek, PATH).unwrap();
        sealed[NONCE_LEN] ^= 0xFF;
        assert!(open(&sealed, &dek, PATH).is_err());
    }

    #[test]
    fn nonces_differ_per_seal() {
        let dek = generate_dek();
        let a = seal(b"same", &dek, PATH).unwrap();
        let b = seal(b"same", &dek, PATH).unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }
}
