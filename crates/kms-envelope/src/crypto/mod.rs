//! AES-256-GCM-SIV payload sealing primitives.
//!
//! This module is intentionally free of KMS and HTTP dependencies.
//! It provides the local half of envelope encryption: DEK generation and
//! sealing/opening a value under that DEK.
//!
//! # Sealed payload format
//!
//! ```text
//! nonce (12 bytes) || ciphertext || tag (16 bytes)
//! ```

pub mod cipher;

pub use cipher::{CipherError, KEY_LEN};
