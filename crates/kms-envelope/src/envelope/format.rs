//! On-disk envelope layout.
//!
//! ```text
//! "k8s:enc:kms:v1:" <provider> ":" || u16_be(len(encrypted_dek)) || encrypted_dek || sealed_payload
//! ```

use common::TransformError;

/// Scheme and format version shared by every envelope.
pub const SCHEME_PREFIX: &str = "k8s:enc:kms:v1:";

/// Width of the big-endian encrypted-DEK length field.
pub const DEK_LEN_SIZE: usize = 2;

/// Largest encrypted DEK the length field can describe.
pub const MAX_ENCRYPTED_DEK_LEN: usize = u16::MAX as usize;

/// Full prefix written by `provider`, e.g. `k8s:enc:kms:v1:kms-provider:`.
pub fn provider_prefix(provider: &str) -> String {
    format!("{SCHEME_PREFIX}{provider}:")
}

/// Provider name embedded in `raw`, if it carries the envelope scheme.
///
/// Returns `None` for values without the scheme prefix or whose provider
/// segment is unterminated or not UTF-8.
pub fn embedded_provider(raw: &[u8]) -> Option<&str> {
    let rest = raw.strip_prefix(SCHEME_PREFIX.as_bytes())?;
    let end = rest.iter().position(|&b| b == b':')?;
    std::str::from_utf8(&rest[..end]).ok()
}

/// Borrowed view of the part of an envelope after its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeBody<'a> {
    pub encrypted_dek: &'a [u8],
    pub payload: &'a [u8],
}

impl<'a> EnvelopeBody<'a> {
    /// Split `body` (the bytes following the prefix) into DEK and payload.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::MalformedEnvelope`] if the length field is
    /// truncated, declares zero bytes, or runs past the end of `body`.
    pub fn parse(body: &'a [u8]) -> Result<Self, TransformError> {
        if body.len() < DEK_LEN_SIZE {
            return Err(TransformError::MalformedEnvelope(format!(
                "{} bytes after prefix, need at least {DEK_LEN_SIZE} for the DEK length",
                body.len()
            )));
        }
        let (len_field, rest) = body.split_at(DEK_LEN_SIZE);
        let dek_len = u16::from_be_bytes([len_field[0], len_field[1]]) as usize;
        if dek_len == 0 {
            return Err(TransformError::MalformedEnvelope(
                "encrypted DEK length is zero".into(),
            ));
        }
        if dek_len > rest.len() {
            return Err(TransformError::MalformedEnvelope(format!(
                "declared encrypted DEK length {dek_len} exceeds remaining {} bytes",
                rest.len()
            )));
        }
        let (encrypted_dek, payload) = rest.split_at(dek_len);
        Ok(Self {
            encrypted_dek,
            payload,
        })
    }
}

/// Assemble `prefix || u16_be(len(encrypted_dek)) || encrypted_dek || payload`.
///
/// # Errors
///
/// Returns [`TransformError::EncryptionFailure`] if the encrypted DEK is
/// empty or does not fit the 16-bit length field.
pub fn assemble(prefix: &[u8], encrypted_dek: &[u8], payload: &[u8]) -> Result<Vec<u8>, TransformError> {
    if encrypted_dek.is_empty() {
        return Err(TransformError::EncryptionFailure(
            "KMS returned an empty encrypted DEK".into(),
        ));
    }
    let dek_len = u16::try_from(encrypted_dek.len()).map_err(|_| {
        TransformError::EncryptionFailure(format!(
            "encrypted DEK is {} bytes, limit is {MAX_ENCRYPTED_DEK_LEN}",
            encrypted_dek.len()
        ))
    })?;

    let mut out =
        Vec::with_capacity(prefix.len() + DEK_LEN_SIZE + encrypted_dek.len() + payload.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(&dek_len.to_be_bytes());
    out.extend_from_slice(encrypted_dek);
    out.extend_from_slice(payload);
    Ok(out)
}
