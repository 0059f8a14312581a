//! Envelope encryption of stored values.
//!
//! Each write seals the value locally under a fresh DEK and asks the
//! provider's KMS plugin to wrap that DEK; the wrapped DEK travels with the
//! value inside the envelope (see [`format`]). Reads reverse the process,
//! consulting the [`DekCache`](crate::dek::DekCache) before the plugin.

pub mod format;
pub mod transformer;

pub use transformer::EnvelopeTransformer;

use std::time::Duration;

use tokio::time::Instant;

/// Per-call context supplied by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueContext {
    authenticated_data: Vec<u8>,
    deadline: Option<Instant>,
}

impl ValueContext {
    /// Context binding a value to its storage key path.
    pub fn new(authenticated_data: impl Into<Vec<u8>>) -> Self {
        Self {
            authenticated_data: authenticated_data.into(),
            deadline: None,
        }
    }

    /// Bound every remote call made on behalf of this value by `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Shorthand for a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn authenticated_data(&self) -> &[u8] {
        &self.authenticated_data
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
