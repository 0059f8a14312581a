//! Structured logging and optional OpenTelemetry span export.
//!
//! # Telemetry invariants
//!
//! - **No plaintext or DEK material** appears in any span attribute or log
//!   field. Encrypted DEKs are logged only as a short fingerprint.
//! - Log level comes from `log_level` unless `RUST_LOG` is set.

pub mod init;

pub use init::{init_telemetry, shutdown};
