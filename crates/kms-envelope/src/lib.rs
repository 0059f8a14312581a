//! `kms-envelope`: envelope encryption of stored values through KMS plugins.
//!
//! Values are sealed locally under a per-write DEK; the DEK is wrapped by a
//! remote KMS plugin and stored alongside the value. Each configured
//! provider owns a transformer, a DEK cache and a health check.

pub mod config;
pub mod crypto;
pub mod dek;
pub mod envelope;
pub mod health;
pub mod kms;
pub mod registry;
pub mod server;
pub mod telemetry;

pub use envelope::{EnvelopeTransformer, ValueContext};
pub use registry::ProviderRegistry;
