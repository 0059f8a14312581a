//! Development KMS plugin speaking the `kms-envelope` plugin RPC.
//!
//! Used as a local backend while developing and as the remote peer in
//! integration tests. Wraps DEKs with base64, which offers no protection.

pub mod config;
pub mod server;
pub mod telemetry;

pub use server::{Base64Plugin, PluginHandle};
