//! Common types, protocol definitions, and errors shared across `kms-envelope` crates.

pub mod endpoint;
pub mod error;
pub mod protocol;

pub use endpoint::SocketEndpoint;
pub use error::{ServiceError, TransformError};
