//! Axum HTTP server: health surface and transform API.
//!
//! # Routes
//! - `GET /healthz` aggregates every provider check.
//! - `GET /healthz/kms-provider-<index>` reports a single provider.
//! - `POST /v1/transform/{encrypt,decrypt}` runs values through the registry.

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;
