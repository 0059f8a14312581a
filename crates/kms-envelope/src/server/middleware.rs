//! Axum middleware settings applied to the router.

use std::time::Duration;

/// Per-request timeout applied to all routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline bound into each transform's `ValueContext`. Must stay below
/// [`REQUEST_TIMEOUT`].
pub const TRANSFORM_DEADLINE: Duration = Duration::from_secs(25);
