//! Storage backends.
//!
//! Each backend is gated behind a feature flag. SQLite is the only one and
//! is enabled by default.

#[cfg(feature = "sqlite")]
pub mod sqlite;
