//! Shared helpers

pub mod redact;

pub use redact::{redact_secret, sanitize_url, REDACTED};
