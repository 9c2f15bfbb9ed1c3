//! Error-context helpers and small utilities shared by the chatrelay crates.

pub mod allowlist;
pub mod error;

pub use error::FromMessage;
