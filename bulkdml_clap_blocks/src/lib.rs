//! Reusable clap configuration blocks for the bulkdml tools.

pub mod connection;
pub mod session;
pub mod tokio;
