//! rollbook-backup - backup, validation, and restore for Rollbook's
//! embedded database.
//!
//! Dumps are plain SQL scripts, optionally anonymized and gzip-compressed.
//! Untrusted dumps are never executed against production directly: they run
//! in a disposable database first, and only statements re-derived from that
//! database's catalog are replayed into the live one.

pub mod catalog;
pub mod config;
pub mod dump;
pub mod errors;
pub mod manager;
pub mod metadata;
pub mod migrate;
pub mod order;
pub mod sandbox;
pub mod scheduler;
pub mod validate;
