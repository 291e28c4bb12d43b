//! Fieldsync
//!
//! Reference server for the fieldsync offline-first sync engine.

pub mod server;

pub use fieldsync_core::version;
