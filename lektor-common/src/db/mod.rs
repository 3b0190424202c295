//! Database access layer
//!
//! Schema initialization and settings access for the shared SQLite database.
//! Job/chapter/chunk queries live in the coordinator's job store; this module
//! owns the schema and the key/value settings table both binaries read.

pub mod init;
pub mod settings;

pub use init::init_database;
