//! HTTP API module
//!
//! Exposes the per-job snapshot interface and the pause/resume/cancel/delete
//! operations consumed by the UI, plus settings and lexicon management.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, AppContext};
