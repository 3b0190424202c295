//! Lektor coordinator library
//!
//! Segments submitted text into the job/chapter/chunk hierarchy, owns the
//! job store, supervises the worker-process pool, and serves the control API.

pub mod api;
pub mod dispatch;
pub mod segment;
