//! Lektor worker library
//!
//! One worker process claims chunks from the shared job store, synthesizes
//! audio through the model server, runs the repair pipeline, and assembles
//! chapter and job artifacts.

pub mod assemble;
pub mod audio;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod resample;
pub mod transcode;
pub mod worker;
