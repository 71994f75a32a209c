//! ratewatch - chunked LLM analysis of central bank communications.
//!
//! Long documents are split into overlapping segments, each segment is
//! analyzed independently under a shared rate limit, and the per-segment
//! findings are synthesized into one monetary policy assessment.

pub mod analysis;
pub mod capability;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod report;
