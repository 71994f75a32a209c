//! Analysis helpers.
//!
//! Signal pooling and ranking used by the reduce stage, and the
//! cross-document statistics shown in reports.

pub mod aggregator;

pub use aggregator::*;
