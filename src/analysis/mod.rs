//! Line analysis: odds math, drift and trap detection.
//!
//! Everything here is a pure function of an observation window and
//! configuration, so it can be run from any thread.

pub mod drift;
pub mod odds;
pub mod trap;
