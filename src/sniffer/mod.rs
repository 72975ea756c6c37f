//! Server URL detection from process output.
//!
//! [`UrlSniffer`] is a pure scanner: strip terminal escapes, run the
//! heuristics, validate the candidate. [`UrlDetector`] wires a sniffer to the
//! bus for one process.

mod ansi;
mod detector;
mod patterns;

pub use ansi::*;
pub use detector::*;
pub use patterns::*;
