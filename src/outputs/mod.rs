//! Output writers.
//!
//! - [`json`]: the article array (stdout or file) and the run report

pub mod json;
