//! HTML understanding: page metadata and main-body text.

pub mod article;
pub mod metadata;

pub use article::{ExtractConfig, extract_article};
pub use metadata::extract_metadata;
