//! sc-core: shared types, IDs, errors and configuration.
//!
//! This crate is the foundational dependency for the other sc-* crates. It
//! provides the typed [`JobId`], the unified [`Error`], the media rules that
//! decide which uploads are acceptable, and the application [`config`].

pub mod config;
pub mod error;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
