//! Core domain types shared across all casefeed crates.

pub mod case;
pub mod risk;

pub use case::*;
pub use risk::*;
