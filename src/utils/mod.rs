// Utility functions
pub mod cache;
pub mod error;

pub use error::*;
