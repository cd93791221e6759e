//! Marina Shared - code used by both the build engine and the CLI
//!
//! This crate contains the error taxonomy and the constants that name
//! in-container paths and environment variables. Both sides must agree
//! on them, so they live here rather than in either consumer.

pub mod constants;
pub mod errors;

pub use errors::{MarinaError, MarinaResult};
