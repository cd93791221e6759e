//! Final image configuration and build descriptor.

pub mod config;
pub mod descriptor;

pub use config::{CommandForm, ConfigOverrides, RunnerImageConfig};
pub use descriptor::{Directive, render};
