//! # mqplug-core
//!
//! Core crate for mqplug. Contains the configuration schemas shared by the
//! plugin host and the CLI, and the unified error system.
//!
//! This crate has **no** internal dependencies on other mqplug crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
