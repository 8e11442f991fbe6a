//! Convenience result type alias for mqplug.

use crate::error::AppError;

/// A specialized `Result` type for mqplug operations.
pub type AppResult<T> = Result<T, AppError>;
