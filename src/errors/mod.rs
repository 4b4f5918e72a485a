//! Application error types.
//!
//! Module-specific error enums (`STTError`, `TTSError`, `LLMError`, ...)
//! live next to the code that produces them; this module hosts the
//! top-level [`AppError`] that aggregates them at API and startup
//! boundaries.

pub mod app_error;

pub use app_error::{AppError, AppResult};
