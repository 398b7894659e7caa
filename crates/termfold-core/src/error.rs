//! Error types for the termfold data model.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or validating model values.
#[derive(Error, Debug)]
pub enum Error {
    /// A field holds a value the destination table would not accept.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// Run metadata is inconsistent (e.g. week end before week start).
    #[error("invalid run metadata: {0}")]
    InvalidMetadata(String),
}
