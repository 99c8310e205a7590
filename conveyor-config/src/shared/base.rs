use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A numeric field that must be positive was zero.
    #[error("`{field}` must be greater than 0")]
    ZeroValue { field: &'static str },
}
