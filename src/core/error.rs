use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("{0}: Undefined property {1}")]
    UnknownProperty(String, String),

    #[error("Readonly violation: {0}")]
    ReadonlyViolation(String),

    #[error("{0}: Property {1} not allow null")]
    NullNotAllowed(String, String),

    #[error("{0}: Property {1} mismatching pattern {2}")]
    PatternMismatch(String, String, String),

    #[error("Unexpected value: {0}")]
    UnexpectedValue(String),

    #[error("Runtime inconsistency: {0}")]
    RuntimeInconsistency(String),

    #[error("Entity class '{0}' not registered")]
    UnknownClass(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl MapperError {
    /// Name of the property the error is about, when it is about one.
    pub fn property(&self) -> Option<&str> {
        match self {
            Self::UnknownProperty(_, prop)
            | Self::NullNotAllowed(_, prop)
            | Self::PatternMismatch(_, prop, _) => Some(prop),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;

impl<T> From<std::sync::PoisonError<T>> for MapperError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for MapperError {
    fn from(err: serde_json::Error) -> Self {
        Self::UnexpectedValue(err.to_string())
    }
}
