use thiserror::Error;

use crate::manifest::ResourceKind;

/// Malformed OBJ source. Line numbers are 1-based.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("OBJ parse error on line {line}: {message}")]
pub struct ObjParseError {
    pub line: usize,
    pub message: String,
}

impl ObjParseError {
    pub(crate) fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to load resource '{key}' from '{url}': {reason}")]
    ResourceLoad {
        key: String,
        url: String,
        reason: String,
    },
    #[error("resource '{0}' is not loaded")]
    MissingResource(String),
    #[error("resource '{key}' is {found:?}, expected {expected:?}")]
    KindMismatch {
        key: String,
        expected: ResourceKind,
        found: ResourceKind,
    },
    #[error(transparent)]
    Parse(#[from] ObjParseError),
    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid image: {0}")]
    Image(String),
}

pub type AssetResult<T> = Result<T, AssetError>;
