// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when analyzing a dataset directory
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Dataset path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Permission denied reading dataset: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed dataset YAML in {path}: {message}")]
    MalformedYaml { path: PathBuf, message: String },
}

impl DatasetError {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::Io { path, source },
        }
    }
}

/// A request or configuration field outside its allowed range
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid {field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_error_display() {
        let err = DatasetError::not_found("/data/datasets/missing");
        assert!(err.to_string().contains("/data/datasets/missing"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_dataset_error_io_classification() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = DatasetError::io("/test/path", io_err);
        assert!(matches!(err, DatasetError::NotFound { .. }));

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = DatasetError::io("/test/path", io_err);
        assert!(matches!(err, DatasetError::PermissionDenied { .. }));

        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        let err = DatasetError::io("/test/path", io_err);
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("epochs", "must be between 1 and 1000");
        assert_eq!(err.to_string(), "Invalid epochs: must be between 1 and 1000");
    }
}
