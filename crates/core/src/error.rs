use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    SharingViolation,
    Security,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::SharingViolation => "SharingViolation",
            ErrorKind::Security => "SecurityError",
            ErrorKind::Io => "IoError",
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::Io,
        }
    }
}

/// A filesystem or security-subsystem failure tied to one path or identifier.
///
/// Recoverable at item granularity: the walker turns it into a
/// [`FailureRecord`](crate::model::FailureRecord) and moves on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed for '{target}': {message}")]
pub struct AccessError {
    pub operation: &'static str,
    pub target: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl AccessError {
    pub fn new(
        operation: &'static str,
        target: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            target: target.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn from_io(operation: &'static str, path: &Path, err: &io::Error) -> Self {
        Self::new(
            operation,
            path.to_string_lossy(),
            ErrorKind::from_io(err),
            err.to_string(),
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("failed to resolve account '{account}': {reason}")]
    UnknownAccount { account: String, reason: String },
    #[error("root path does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("root path is not a directory: {0}")]
    RootNotDirectory(PathBuf),
    #[error("target owner identifier is empty")]
    EmptyTarget,
    #[error("remediation plan {path}: {reason}")]
    RemediationPlan { path: PathBuf, reason: String },
    #[error("{0}")]
    InvalidOption(String),
}

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("failed to enumerate {}: {source}", path.display())]
    Enumerate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
