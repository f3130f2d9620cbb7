use crate::external::command::CommandError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure the carrier reports, each tagged with a stable kind.
///
/// `diagnostic` fields hold the raw text git printed, kept for display.
#[derive(Debug, Error, Clone)]
pub enum CarrierError {
    #[error("{path}: {message}")]
    Repository {
        path: PathBuf,
        message: String,
        diagnostic: Option<String>,
    },
    #[error("base commit '{base}' does not resolve to a known commit")]
    InvalidBase {
        base: String,
        diagnostic: Option<String>,
    },
    #[error("nothing to pack: {reference} has no commits beyond {}", .base.as_deref().unwrap_or("its root"))]
    EmptyRange {
        reference: String,
        base: Option<String>,
    },
    #[error("{}: not a valid bundle", .path.display())]
    CorruptBundle {
        path: PathBuf,
        diagnostic: Option<String>,
    },
    #[error("branch '{branch}' has diverged: local tip {local_tip}, bundle tip {bundle_tip}; resolve manually")]
    DivergedHistory {
        branch: String,
        local_tip: String,
        bundle_tip: String,
    },
    #[error("git failed: {message}")]
    ExternalTool {
        message: String,
        diagnostic: Option<String>,
    },
    #[error("{} already exists; pass --force to overwrite", .path.display())]
    OutputExists { path: PathBuf },
    #[error("bundle carries no branch name to apply ({}); choose a target branch", .heads.join(", "))]
    TargetBranchRequired { heads: Vec<String> },
}

/// The precise kind of a [`CarrierError`], used by front ends to branch on
/// failures without matching on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    RepositoryError,
    InvalidBaseError,
    EmptyRangeError,
    CorruptBundleError,
    DivergedHistoryError,
    ExternalToolError,
    OutputExistsError,
    TargetBranchRequiredError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::RepositoryError => "RepositoryError",
            ErrorKind::InvalidBaseError => "InvalidBaseError",
            ErrorKind::EmptyRangeError => "EmptyRangeError",
            ErrorKind::CorruptBundleError => "CorruptBundleError",
            ErrorKind::DivergedHistoryError => "DivergedHistoryError",
            ErrorKind::ExternalToolError => "ExternalToolError",
            ErrorKind::OutputExistsError => "OutputExistsError",
            ErrorKind::TargetBranchRequiredError => "TargetBranchRequiredError",
        };
        f.write_str(name)
    }
}

impl CarrierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CarrierError::Repository { .. } => ErrorKind::RepositoryError,
            CarrierError::InvalidBase { .. } => ErrorKind::InvalidBaseError,
            CarrierError::EmptyRange { .. } => ErrorKind::EmptyRangeError,
            CarrierError::CorruptBundle { .. } => ErrorKind::CorruptBundleError,
            CarrierError::DivergedHistory { .. } => ErrorKind::DivergedHistoryError,
            CarrierError::ExternalTool { .. } => ErrorKind::ExternalToolError,
            CarrierError::OutputExists { .. } => ErrorKind::OutputExistsError,
            CarrierError::TargetBranchRequired { .. } => ErrorKind::TargetBranchRequiredError,
        }
    }

    /// Raw git output attached to the failure, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            CarrierError::Repository { diagnostic, .. }
            | CarrierError::InvalidBase { diagnostic, .. }
            | CarrierError::CorruptBundle { diagnostic, .. }
            | CarrierError::ExternalTool { diagnostic, .. } => diagnostic.as_deref(),
            _ => None,
        }
    }

    /// Empty ranges are reported to the operator but are not failures of the tool.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CarrierError::EmptyRange { .. })
    }

    pub(crate) fn repository(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CarrierError::Repository {
            path: path.into(),
            message: message.into(),
            diagnostic: None,
        }
    }

    pub(crate) fn external(message: impl Into<String>, diagnostic: Option<String>) -> Self {
        CarrierError::ExternalTool {
            message: message.into(),
            diagnostic,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, diagnostic: impl Into<String>) -> Self {
        CarrierError::CorruptBundle {
            path: path.into(),
            diagnostic: Some(diagnostic.into()),
        }
    }
}

impl From<CommandError> for CarrierError {
    fn from(err: CommandError) -> Self {
        let message = match &err {
            CommandError::CommandNotFound { command } => {
                format!("'{command}' is not installed or not on PATH")
            }
            other => other.to_string(),
        };
        CarrierError::ExternalTool {
            message,
            diagnostic: None,
        }
    }
}

impl From<std::io::Error> for CarrierError {
    fn from(err: std::io::Error) -> Self {
        CarrierError::ExternalTool {
            message: format!("filesystem error: {err}"),
            diagnostic: None,
        }
    }
}
