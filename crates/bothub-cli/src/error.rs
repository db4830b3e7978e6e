use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T, E = CliError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("no credential found. Try 'bothub configure' to login first")]
    NoCredential,
    #[error("{0}")]
    InvalidCredential(String),
    #[error("{0}")]
    NotFound(String),
    #[error("no such user {0}")]
    UserNotFound(String),
    #[error("project {0} does not exist")]
    ProjectIdNotFound(i64),
    #[error("no such project: {0}")]
    ProjectNameNotFound(String),
    #[error("{0}")]
    Duplicated(String),
    #[error("project name {0} already exists. Please use another name")]
    ProjectNameDuplicated(String),
    #[error("{0}")]
    ImproperlyConfigured(String),
    #[error("failed to load bot handler: {0}")]
    ModuleLoad(String),
    #[error("bot handler failed: {0}")]
    HandlerFailed(String),
    #[error("project did not become online after {retries} status checks")]
    DeployFailed { retries: u32 },
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    InvalidValue(String),
    #[error("{0}")]
    Client(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("cancelled")]
    Cancelled,
    #[error("failed to access {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl CliError {
    /// Name printed in front of the message at the command boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::NoCredential => "NoCredential",
            CliError::InvalidCredential(_) => "InvalidCredential",
            CliError::NotFound(_) => "NotFound",
            CliError::UserNotFound(_) => "UserNotFound",
            CliError::ProjectIdNotFound(_) => "ProjectIdNotFound",
            CliError::ProjectNameNotFound(_) => "ProjectNameNotFound",
            CliError::Duplicated(_) => "Duplicated",
            CliError::ProjectNameDuplicated(_) => "ProjectNameDuplicated",
            CliError::ImproperlyConfigured(_) => "ImproperlyConfigured",
            CliError::ModuleLoad(_) => "ModuleLoadException",
            CliError::HandlerFailed(_) => "HandlerError",
            CliError::DeployFailed { .. } => "DeployFailed",
            CliError::Timeout => "Timeout",
            CliError::InvalidValue(_) => "InvalidValue",
            CliError::Client(_) => "ClientError",
            CliError::Transport(_) => "TransportError",
            CliError::Cancelled => "Cancel",
            CliError::Io { .. } => "IoError",
            CliError::Parse { .. } => "ParseError",
        }
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CliError::Io {
            source,
            path: path.as_ref().to_path_buf(),
        }
    }

    pub(crate) fn parse(path: impl AsRef<Path>, message: impl ToString) -> Self {
        CliError::Parse {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }
}
