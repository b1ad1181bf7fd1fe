//! Error types and Result module.

use displaydoc::Display;
use thiserror::Error;

use crate::{
    commands::CommandErrorKind, config::ConfigErrorKind, logging::LogErrorKind,
    runner::RunErrorKind,
};

/// Result type that is being returned from methods that can fail and thus have [`BackupError`]s.
pub type BackupResult<T> = Result<T, BackupError>;

// [`Error`] is public, but opaque and easy to keep compatible.
#[derive(Error, Debug)]
#[error(transparent)]
/// Errors that can result from restic-backup.
pub struct BackupError(#[from] BackupErrorKind);

// Accessors for anything we do want to expose publicly.
impl BackupError {
    /// Expose the inner error kind.
    ///
    /// This is useful for matching on the error kind.
    pub fn into_inner(self) -> BackupErrorKind {
        self.0
    }

    /// Borrow the inner error kind.
    pub fn kind(&self) -> &BackupErrorKind {
        &self.0
    }

    /// The [`ErrorCategory`] this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match &self.0 {
            BackupErrorKind::Config(err) => err.category(),
            BackupErrorKind::Command(_) => ErrorCategory::Usage,
            BackupErrorKind::Run(_) => ErrorCategory::Execution,
            BackupErrorKind::Log(_) => ErrorCategory::Io,
        }
    }
}

/// [`BackupErrorKind`] describes the errors that can happen while loading a configuration or
/// driving restic.
///
/// This is a non-exhaustive enum, so additional variants may be added in future. It is
/// recommended to match against the wildcard `_` instead of listing all possible variants,
/// to avoid problems when new variants are added.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BackupErrorKind {
    /// [`ConfigErrorKind`] describes the errors that can happen while reading and validating
    /// the configuration
    #[error(transparent)]
    Config(#[from] ConfigErrorKind),

    /// [`CommandErrorKind`] describes the errors that can happen while building restic
    /// command lines
    #[error(transparent)]
    Command(#[from] CommandErrorKind),

    /// [`RunErrorKind`] describes the errors that can happen while running restic or a
    /// producer command
    #[error(transparent)]
    Run(#[from] RunErrorKind),

    /// [`LogErrorKind`] describes the errors that can happen while managing log files
    #[error(transparent)]
    Log(#[from] LogErrorKind),
}

impl From<ConfigErrorKind> for BackupError {
    fn from(value: ConfigErrorKind) -> Self {
        Self(value.into())
    }
}

impl From<CommandErrorKind> for BackupError {
    fn from(value: CommandErrorKind) -> Self {
        Self(value.into())
    }
}

impl From<RunErrorKind> for BackupError {
    fn from(value: RunErrorKind) -> Self {
        Self(value.into())
    }
}

impl From<LogErrorKind> for BackupError {
    fn from(value: LogErrorKind) -> Self {
        Self(value.into())
    }
}

/// Coarse classification of errors, used to report what kind of rule was violated.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// unrecognized configuration key
    Schema,
    /// invalid configuration value
    Validation,
    /// configuration value of the wrong type
    Type,
    /// invalid command line usage
    Usage,
    /// configuration file not found
    ConfigNotFound,
    /// configuration file is not valid JSON
    Parse,
    /// external command failed
    Execution,
    /// i/o error
    Io,
}
