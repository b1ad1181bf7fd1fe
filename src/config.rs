//! The configuration model, built from a JSON file.
//!
//! Every level of the file is closed: unknown keys are rejected.

mod backup_command;
mod backup_path;
mod exclude;
pub(crate) mod schema;

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf, MAIN_SEPARATOR},
};

use log::debug;
use path_dedot::ParseDot;
use serde::Serializer;
use serde_derive::Serialize;
use serde_json::Value;

use crate::error::ErrorCategory;

pub use self::{
    backup_command::BackupCommand,
    backup_path::BackupPath,
    exclude::{Exclude, ExcludeSource},
};
use self::schema::{keys, CONFIGURATION_KEYS};

/// restic is looked up in `PATH` unless `restic-path` says otherwise.
pub const DEFAULT_RESTIC_PATH: &str = "restic";

/// Log files are kept for two years unless `log-retention-days` says otherwise.
pub const DEFAULT_LOG_RETENTION_DAYS: u64 = 365 * 2;

/// [`ConfigErrorKind`] describes the errors that can happen while reading and validating
/// a configuration
#[derive(thiserror::Error, Debug, displaydoc::Display)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// config file `{path:?}` can not be read: `{source}`
    ConfigNotFound {
        path: PathBuf,
        source: std::io::Error,
    },
    /// config file `{path:?}` is not valid JSON: `{source}`
    InvalidJson {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// invalid property: '{0}'
    InvalidProperty(String),
    /// missing required property: '{0}'
    MissingProperty(&'static str),
    /// unexpected type for '{field}': expected {expected}, found {found}
    UnexpectedType {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    /// unexpected type for exclude element: {0}
    UnexpectedExcludeType(&'static str),
    /// value for '{0}' cannot be empty
    EmptyValue(&'static str),
    /// exclude pattern can not be empty
    EmptyExcludePattern,
    /// duplicate exclude path: '{0}'
    DuplicateExclude(String),
    /// duplicate path value: '{0}'
    DuplicatePath(String),
    /// environment must have keys and values
    InvalidEnvironment,
    /// value for 'log-retention-days' must be a non-negative integer, found {0}
    InvalidLogRetention(serde_json::Number),
    /// prune-policy must be [0,1] probability of running prune
    PrunePolicyOutOfRange(f64),
    /// command for backup-commands can not be empty
    EmptyCommand,
    /// repo path for commands must start with forward slash
    RepoPathWithoutSlash(String),
    /// no backup paths or commands defined
    NoBackupSources,
    /// removing dots from path `{path:?}` failed: `{source}`
    NormalizingPathFailed {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigErrorKind {
    /// The [`ErrorCategory`] of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigNotFound { .. } => ErrorCategory::ConfigNotFound,
            Self::InvalidJson { .. } => ErrorCategory::Parse,
            Self::InvalidProperty(_) => ErrorCategory::Schema,
            Self::UnexpectedType { .. }
            | Self::UnexpectedExcludeType(_)
            | Self::InvalidEnvironment => ErrorCategory::Type,
            Self::NormalizingPathFailed { .. } => ErrorCategory::Io,
            _ => ErrorCategory::Validation,
        }
    }
}

pub(crate) type ConfigResult<T> = Result<T, ConfigErrorKind>;

/// The validated configuration.
///
/// It is built once per run and never modified afterwards. The password is never serialized
/// and environment values are masked, so the serialized form is safe to log.
#[derive(Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    repository: String,
    #[serde(skip_serializing)]
    password: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_masked_environment"
    )]
    environment: Option<BTreeMap<String, String>>,
    restic_path: String,
    log_directory: String,
    log_retention_days: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    forget_policy: Option<Vec<String>>,
    prune_policy: f64,
    backup_commands: Vec<BackupCommand>,
    backup_paths: Vec<BackupPath>,
    #[serde(skip_serializing)]
    base_dir: PathBuf,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("repository", &self.repository)
            .field("password", &"***")
            .field(
                "environment",
                &self.environment.as_ref().map(|env| env.keys().collect::<Vec<_>>()),
            )
            .field("restic_path", &self.restic_path)
            .field("log_directory", &self.log_directory)
            .field("log_retention_days", &self.log_retention_days)
            .field("forget_policy", &self.forget_policy)
            .field("prune_policy", &self.prune_policy)
            .field("backup_commands", &self.backup_commands)
            .field("backup_paths", &self.backup_paths)
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

fn serialize_masked_environment<S>(
    environment: &Option<BTreeMap<String, String>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let masked = environment
        .iter()
        .flat_map(|env| env.keys().map(|key| (key, "***")));
    serializer.collect_map(masked)
}

impl Configuration {
    /// Read and validate the configuration file at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - The JSON configuration file
    /// * `base_dir` - The directory relative `restic-path` and `log-directory` values are
    ///   resolved against
    ///
    /// # Errors
    ///
    /// * [`ConfigErrorKind::ConfigNotFound`] if the file can not be read
    /// * [`ConfigErrorKind::InvalidJson`] if the file is not valid JSON
    /// * Any validation error of [`Configuration::from_value`]
    pub fn from_file(path: impl AsRef<Path>, base_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let path = path.as_ref();
        debug!("reading configuration from {}", path.display());
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigErrorKind::ConfigNotFound {
                path: path.to_path_buf(),
                source,
            })?;
        let value: Value =
            serde_json::from_str(&content).map_err(|source| ConfigErrorKind::InvalidJson {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_value(&value, base_dir)
    }

    /// Validate an already parsed configuration document.
    ///
    /// Fields are checked in a fixed order and the first violation is returned.
    ///
    /// # Errors
    ///
    /// * [`ConfigErrorKind::InvalidProperty`] for an unknown key on any level
    /// * [`ConfigErrorKind::MissingProperty`] for a missing required key
    /// * [`ConfigErrorKind::UnexpectedType`] for a value of the wrong JSON type
    /// * Validation errors for empty values, an out-of-range prune policy, duplicates or no sources
    pub fn from_value(value: &Value, base_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let object = schema::as_object(value, "configuration")?;
        schema::check_properties(object, CONFIGURATION_KEYS)?;

        let repository = schema::required_trimmed(object, keys::REPOSITORY)?;

        let environment = object
            .get(keys::ENVIRONMENT)
            .map(|value| {
                value
                    .as_object()
                    .ok_or(ConfigErrorKind::InvalidEnvironment)?
                    .iter()
                    .map(|(key, value)| {
                        value
                            .as_str()
                            .map(|value| (key.clone(), value.to_string()))
                            .ok_or(ConfigErrorKind::InvalidEnvironment)
                    })
                    .collect::<ConfigResult<BTreeMap<_, _>>>()
            })
            .transpose()?;

        let password = schema::required_trimmed(object, keys::PASSWORD)?;
        let log_directory = schema::required_trimmed(object, keys::LOG_DIRECTORY)?;

        let log_retention_days = match object.get(keys::LOG_RETENTION_DAYS) {
            None => DEFAULT_LOG_RETENTION_DAYS,
            Some(Value::Number(days)) => days
                .as_u64()
                .ok_or_else(|| ConfigErrorKind::InvalidLogRetention(days.clone()))?,
            Some(other) => {
                return Err(schema::unexpected_type(
                    keys::LOG_RETENTION_DAYS,
                    "integer",
                    other,
                ))
            }
        };

        let forget_policy = schema::forget_policy(object)?;

        let prune_policy = match object.get(keys::PRUNE_POLICY) {
            None => 0.0,
            Some(value) => value
                .as_f64()
                .ok_or_else(|| schema::unexpected_type(keys::PRUNE_POLICY, "number", value))?,
        };
        if !(0.0..=1.0).contains(&prune_policy) {
            return Err(ConfigErrorKind::PrunePolicyOutOfRange(prune_policy));
        }

        let backup_commands = schema::optional_array(object, keys::BACKUP_COMMANDS)?
            .map(|values| {
                values
                    .iter()
                    .map(BackupCommand::from_value)
                    .collect::<ConfigResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let backup_paths = schema::optional_array(object, keys::BACKUP_PATHS)?
            .map(|values| {
                values
                    .iter()
                    .map(BackupPath::from_value)
                    .collect::<ConfigResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        if let Some(path) = schema::first_duplicate(backup_paths.iter().map(BackupPath::path)) {
            return Err(ConfigErrorKind::DuplicatePath(path.to_string()));
        }

        if backup_paths.is_empty() && backup_commands.is_empty() {
            return Err(ConfigErrorKind::NoBackupSources);
        }

        let restic_path = match object.get(keys::RESTIC_PATH) {
            None => DEFAULT_RESTIC_PATH.to_string(),
            Some(value) => {
                let restic_path = schema::as_str(value, keys::RESTIC_PATH)?.trim();
                if restic_path.is_empty() {
                    return Err(ConfigErrorKind::EmptyValue(keys::RESTIC_PATH));
                }
                restic_path.to_string()
            }
        };

        Ok(Self {
            repository,
            password,
            environment,
            restic_path,
            log_directory,
            log_retention_days,
            forget_policy,
            prune_policy,
            backup_commands,
            backup_paths,
            base_dir: base_dir.into(),
        })
    }

    /// The repository address handed to restic via `--repo`.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The repository password. Only meant for the `password` operation.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Extra environment variables for restic calls.
    pub fn environment(&self) -> Option<&BTreeMap<String, String>> {
        self.environment.as_ref()
    }

    /// Whether extra environment variables are configured.
    pub fn has_environment(&self) -> bool {
        self.environment.is_some()
    }

    /// The configured restic executable, as written.
    pub fn restic_path(&self) -> &str {
        &self.restic_path
    }

    /// The configured log directory, as written.
    pub fn log_directory(&self) -> &str {
        &self.log_directory
    }

    /// Number of days log files are kept.
    pub fn log_retention_days(&self) -> u64 {
        self.log_retention_days
    }

    /// The global forget policy.
    pub fn forget_policy(&self) -> Option<&[String]> {
        self.forget_policy.as_deref()
    }

    /// Probability of running forget/prune/check after a backup.
    pub fn prune_policy(&self) -> f64 {
        self.prune_policy
    }

    /// The command sources, in configuration order.
    pub fn backup_commands(&self) -> &[BackupCommand] {
        &self.backup_commands
    }

    /// The path sources, in configuration order.
    pub fn backup_paths(&self) -> &[BackupPath] {
        &self.backup_paths
    }

    /// The directory relative paths are resolved against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `restic-path` as absolute path.
    ///
    /// # Errors
    ///
    /// * If the joined path can not be normalized
    pub fn restic_path_absolute(&self) -> ConfigResult<PathBuf> {
        self.absolute(&self.restic_path)
    }

    /// `log-directory` as absolute path.
    ///
    /// # Errors
    ///
    /// * If the joined path can not be normalized
    pub fn log_directory_absolute(&self) -> ConfigResult<PathBuf> {
        self.absolute(&self.log_directory)
    }

    /// The program to call for restic.
    ///
    /// A bare command name like the default `restic` is returned as is so it is looked up in
    /// `PATH`, everything else is resolved with [`Configuration::restic_path_absolute`].
    ///
    /// # Errors
    ///
    /// * If the joined path can not be normalized
    pub fn restic_program(&self) -> ConfigResult<String> {
        if self.restic_path.contains(['/', MAIN_SEPARATOR]) {
            Ok(self.restic_path_absolute()?.to_string_lossy().into_owned())
        } else {
            Ok(self.restic_path.clone())
        }
    }

    fn absolute(&self, value: &str) -> ConfigResult<PathBuf> {
        let path = Path::new(value);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let joined = self.base_dir.join(path);
        let normalized = joined
            .parse_dot()
            .map_err(|source| ConfigErrorKind::NormalizingPathFailed {
                path: joined.clone(),
                source,
            })?
            .to_path_buf();
        Ok(normalized)
    }
}
