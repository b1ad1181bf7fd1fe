use serde_derive::Serialize;
use serde_json::Value;

use super::{
    schema::{self, keys, BACKUP_COMMAND_KEYS},
    ConfigErrorKind, ConfigResult,
};

/// A command whose standard output is backed up under a virtual path in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupCommand {
    command: Vec<String>,
    repo_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl BackupCommand {
    /// Build a [`BackupCommand`] from an element of `backup-commands`.
    ///
    /// # Errors
    ///
    /// * If the object has unknown keys or misses `command` or `repo-path`
    /// * If `command` is not a non-empty list of strings
    /// * If `repo-path` does not start with `/`
    pub fn from_value(value: &Value) -> ConfigResult<Self> {
        let object = schema::as_object(value, keys::BACKUP_COMMANDS)?;
        schema::check_properties(object, BACKUP_COMMAND_KEYS)?;

        let command = schema::string_list(schema::required(object, keys::COMMAND)?, keys::COMMAND)?;
        if command.is_empty() {
            return Err(ConfigErrorKind::EmptyCommand);
        }

        let repo_path =
            schema::as_str(schema::required(object, keys::REPO_PATH)?, keys::REPO_PATH)?;
        // restic can only address stdin snapshots by an absolute path
        if !repo_path.starts_with('/') {
            return Err(ConfigErrorKind::RepoPathWithoutSlash(repo_path.to_string()));
        }

        Ok(Self {
            command,
            repo_path: repo_path.to_string(),
            note: schema::optional_string(object, keys::NOTE)?,
        })
    }

    /// The full argument vector of the command, program first.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// The filename restic stores the command output under.
    pub fn repo_path(&self) -> &str {
        &self.repo_path
    }

    /// The note, if given.
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}
