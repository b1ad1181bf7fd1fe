use serde_derive::Serialize;
use serde_json::Value;

use super::{
    exclude::Exclude,
    schema::{self, keys, BACKUP_PATH_KEYS},
    ConfigErrorKind, ConfigResult,
};

/// A filesystem location to back up, with its own excludes and optional forget policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupPath {
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    forget_policy: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    excludes: Option<Vec<Exclude>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl BackupPath {
    /// Build a [`BackupPath`] from an element of `backup-paths`.
    ///
    /// The path is kept exactly as written; existence is not checked.
    ///
    /// # Errors
    ///
    /// * If the object has unknown keys or misses `path`
    /// * If an exclude is invalid
    /// * [`ConfigErrorKind::DuplicateExclude`] if two excludes have the same pattern
    pub fn from_value(value: &Value) -> ConfigResult<Self> {
        let object = schema::as_object(value, keys::BACKUP_PATHS)?;
        schema::check_properties(object, BACKUP_PATH_KEYS)?;

        let path = schema::as_str(schema::required(object, keys::PATH)?, keys::PATH)?.to_string();
        let forget_policy = schema::forget_policy(object)?;

        let excludes = schema::optional_array(object, keys::EXCLUDES)?
            .map(|values| values.iter().map(Exclude::from_value).collect::<ConfigResult<Vec<_>>>())
            .transpose()?;
        if let Some(excludes) = &excludes {
            if let Some(pattern) = schema::first_duplicate(excludes.iter().map(Exclude::pattern)) {
                return Err(ConfigErrorKind::DuplicateExclude(pattern.to_string()));
            }
        }

        Ok(Self {
            path,
            forget_policy,
            excludes,
            note: schema::optional_string(object, keys::NOTE)?,
        })
    }

    /// The path to back up.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The forget policy overriding the global one for this path.
    pub fn forget_policy(&self) -> Option<&[String]> {
        self.forget_policy.as_deref()
    }

    /// The excludes, `None` if the `excludes` key was not given.
    pub fn excludes(&self) -> Option<&[Exclude]> {
        self.excludes.as_deref()
    }

    /// The note, if given.
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Whether the `excludes` key was given.
    pub fn has_excludes(&self) -> bool {
        self.excludes.is_some()
    }

    /// Whether this path overrides the global forget policy.
    pub fn has_forget_override(&self) -> bool {
        self.forget_policy.is_some()
    }
}
