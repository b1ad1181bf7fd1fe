//! Closed-world key checking and JSON shape helpers used while building the configuration model.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::{ConfigErrorKind, ConfigResult};

/// Names of the keys as they appear in the configuration file.
pub(crate) mod keys {
    pub(crate) const REPOSITORY: &str = "repository";
    pub(crate) const PASSWORD: &str = "password";
    pub(crate) const ENVIRONMENT: &str = "environment";
    pub(crate) const RESTIC_PATH: &str = "restic-path";
    pub(crate) const LOG_DIRECTORY: &str = "log-directory";
    pub(crate) const LOG_RETENTION_DAYS: &str = "log-retention-days";
    pub(crate) const FORGET_POLICY: &str = "forget-policy";
    pub(crate) const PRUNE_POLICY: &str = "prune-policy";
    pub(crate) const BACKUP_COMMANDS: &str = "backup-commands";
    pub(crate) const BACKUP_PATHS: &str = "backup-paths";
    pub(crate) const NOTE: &str = "note";

    pub(crate) const PATH: &str = "path";
    pub(crate) const EXCLUDES: &str = "excludes";

    pub(crate) const COMMAND: &str = "command";
    pub(crate) const REPO_PATH: &str = "repo-path";

    pub(crate) const PATTERN: &str = "pattern";
}

/// Keys recognized at the top level of the configuration.
pub(crate) const CONFIGURATION_KEYS: &[&str] = &[
    keys::REPOSITORY,
    keys::PASSWORD,
    keys::ENVIRONMENT,
    keys::RESTIC_PATH,
    keys::LOG_DIRECTORY,
    keys::LOG_RETENTION_DAYS,
    keys::FORGET_POLICY,
    keys::PRUNE_POLICY,
    keys::BACKUP_COMMANDS,
    keys::BACKUP_PATHS,
    keys::NOTE,
];

/// Keys recognized in an entry of `backup-paths`.
pub(crate) const BACKUP_PATH_KEYS: &[&str] = &[
    keys::PATH,
    keys::FORGET_POLICY,
    keys::NOTE,
    keys::EXCLUDES,
];

/// Keys recognized in an entry of `backup-commands`.
pub(crate) const BACKUP_COMMAND_KEYS: &[&str] = &[keys::COMMAND, keys::REPO_PATH, keys::NOTE];

/// Keys recognized in an exclude given as object.
pub(crate) const EXCLUDE_KEYS: &[&str] = &[keys::PATTERN, keys::NOTE];

/// Check that `object` only contains keys from `allowed`.
///
/// # Errors
///
/// * [`ConfigErrorKind::InvalidProperty`] naming the first unknown key in document order
pub fn check_properties(object: &Map<String, Value>, allowed: &[&str]) -> ConfigResult<()> {
    match object.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(ConfigErrorKind::InvalidProperty(key.clone())),
        None => Ok(()),
    }
}

/// Name of the JSON type of `value`, used in error messages.
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn unexpected_type(
    field: &'static str,
    expected: &'static str,
    value: &Value,
) -> ConfigErrorKind {
    ConfigErrorKind::UnexpectedType {
        field,
        expected,
        found: json_type(value),
    }
}

pub(crate) fn as_object<'a>(
    value: &'a Value,
    field: &'static str,
) -> ConfigResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| unexpected_type(field, "object", value))
}

pub(crate) fn required<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
) -> ConfigResult<&'a Value> {
    object
        .get(field)
        .ok_or(ConfigErrorKind::MissingProperty(field))
}

pub(crate) fn as_str<'a>(value: &'a Value, field: &'static str) -> ConfigResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| unexpected_type(field, "string", value))
}

/// A required string which must not be empty after trimming. Returns the trimmed value.
pub(crate) fn required_trimmed(
    object: &Map<String, Value>,
    field: &'static str,
) -> ConfigResult<String> {
    let value = as_str(required(object, field)?, field)?.trim();
    if value.is_empty() {
        return Err(ConfigErrorKind::EmptyValue(field));
    }
    Ok(value.to_string())
}

pub(crate) fn optional_string(
    object: &Map<String, Value>,
    field: &'static str,
) -> ConfigResult<Option<String>> {
    object
        .get(field)
        .map(|value| as_str(value, field).map(str::to_string))
        .transpose()
}

pub(crate) fn optional_array<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
) -> ConfigResult<Option<&'a Vec<Value>>> {
    object
        .get(field)
        .map(|value| {
            value
                .as_array()
                .ok_or_else(|| unexpected_type(field, "array", value))
        })
        .transpose()
}

pub(crate) fn string_list(value: &Value, field: &'static str) -> ConfigResult<Vec<String>> {
    let expected = "array of strings";
    value
        .as_array()
        .ok_or_else(|| unexpected_type(field, expected, value))?
        .iter()
        .map(|element| {
            element
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| unexpected_type(field, expected, element))
        })
        .collect()
}

/// An optional forget policy. An empty list is the same as no policy.
pub(crate) fn forget_policy(object: &Map<String, Value>) -> ConfigResult<Option<Vec<String>>> {
    Ok(object
        .get(keys::FORGET_POLICY)
        .map(|value| string_list(value, keys::FORGET_POLICY))
        .transpose()?
        .filter(|policy| !policy.is_empty()))
}

/// Returns the first element (in order) which occurs more than once.
pub(crate) fn first_duplicate<'a>(
    values: impl IntoIterator<Item = &'a str> + Clone,
) -> Option<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values.clone() {
        *counts.entry(value).or_default() += 1;
    }
    values.into_iter().find(|value| counts[value] > 1)
}
