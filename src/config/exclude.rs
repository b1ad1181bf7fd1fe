use serde_derive::Serialize;
use serde_json::Value;

use super::{
    schema::{self, keys, EXCLUDE_KEYS},
    ConfigErrorKind, ConfigResult,
};

/// The two ways an exclude can be written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExcludeSource {
    /// A bare pattern, e.g. `"*.tmp"`
    Pattern(String),
    /// An object carrying a pattern and an optional note,
    /// e.g. `{"pattern": "*.tmp", "note": "scratch"}`
    Annotated {
        /// The exclude pattern
        pattern: String,
        /// Free text describing the exclude
        note: Option<String>,
    },
}

impl TryFrom<&Value> for ExcludeSource {
    type Error = ConfigErrorKind;

    fn try_from(value: &Value) -> ConfigResult<Self> {
        match value {
            Value::String(pattern) => Ok(Self::Pattern(pattern.clone())),
            Value::Object(object) => {
                schema::check_properties(object, EXCLUDE_KEYS)?;
                let pattern =
                    schema::as_str(schema::required(object, keys::PATTERN)?, keys::PATTERN)?;
                Ok(Self::Annotated {
                    pattern: pattern.to_string(),
                    note: schema::optional_string(object, keys::NOTE)?,
                })
            }
            other => Err(ConfigErrorKind::UnexpectedExcludeType(schema::json_type(
                other,
            ))),
        }
    }
}

/// A single exclude rule of a [`BackupPath`](super::BackupPath).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclude {
    pattern: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl Exclude {
    /// Build an exclude from its parsed form. The pattern is trimmed.
    ///
    /// # Errors
    ///
    /// * [`ConfigErrorKind::EmptyExcludePattern`] if the trimmed pattern is empty
    pub fn new(source: ExcludeSource) -> ConfigResult<Self> {
        let (pattern, note) = match source {
            ExcludeSource::Pattern(pattern) => (pattern, None),
            ExcludeSource::Annotated { pattern, note } => (pattern, note),
        };
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(ConfigErrorKind::EmptyExcludePattern);
        }
        Ok(Self {
            pattern: pattern.to_string(),
            note,
        })
    }

    /// Build an exclude from an element of an `excludes` list.
    ///
    /// # Errors
    ///
    /// * If the element is neither string nor object
    /// * If the object has unknown keys or misses `pattern`
    /// * If the pattern is empty
    pub fn from_value(value: &Value) -> ConfigResult<Self> {
        Self::new(ExcludeSource::try_from(value)?)
    }

    /// The exclude pattern handed to restic.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The note, if given. Never used for restic calls.
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}
