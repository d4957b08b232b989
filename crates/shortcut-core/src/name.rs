use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A validated link name.
///
/// Names are non-empty and contain only ASCII letters, digits, `.`, `/`,
/// `-` or `_`. Normalization (case folding, `_` to `-`, ...) belongs to the
/// caller; the store treats a name as an opaque string.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LinkName(String);

impl LinkName {
    /// Creates a new `LinkName` after validating the input.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Creates a `LinkName` without validation.
    ///
    /// Use this only for names read back from a backend, which only ever
    /// persists validated names.
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks `name` against the allowed character class.
    pub fn validate(name: &str) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::InvalidName(
                "name must not be empty".to_string(),
            ));
        }

        if !name.chars().all(is_name_char) {
            return Err(ValidationError::InvalidName(format!(
                "must contain only letters, digits, '.', '/', '-' or '_': '{}'",
                name
            )));
        }

        Ok(())
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '/' | '-' | '_')
}

impl Display for LinkName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LinkName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LinkName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for LinkName {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LinkName> for String {
    fn from(value: LinkName) -> Self {
        value.0
    }
}
