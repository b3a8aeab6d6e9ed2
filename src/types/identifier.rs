// ABOUTME: Identifier validation for namespaces and volume names.
// ABOUTME: Lowercase alphanumerics plus hyphen and underscore, at most 76 characters.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const MAX_IDENTIFIER_LEN: usize = 76;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier cannot be empty")]
    Empty,

    #[error("identifier {0:?} exceeds maximum length of 76 characters")]
    TooLong(String),

    #[error("identifier {0:?} must start with a letter or digit")]
    InvalidStart(String),

    #[error("invalid character {1:?} in identifier {0:?}")]
    InvalidChar(String, char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: &str) -> Result<Self, IdentifierError> {
        validate_identifier(value)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `default` namespace.
    pub fn default_namespace() -> Self {
        Self("default".to_string())
    }
}

pub fn validate_identifier(value: &str) -> Result<(), IdentifierError> {
    let Some(first) = value.chars().next() else {
        return Err(IdentifierError::Empty);
    };

    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(IdentifierError::TooLong(value.to_string()));
    }

    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(IdentifierError::InvalidStart(value.to_string()));
    }

    for c in value.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '_' {
            return Err(IdentifierError::InvalidChar(value.to_string(), c));
        }
    }

    Ok(())
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_identifier(&value)?;
        Ok(Self(value))
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
