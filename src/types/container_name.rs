// ABOUTME: Docker-compatible container name validation.
// ABOUTME: Names start alphanumeric, continue with [a-zA-Z0-9_.-], at most 76 characters.

use super::identifier::MAX_IDENTIFIER_LEN;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContainerNameError {
    #[error("container name cannot be empty")]
    Empty,

    #[error("container name {0:?} exceeds maximum length of 76 characters")]
    TooLong(String),

    #[error("container name {0:?} must start with a letter or digit")]
    InvalidStart(String),

    #[error("invalid character {1:?} in container name {0:?}")]
    InvalidChar(String, char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerName(String);

impl ContainerName {
    pub fn new(value: &str) -> Result<Self, ContainerNameError> {
        let Some(first) = value.chars().next() else {
            return Err(ContainerNameError::Empty);
        };

        if value.len() > MAX_IDENTIFIER_LEN {
            return Err(ContainerNameError::TooLong(value.to_string()));
        }

        if !first.is_ascii_alphanumeric() {
            return Err(ContainerNameError::InvalidStart(value.to_string()));
        }

        // Slash, colon and backslash fall out here along with everything else.
        for c in value.chars() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '.' && c != '-' {
                return Err(ContainerNameError::InvalidChar(value.to_string(), c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContainerName {
    type Error = ContainerNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<ContainerName> for String {
    fn from(value: ContainerName) -> Self {
        value.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
