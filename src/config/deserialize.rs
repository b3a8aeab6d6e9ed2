// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Validates namespace identifiers while parsing.

use serde::Deserialize;

use crate::types::Identifier;

pub fn deserialize_namespace<'de, D>(deserializer: D) -> Result<Identifier, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Identifier::new(&s).map_err(serde::de::Error::custom)
}

pub fn default_namespace() -> Identifier {
    Identifier::default_namespace()
}
