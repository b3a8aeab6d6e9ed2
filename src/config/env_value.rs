// ABOUTME: Environment values given with -e: literal KEY=VALUE or KEY taken from the host.
// ABOUTME: Unset host variables are dropped, as Docker does.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    Literal { key: String, value: String },
    FromEnv { var: String },
}

impl EnvValue {
    pub fn parse(arg: &str) -> Result<Self> {
        match arg.split_once('=') {
            Some(("", _)) => Err(Error::InvalidArgument(format!(
                "invalid environment variable: {}",
                arg
            ))),
            Some((key, value)) => Ok(EnvValue::Literal {
                key: key.to_string(),
                value: value.to_string(),
            }),
            None if arg.is_empty() => Err(Error::InvalidArgument(
                "invalid environment variable: empty".to_string(),
            )),
            None => Ok(EnvValue::FromEnv {
                var: arg.to_string(),
            }),
        }
    }

    /// `KEY=VALUE`, or `None` when the host variable is unset.
    pub fn resolve(&self) -> Option<String> {
        match self {
            EnvValue::Literal { key, value } => Some(format!("{}={}", key, value)),
            EnvValue::FromEnv { var } => std::env::var(var)
                .ok()
                .map(|value| format!("{}={}", var, value)),
        }
    }

    fn key(&self) -> &str {
        match self {
            EnvValue::Literal { key, .. } => key,
            EnvValue::FromEnv { var } => var,
        }
    }
}

/// Merge `-e` arguments over the image environment; later entries win.
pub fn resolve_env(image_env: &[String], args: &[String]) -> Result<Vec<String>> {
    let mut env: Vec<String> = image_env.to_vec();
    for arg in args {
        let value = EnvValue::parse(arg)?;
        let prefix = format!("{}=", value.key());
        env.retain(|e| !e.starts_with(&prefix));
        if let Some(resolved) = value.resolve() {
            env.push(resolved);
        }
    }
    Ok(env)
}
