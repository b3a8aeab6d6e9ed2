// ABOUTME: Registry login and logout against Docker-compatible credential stores.
// ABOUTME: Credentials are verified with the registry before they are saved.

mod config;
mod helper;
mod probe;
mod prompt;

pub use config::{AuthEntry, CredentialStore, Credentials, DockerConfig, ServerAddress, config_dir};
pub use probe::{Challenge, RegistryProbe, is_localhost, parse_challenge};
pub use prompt::{TerminalPrompter, read_password_stdin, terminal_prompt};

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

use crate::diagnostics::{Diagnostics, Warning};
use crate::error::ErrorKind;

/// Login failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LoginError {
    #[snafu(display("failed to access {}: {source}", path.display()))]
    ConfigIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to lock {}: {message}", path.display()))]
    ConfigLock { path: PathBuf, message: String },

    #[snafu(display("invalid registry address {server:?}"))]
    InvalidServer { server: String },

    #[snafu(display("{message}"))]
    InvalidInput { message: String },

    #[snafu(display("cannot read credentials from {}: {source}", path.display()))]
    MalformedConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("cannot decode stored credentials for {server}"))]
    BadAuthEncoding { server: String },

    #[snafu(display("credential helper docker-credential-{helper} failed: {message}"))]
    Helper { helper: String, message: String },

    #[snafu(display("failed to reach {url}: {source}"))]
    Connection { url: String, source: reqwest::Error },

    #[snafu(display("registry {registry} misbehaved: {message}"))]
    ServerMisbehaving { registry: String, message: String },

    #[snafu(display("unauthorized: incorrect username or password for {registry}"))]
    Unauthorized { registry: String },
}

/// Login error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginErrorKind {
    SystemBroken,
    InvalidArgument,
    CredentialsCannotBeRead,
    ConnectionFailed,
    ServerMisbehaving,
    AuthenticationFailure,
}

impl LoginError {
    /// Returns the login-specific category of this error.
    pub fn category(&self) -> LoginErrorKind {
        match self {
            LoginError::ConfigIo { .. } | LoginError::ConfigLock { .. } => {
                LoginErrorKind::SystemBroken
            }
            LoginError::InvalidServer { .. } | LoginError::InvalidInput { .. } => {
                LoginErrorKind::InvalidArgument
            }
            LoginError::MalformedConfig { .. }
            | LoginError::BadAuthEncoding { .. }
            | LoginError::Helper { .. } => LoginErrorKind::CredentialsCannotBeRead,
            LoginError::Connection { .. } => LoginErrorKind::ConnectionFailed,
            LoginError::ServerMisbehaving { .. } => LoginErrorKind::ServerMisbehaving,
            LoginError::Unauthorized { .. } => LoginErrorKind::AuthenticationFailure,
        }
    }

    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ErrorKind {
        match self.category() {
            LoginErrorKind::SystemBroken | LoginErrorKind::CredentialsCannotBeRead => {
                ErrorKind::SystemBroken
            }
            LoginErrorKind::InvalidArgument => ErrorKind::InvalidArgument,
            LoginErrorKind::ConnectionFailed => ErrorKind::ConnectionFailed,
            LoginErrorKind::ServerMisbehaving => ErrorKind::ServerMisbehaving,
            LoginErrorKind::AuthenticationFailure => ErrorKind::AuthenticationFailure,
        }
    }
}

/// Source of interactive input while logging in.
pub trait Prompter {
    fn username(&mut self, default: Option<&str>) -> Result<String, LoginError>;
    fn password(&mut self) -> Result<String, LoginError>;
}

#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    /// Registry address; Docker Hub when `None`.
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Registries that may be reached over plain HTTP.
    pub insecure_registry: bool,
}

/// What a successful login did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    /// Config key the credentials are stored under.
    pub server: String,
    /// Stored credentials were valid and reused.
    pub reused: bool,
}

/// Verify credentials for `options.server` and save them.
pub async fn login(
    options: &LoginOptions,
    prompter: &mut dyn Prompter,
    diagnostics: &mut Diagnostics,
) -> Result<LoginOutcome, LoginError> {
    let address = ServerAddress::parse(options.server.as_deref())?;
    let config_path = config_dir().join(config::CONFIG_FILE);
    let docker_config = DockerConfig::load(&config_path)?;
    let store = docker_config.store_for(&address);
    let probe = RegistryProbe::new(&address, options.insecure_registry)?;

    let stored = store.get(&docker_config, &address).await?;
    if options.username.is_none()
        && options.password.is_none()
        && let Some(ref creds) = stored
    {
        match probe.verify(creds).await {
            Ok(_) => {
                tracing::debug!("stored credentials for {} are valid", address.key());
                return Ok(LoginOutcome {
                    server: address.key().to_string(),
                    reused: true,
                });
            }
            Err(e) if e.category() == LoginErrorKind::AuthenticationFailure => {
                tracing::debug!("stored credentials for {} rejected", address.key());
            }
            Err(e) => return Err(e),
        }
    }

    let username = match &options.username {
        Some(u) => u.clone(),
        None => prompter.username(stored.as_ref().map(|c| c.username.as_str()))?,
    };
    let username = username.trim().to_string();
    if username.is_empty() {
        return InvalidInputSnafu {
            message: "username is required",
        }
        .fail();
    }
    let password = match &options.password {
        Some(p) => p.clone(),
        None => prompter.password()?,
    };
    if password.is_empty() {
        return InvalidInputSnafu {
            message: "password is required",
        }
        .fail();
    }

    let creds = Credentials {
        username,
        password,
        identity_token: None,
    };
    let identity_token = probe.verify(&creds).await?;
    let saved = Credentials {
        identity_token,
        ..creds
    };
    store.store(&config_path, &address, &saved).await?;
    if matches!(store, CredentialStore::File) {
        diagnostics.warn(Warning::unencrypted_credentials(format!(
            "your password will be stored unencrypted in {}; configure a credential helper to remove this warning",
            config_path.display()
        )));
    }
    tracing::info!("logged in to {}", address.key());
    Ok(LoginOutcome {
        server: address.key().to_string(),
        reused: false,
    })
}

/// Erase stored credentials for `server`. Returns whether anything was removed.
pub async fn logout(server: Option<&str>) -> Result<bool, LoginError> {
    let address = ServerAddress::parse(server)?;
    let config_path = config_dir().join(config::CONFIG_FILE);
    let docker_config = DockerConfig::load(&config_path)?;
    let store = docker_config.store_for(&address);
    let removed = store.erase(&config_path, &address).await?;
    if removed {
        tracing::info!("removed credentials for {}", address.key());
    }
    Ok(removed)
}

/// Read `path` fully, mapping failures into login errors.
pub(crate) fn read_file(path: &std::path::Path) -> Result<Option<String>, LoginError> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(ConfigIoSnafu { path }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_error_kinds() {
        let e = LoginError::Unauthorized {
            registry: "r".into(),
        };
        assert_eq!(e.category(), LoginErrorKind::AuthenticationFailure);
        assert_eq!(e.kind(), ErrorKind::AuthenticationFailure);

        let e = LoginError::BadAuthEncoding { server: "r".into() };
        assert_eq!(e.category(), LoginErrorKind::CredentialsCannotBeRead);

        let e = LoginError::ServerMisbehaving {
            registry: "r".into(),
            message: "too many challenges".into(),
        };
        assert_eq!(e.kind(), ErrorKind::ServerMisbehaving);
    }
}
