// ABOUTME: Docker config.json handling: server addresses, stored auths and credential helpers.
// ABOUTME: Unknown fields survive rewrites, and rewrites happen under an exclusive lock.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::helper;
use super::{
    BadAuthEncodingSnafu, ConfigIoSnafu, ConfigLockSnafu, InvalidServerSnafu, LoginError,
    MalformedConfigSnafu, read_file,
};
use crate::store::DirLock;

pub const CONFIG_FILE: &str = "config.json";

/// Key Docker Hub credentials are stored under.
pub const DOCKER_HUB_KEY: &str = "https://index.docker.io/v1/";

/// Host Docker Hub credentials are verified against.
pub const DOCKER_HUB_REGISTRY: &str = "registry-1.docker.io";

const DOCKER_HUB_ALIASES: &[&str] = &[
    "docker.io",
    "index.docker.io",
    "registry-1.docker.io",
    "registry.hub.docker.com",
];

/// Directory holding config.json: `$DOCKER_CONFIG`, else `~/.docker`.
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("DOCKER_CONFIG").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".docker")
}

/// A registry as named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    key: String,
    host: String,
    explicit_https: bool,
}

impl ServerAddress {
    /// Parse a registry address; `None` and Docker Hub aliases mean Docker Hub.
    pub fn parse(server: Option<&str>) -> Result<Self, LoginError> {
        let raw = server.map(str::trim).unwrap_or("");
        let explicit_https = raw.starts_with("https://");
        let stripped = raw
            .strip_prefix("https://")
            .or_else(|| raw.strip_prefix("http://"))
            .unwrap_or(raw);
        let host = stripped.split('/').next().unwrap_or("").to_ascii_lowercase();

        if raw.is_empty() || raw == DOCKER_HUB_KEY || DOCKER_HUB_ALIASES.contains(&host.as_str()) {
            return Ok(Self {
                key: DOCKER_HUB_KEY.to_string(),
                host: DOCKER_HUB_REGISTRY.to_string(),
                explicit_https: true,
            });
        }

        let valid = !host.is_empty()
            && !host.contains(char::is_whitespace)
            && reqwest::Url::parse(&format!("https://{}/", host))
                .is_ok_and(|u| u.host_str().is_some());
        if !valid {
            return InvalidServerSnafu { server: raw }.fail();
        }
        Ok(Self {
            key: host.clone(),
            host,
            explicit_https,
        })
    }

    /// Key in config.json and for credential helpers.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `host[:port]` the registry API is served from.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn explicit_https(&self) -> bool {
        self.explicit_https
    }

    /// Keys older tools may have used for the same registry.
    fn lookup_keys(&self) -> Vec<String> {
        if self.key == DOCKER_HUB_KEY {
            return vec![self.key.clone()];
        }
        vec![
            self.key.clone(),
            format!("https://{}", self.key),
            format!("http://{}", self.key),
        ]
    }
}

/// A login as stored or typed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// OAuth refresh token returned by the registry.
    pub identity_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("identity_token", &self.identity_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One entry under `auths`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identitytoken: Option<String>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// The parts of config.json this tool reads and writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DockerConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub auths: BTreeMap<String, AuthEntry>,
    #[serde(
        rename = "credsStore",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub creds_store: Option<String>,
    #[serde(
        rename = "credHelpers",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub cred_helpers: BTreeMap<String, String>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl DockerConfig {
    /// Load `path`; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self, LoginError> {
        match read_file(path)? {
            Some(text) if !text.trim().is_empty() => {
                serde_json::from_str(&text).context(MalformedConfigSnafu { path })
            }
            _ => Ok(Self::default()),
        }
    }

    /// Apply `change` to the file at `path` while holding an exclusive lock on it.
    pub fn update<T>(
        path: &Path,
        change: impl FnOnce(&mut DockerConfig) -> T,
    ) -> Result<T, LoginError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).context(ConfigIoSnafu { path: dir })?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(ConfigIoSnafu { path })?;
        let _lock = DirLock::acquire(path).map_err(|e| {
            ConfigLockSnafu {
                path,
                message: e.to_string(),
            }
            .build()
        })?;

        let mut config = Self::load(path)?;
        let result = change(&mut config);
        let text = serde_json::to_string_pretty(&config).context(MalformedConfigSnafu { path })?;
        file.set_len(0).context(ConfigIoSnafu { path })?;
        file.write_all(text.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .context(ConfigIoSnafu { path })?;
        set_private(path);
        Ok(result)
    }

    /// Where credentials for `address` live.
    pub fn store_for(&self, address: &ServerAddress) -> CredentialStore {
        if let Some(helper) = self.cred_helpers.get(address.key()) {
            return CredentialStore::Helper(helper.clone());
        }
        match &self.creds_store {
            Some(helper) if !helper.is_empty() => CredentialStore::Helper(helper.clone()),
            _ => CredentialStore::File,
        }
    }

    /// Credentials under `auths` for `address`.
    pub fn file_credentials(&self, address: &ServerAddress) -> Result<Option<Credentials>, LoginError> {
        let Some(entry) = address
            .lookup_keys()
            .iter()
            .find_map(|k| self.auths.get(k))
        else {
            return Ok(None);
        };
        let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(None);
        };
        let decoded = STANDARD
            .decode(auth)
            .ok()
            .and_then(|b| String::from_utf8(b).ok());
        let Some((username, password)) = decoded.as_deref().and_then(|d| d.split_once(':')) else {
            return BadAuthEncodingSnafu {
                server: address.key(),
            }
            .fail();
        };
        Ok(Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
            identity_token: entry.identitytoken.clone().filter(|t| !t.is_empty()),
        }))
    }
}

fn set_private(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::debug!("failed to restrict {}: {}", path.display(), e);
    }
}

/// Backend holding credentials for one registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStore {
    /// base64 `auth` in config.json.
    File,
    /// `docker-credential-<name>`.
    Helper(String),
}

impl CredentialStore {
    pub async fn get(
        &self,
        config: &DockerConfig,
        address: &ServerAddress,
    ) -> Result<Option<Credentials>, LoginError> {
        match self {
            CredentialStore::File => config.file_credentials(address),
            CredentialStore::Helper(name) => helper::get(name, address.key()).await,
        }
    }

    /// Save `creds`, preferring the identity token over the password.
    pub async fn store(
        &self,
        config_path: &Path,
        address: &ServerAddress,
        creds: &Credentials,
    ) -> Result<(), LoginError> {
        match self {
            CredentialStore::File => {
                let secret = if creds.identity_token.is_some() {
                    String::new()
                } else {
                    creds.password.clone()
                };
                let auth = STANDARD.encode(format!("{}:{}", creds.username, secret));
                DockerConfig::update(config_path, |config| {
                    let entry = config.auths.entry(address.key().to_string()).or_default();
                    entry.auth = Some(auth);
                    entry.identitytoken = creds.identity_token.clone();
                })
            }
            CredentialStore::Helper(name) => helper::store(name, address.key(), creds).await,
        }
    }

    /// Remove stored credentials, returning whether any existed.
    pub async fn erase(&self, config_path: &Path, address: &ServerAddress) -> Result<bool, LoginError> {
        let from_helper = match self {
            CredentialStore::Helper(name) => helper::erase(name, address.key()).await?,
            CredentialStore::File => false,
        };
        if !config_path.exists() {
            return Ok(from_helper);
        }
        let keys = address.lookup_keys();
        let from_file = DockerConfig::update(config_path, |config| {
            keys.iter()
                .filter(|k| config.auths.remove(k.as_str()).is_some())
                .count()
                > 0
        })?;
        Ok(from_helper || from_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_hub_aliases_share_one_key() {
        for server in [None, Some("docker.io"), Some("https://index.docker.io/v1/"), Some("registry-1.docker.io")] {
            let address = ServerAddress::parse(server).unwrap();
            assert_eq!(address.key(), DOCKER_HUB_KEY);
            assert_eq!(address.host(), DOCKER_HUB_REGISTRY);
        }
    }

    #[test]
    fn other_registries_are_keyed_by_host() {
        let address = ServerAddress::parse(Some("https://Registry.Example.com:5000/v2/")).unwrap();
        assert_eq!(address.key(), "registry.example.com:5000");
        assert!(address.explicit_https());

        let address = ServerAddress::parse(Some("localhost:5000")).unwrap();
        assert!(!address.explicit_https());

        assert!(matches!(
            ServerAddress::parse(Some("bad host")),
            Err(LoginError::InvalidServer { .. })
        ));
    }

    #[test]
    fn helpers_take_precedence_over_the_file() {
        let config: DockerConfig = serde_json::from_str(
            r#"{"credsStore":"desktop","credHelpers":{"ghcr.io":"gh"},"auths":{}}"#,
        )
        .unwrap();
        let ghcr = ServerAddress::parse(Some("ghcr.io")).unwrap();
        let quay = ServerAddress::parse(Some("quay.io")).unwrap();
        assert_eq!(config.store_for(&ghcr), CredentialStore::Helper("gh".into()));
        assert_eq!(config.store_for(&quay), CredentialStore::Helper("desktop".into()));
        assert_eq!(DockerConfig::default().store_for(&quay), CredentialStore::File);
    }

    #[test]
    fn file_credentials_decode_base64_auth() {
        let config: DockerConfig = serde_json::from_str(
            r#"{"auths":{"https://quay.io":{"auth":"dXNlcjpwYXNzOndvcmQ="}}}"#,
        )
        .unwrap();
        let address = ServerAddress::parse(Some("quay.io")).unwrap();
        let creds = config.file_credentials(&address).unwrap().unwrap();
        assert_eq!(creds.username, "user");
        assert_eq!(creds.password, "pass:word");

        let broken: DockerConfig =
            serde_json::from_str(r#"{"auths":{"quay.io":{"auth":"!!!"}}}"#).unwrap();
        assert!(matches!(
            broken.file_credentials(&address),
            Err(LoginError::BadAuthEncoding { .. })
        ));
    }

    #[tokio::test]
    async fn store_and_erase_keep_unrelated_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"proxies":{"default":{}},"auths":{"other.io":{"auth":"eDp5"}}}"#).unwrap();
        let address = ServerAddress::parse(Some("quay.io")).unwrap();
        let creds = Credentials {
            username: "me".into(),
            password: "secret".into(),
            identity_token: None,
        };

        CredentialStore::File.store(&path, &address, &creds).await.unwrap();
        let config = DockerConfig::load(&path).unwrap();
        assert!(config.other.contains_key("proxies"));
        assert_eq!(config.file_credentials(&address).unwrap(), Some(creds));

        assert!(CredentialStore::File.erase(&path, &address).await.unwrap());
        assert!(!CredentialStore::File.erase(&path, &address).await.unwrap());
        let config = DockerConfig::load(&path).unwrap();
        assert!(config.auths.contains_key("other.io"));
    }

    #[test]
    fn config_dir_follows_docker_config() {
        temp_env::with_var("DOCKER_CONFIG", Some("/tmp/dc"), || {
            assert_eq!(config_dir(), PathBuf::from("/tmp/dc"));
        });
    }
}
