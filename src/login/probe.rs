// ABOUTME: Verifies registry credentials by answering the /v2/ authentication challenges.
// ABOUTME: Handles Basic and Bearer schemes, redirects, and the plain HTTP fallback for local registries.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use super::config::{Credentials, ServerAddress};
use super::{ConnectionSnafu, LoginError, ServerMisbehavingSnafu, UnauthorizedSnafu};

/// Challenges answered before giving up.
const MAX_CHALLENGES: usize = 5;

/// Redirects followed before giving up.
const MAX_REDIRECTS: usize = 10;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth client id sent with token requests.
const CLIENT_ID: &str = "highk";

/// A parsed `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Lowercased scheme, `basic` or `bearer`.
    pub scheme: String,
    pub params: BTreeMap<String, String>,
}

/// Parse `Scheme key="value", key=value`. Quoted values may contain commas.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(char::is_whitespace) {
        Some((scheme, rest)) => (scheme, rest),
        None => (header, ""),
    };
    if scheme.is_empty() {
        return None;
    }

    let mut params = BTreeMap::new();
    let mut chars = rest.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        if chars.next() != Some('=') {
            return None;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    c => value.push(c),
                }
            }
            if !closed {
                return None;
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Some(Challenge {
        scheme: scheme.to_ascii_lowercase(),
        params,
    })
}

/// Whether `host[:port]` names the local machine.
pub fn is_localhost(host: &str) -> bool {
    let name = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.rsplit_once(':').map_or(host, |(h, _)| h)
    };
    name.eq_ignore_ascii_case("localhost") || name.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Checks credentials against one registry.
pub struct RegistryProbe {
    client: Client,
    registry: String,
    host: String,
    schemes: Vec<&'static str>,
}

impl RegistryProbe {
    /// HTTPS first; plain HTTP as well when `insecure` or for localhost
    /// registries not given as `https://`.
    pub fn new(address: &ServerAddress, insecure: bool) -> Result<Self, LoginError> {
        let mut schemes = vec!["https"];
        if insecure || (is_localhost(address.host()) && !address.explicit_https()) {
            schemes.push("http");
        }
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("highk/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context(ConnectionSnafu {
                url: address.host(),
            })?;
        Ok(Self {
            client,
            registry: address.key().to_string(),
            host: address.host().to_string(),
            schemes,
        })
    }

    fn misbehaving(&self, message: impl Into<String>) -> LoginError {
        ServerMisbehavingSnafu {
            registry: self.registry.clone(),
            message: message.into(),
        }
        .build()
    }

    fn unauthorized(&self) -> LoginError {
        UnauthorizedSnafu {
            registry: self.registry.clone(),
        }
        .build()
    }

    /// Verify `creds`; returns the identity token the registry issued, if any.
    pub async fn verify(&self, creds: &Credentials) -> Result<Option<String>, LoginError> {
        let mut schemes = self.schemes.iter().peekable();
        while let Some(scheme) = schemes.next() {
            match self.verify_with(scheme, creds).await {
                Err(e @ LoginError::Connection { .. }) if schemes.peek().is_some() => {
                    tracing::debug!("{}; retrying over the next scheme", e);
                }
                result => return result,
            }
        }
        Err(self.misbehaving("no usable scheme"))
    }

    async fn verify_with(
        &self,
        scheme: &str,
        creds: &Credentials,
    ) -> Result<Option<String>, LoginError> {
        let mut url = Url::parse(&format!("{}://{}/v2/", scheme, self.host))
            .map_err(|e| self.misbehaving(e.to_string()))?;
        let mut authorization: Option<String> = None;
        let mut identity_token = None;
        let mut last_challenge: Option<String> = None;
        let mut challenges = 0;
        let mut redirects = 0;

        loop {
            let mut request = self.client.get(url.clone());
            if let Some(value) = &authorization {
                request = request.header(AUTHORIZATION, value);
            }
            let response = request.send().await.context(ConnectionSnafu {
                url: url.to_string(),
            })?;
            let status = response.status();
            tracing::debug!("GET {} -> {}", url, status);

            if status.is_success() {
                return Ok(identity_token.or_else(|| creds.identity_token.clone()));
            }

            if status.is_redirection() {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(self.misbehaving("too many redirects"));
                }
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| self.misbehaving(format!("{} without Location", status)))?;
                let next = url
                    .join(location)
                    .map_err(|e| self.misbehaving(format!("bad redirect {:?}: {}", location, e)))?;
                if next.host_str() != url.host_str() || next.port_or_known_default() != url.port_or_known_default() {
                    authorization = None;
                    last_challenge = None;
                }
                url = next;
                continue;
            }

            if status != StatusCode::UNAUTHORIZED {
                return Err(self.misbehaving(format!("unexpected status {} from {}", status, url)));
            }

            challenges += 1;
            if challenges > MAX_CHALLENGES {
                return Err(self.misbehaving("too many authentication challenges"));
            }
            let header = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| self.misbehaving("401 without an authentication challenge"))?
                .to_string();
            if last_challenge.as_deref() == Some(header.as_str()) {
                return Err(self.unauthorized());
            }
            let challenge = parse_challenge(&header)
                .ok_or_else(|| self.misbehaving(format!("malformed challenge {:?}", header)))?;

            match challenge.scheme.as_str() {
                "basic" => {
                    let encoded = STANDARD.encode(format!("{}:{}", creds.username, creds.password));
                    authorization = Some(format!("Basic {}", encoded));
                }
                "bearer" => {
                    let (token, refresh) = self.fetch_token(&challenge, creds).await?;
                    authorization = Some(format!("Bearer {}", token));
                    if refresh.is_some() {
                        identity_token = refresh;
                    }
                }
                other => {
                    return Err(self.misbehaving(format!("unsupported authentication scheme {}", other)));
                }
            }
            last_challenge = Some(header);
        }
    }

    /// Get a bearer token: OAuth POST first, the token GET endpoint when POST is unsupported.
    async fn fetch_token(
        &self,
        challenge: &Challenge,
        creds: &Credentials,
    ) -> Result<(String, Option<String>), LoginError> {
        let realm = challenge
            .params
            .get("realm")
            .ok_or_else(|| self.misbehaving("bearer challenge without realm"))?;
        let realm = Url::parse(realm).map_err(|e| self.misbehaving(format!("bad realm {:?}: {}", realm, e)))?;
        let service = challenge.params.get("service").cloned().unwrap_or_default();
        let scope = challenge.params.get("scope").cloned().unwrap_or_default();

        let mut form = vec![
            ("client_id", CLIENT_ID.to_string()),
            ("service", service.clone()),
            ("scope", scope.clone()),
        ];
        match &creds.identity_token {
            Some(token) => {
                form.push(("grant_type", "refresh_token".to_string()));
                form.push(("refresh_token", token.clone()));
            }
            None => {
                form.push(("grant_type", "password".to_string()));
                form.push(("username", creds.username.clone()));
                form.push(("password", creds.password.clone()));
                form.push(("access_type", "offline".to_string()));
            }
        }

        let response = self
            .client
            .post(realm.clone())
            .form(&form)
            .send()
            .await
            .context(ConnectionSnafu {
                url: realm.to_string(),
            })?;
        let status = response.status();
        tracing::debug!("POST {} -> {}", realm, status);

        if status.is_success() {
            let body: TokenResponse = response
                .json()
                .await
                .map_err(|e| self.misbehaving(format!("unreadable token response: {}", e)))?;
            let token = body
                .access_token
                .or(body.token)
                .ok_or_else(|| self.misbehaving("token response without a token"))?;
            return Ok((token, body.refresh_token));
        }
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(self.unauthorized());
        }
        let unsupported = matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::BAD_REQUEST
        );
        if !unsupported || creds.identity_token.is_some() {
            return Err(self.misbehaving(format!("token endpoint returned {}", status)));
        }

        let mut url = realm;
        {
            let mut query = url.query_pairs_mut();
            if !service.is_empty() {
                query.append_pair("service", &service);
            }
            if !scope.is_empty() {
                query.append_pair("scope", &scope);
            }
            query.append_pair("account", &creds.username);
        }
        let response = self
            .client
            .get(url.clone())
            .basic_auth(&creds.username, Some(&creds.password))
            .send()
            .await
            .context(ConnectionSnafu {
                url: url.to_string(),
            })?;
        let status = response.status();
        tracing::debug!("GET {} -> {}", url, status);
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(self.unauthorized());
        }
        if !status.is_success() {
            return Err(self.misbehaving(format!("token endpoint returned {}", status)));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| self.misbehaving(format!("unreadable token response: {}", e)))?;
        let token = body
            .token
            .or(body.access_token)
            .ok_or_else(|| self.misbehaving("token response without a token"))?;
        Ok((token, None))
    }
}
