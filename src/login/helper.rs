// ABOUTME: Runs docker-credential-<name> helpers for get, store and erase.
// ABOUTME: Helpers speak JSON on stdin/stdout; "not found" replies are not errors.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::config::Credentials;
use super::{HelperSnafu, LoginError};

/// Username a helper stores in place of a real one for identity tokens.
const TOKEN_USERNAME: &str = "<token>";

const NOT_FOUND_MESSAGE: &str = "credentials not found in native keychain";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperCredentials {
    #[serde(rename = "ServerURL", default)]
    server_url: String,
    username: String,
    secret: String,
}

struct HelperOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

async fn run(helper: &str, action: &str, input: &[u8]) -> Result<HelperOutput, LoginError> {
    let program = format!("docker-credential-{}", helper);
    let fail = |message: String| HelperSnafu { helper, message }.build();

    let mut child = Command::new(&program)
        .arg(action)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| fail(format!("failed to run {}: {}", program, e)))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input)
            .await
            .map_err(|e| fail(format!("failed to write to {}: {}", program, e)))?;
    }
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| fail(format!("failed to wait for {}: {}", program, e)))?;
    Ok(HelperOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

fn is_not_found(output: &HelperOutput) -> bool {
    output.stdout.contains(NOT_FOUND_MESSAGE) || output.stderr.contains(NOT_FOUND_MESSAGE)
}

fn failure_message(output: &HelperOutput) -> String {
    if output.stdout.is_empty() {
        output.stderr.clone()
    } else {
        output.stdout.clone()
    }
}

fn decode(helper: &str, stdout: &str) -> Result<Credentials, LoginError> {
    let parsed: HelperCredentials = serde_json::from_str(stdout).map_err(|e| {
        HelperSnafu {
            helper,
            message: format!("unreadable reply: {}", e),
        }
        .build()
    })?;
    Ok(if parsed.username == TOKEN_USERNAME {
        Credentials {
            username: String::new(),
            password: String::new(),
            identity_token: Some(parsed.secret),
        }
    } else {
        Credentials {
            username: parsed.username,
            password: parsed.secret,
            identity_token: None,
        }
    })
}

pub(super) async fn get(helper: &str, server: &str) -> Result<Option<Credentials>, LoginError> {
    let output = run(helper, "get", server.as_bytes()).await?;
    if !output.success {
        if is_not_found(&output) {
            return Ok(None);
        }
        return HelperSnafu {
            helper,
            message: failure_message(&output),
        }
        .fail();
    }
    decode(helper, &output.stdout).map(Some)
}

pub(super) async fn store(helper: &str, server: &str, creds: &Credentials) -> Result<(), LoginError> {
    let payload = match &creds.identity_token {
        Some(token) => HelperCredentials {
            server_url: server.to_string(),
            username: TOKEN_USERNAME.to_string(),
            secret: token.clone(),
        },
        None => HelperCredentials {
            server_url: server.to_string(),
            username: creds.username.clone(),
            secret: creds.password.clone(),
        },
    };
    let input = serde_json::to_vec(&payload).map_err(|e| {
        HelperSnafu {
            helper,
            message: e.to_string(),
        }
        .build()
    })?;
    let output = run(helper, "store", &input).await?;
    if !output.success {
        return HelperSnafu {
            helper,
            message: failure_message(&output),
        }
        .fail();
    }
    Ok(())
}

/// Returns false when the helper had nothing stored.
pub(super) async fn erase(helper: &str, server: &str) -> Result<bool, LoginError> {
    let output = run(helper, "erase", server.as_bytes()).await?;
    if output.success {
        return Ok(true);
    }
    if is_not_found(&output) {
        return Ok(false);
    }
    HelperSnafu {
        helper,
        message: failure_message(&output),
    }
    .fail()
}
