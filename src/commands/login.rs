// ABOUTME: login and logout command handlers.
// ABOUTME: Collects credentials from flags, stdin or the terminal and reports the outcome.

use super::context::Context;
use highk::diagnostics::Diagnostics;
use highk::error::{Error, Result};
use highk::login::{LoginOptions, read_password_stdin, terminal_prompt};
use highk::output::{Output, OutputMode};

pub async fn login(
    ctx: &Context,
    server: Option<String>,
    username: Option<String>,
    password: Option<String>,
    password_stdin: bool,
) -> Result<()> {
    let password = match (password, password_stdin) {
        (Some(_), true) => {
            return Err(Error::InvalidArgument(
                "--password and --password-stdin are mutually exclusive".to_string(),
            ));
        }
        (None, true) => {
            if username.is_none() {
                return Err(Error::InvalidArgument(
                    "must provide --username with --password-stdin".to_string(),
                ));
            }
            Some(read_password_stdin(std::io::stdin().lock())?)
        }
        (Some(password), false) => {
            eprintln!("WARNING! Using --password via the CLI is insecure. Use --password-stdin.");
            Some(password)
        }
        (None, false) => None,
    };

    let options = LoginOptions {
        server,
        username,
        password,
        insecure_registry: ctx.config.insecure_registry,
    };
    let mut diag = Diagnostics::default();
    let mut prompter = terminal_prompt();
    let outcome = highk::login::login(&options, &mut prompter, &mut diag).await?;

    let output = Output::new(OutputMode::Normal);
    output.warnings(&diag);
    if outcome.reused {
        tracing::debug!("reused stored credentials for {}", outcome.server);
    }
    output.line("Login Succeeded");
    Ok(())
}

pub async fn logout(server: Option<&str>) -> Result<()> {
    let address = server.unwrap_or("docker.io");
    if highk::login::logout(server).await? {
        println!("Removing login credentials for {address}");
    } else {
        println!("Not logged in to {address}");
    }
    Ok(())
}
