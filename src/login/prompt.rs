// ABOUTME: Interactive username/password prompts and --password-stdin reading.
// ABOUTME: Password prompts need a terminal; echo is turned off while typing.

use nix::sys::termios::{LocalFlags, SetArg, tcgetattr, tcsetattr};
use std::io::{BufRead, IsTerminal, Read, Write};

use super::{InvalidInputSnafu, LoginError, Prompter};

/// Prompts on the controlling terminal through stdin/stderr.
pub struct TerminalPrompter;

pub fn terminal_prompt() -> TerminalPrompter {
    TerminalPrompter
}

fn read_line() -> Result<String, LoginError> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).map_err(|e| {
        InvalidInputSnafu {
            message: format!("failed to read input: {}", e),
        }
        .build()
    })?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

impl Prompter for TerminalPrompter {
    fn username(&mut self, default: Option<&str>) -> Result<String, LoginError> {
        match default.filter(|d| !d.is_empty()) {
            Some(d) => eprint!("Username ({}): ", d),
            None => eprint!("Username: "),
        }
        let _ = std::io::stderr().flush();
        let line = read_line()?;
        Ok(match default {
            Some(d) if line.trim().is_empty() => d.to_string(),
            _ => line,
        })
    }

    fn password(&mut self) -> Result<String, LoginError> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return InvalidInputSnafu {
                message: "password prompt needs a terminal; use --password-stdin",
            }
            .fail();
        }
        eprint!("Password: ");
        let _ = std::io::stderr().flush();

        let saved = tcgetattr(&stdin).map_err(|e| {
            InvalidInputSnafu {
                message: format!("cannot configure terminal: {}", e),
            }
            .build()
        })?;
        let mut silent = saved.clone();
        silent.local_flags.remove(LocalFlags::ECHO);
        silent.local_flags.insert(LocalFlags::ECHONL);
        if let Err(e) = tcsetattr(&stdin, SetArg::TCSANOW, &silent) {
            tracing::debug!("cannot disable echo: {}", e);
        }
        let line = read_line();
        if let Err(e) = tcsetattr(&stdin, SetArg::TCSANOW, &saved) {
            tracing::warn!("failed to restore terminal: {}", e);
        }
        line
    }
}

/// Read a password from `reader`, dropping one trailing newline.
pub fn read_password_stdin(mut reader: impl Read) -> Result<String, LoginError> {
    let mut password = String::new();
    reader.read_to_string(&mut password).map_err(|e| {
        InvalidInputSnafu {
            message: format!("failed to read password from stdin: {}", e),
        }
        .build()
    })?;
    let password = password
        .strip_suffix('\n')
        .map(|p| p.strip_suffix('\r').unwrap_or(p))
        .unwrap_or(&password)
        .to_string();
    if password.is_empty() {
        return InvalidInputSnafu {
            message: "password is required",
        }
        .fail();
    }
    Ok(password)
}
