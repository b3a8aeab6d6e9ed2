// ABOUTME: Graceful shutdown defaults and signal name parsing.
// ABOUTME: Accepts SIGTERM, TERM or 15 style signal specifications.

use nix::sys::signal::Signal;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_STOP_SIGNAL: Signal = Signal::SIGTERM;

/// Parse a signal given by name (with or without `SIG`) or number.
pub fn parse_signal(spec: &str) -> Result<Signal, String> {
    let spec = spec.trim();
    if let Ok(number) = spec.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| format!("invalid signal: {}", spec));
    }

    let upper = spec.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&name).map_err(|_| format!("invalid signal: {}", spec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_parse_by_name_or_number() {
        assert_eq!(parse_signal("SIGTERM"), Ok(Signal::SIGTERM));
        assert_eq!(parse_signal("kill"), Ok(Signal::SIGKILL));
        assert_eq!(parse_signal("2"), Ok(Signal::SIGINT));
        assert!(parse_signal("SIGNOPE").is_err());
        assert!(parse_signal("999").is_err());
    }
}
