// ABOUTME: Output formatting for CLI results: aligned tables, JSON and warnings.
// ABOUTME: Supports normal (table), quiet (first column only), and JSON output modes.

use serde::Serialize;
use std::io::Write;

use crate::diagnostics::Diagnostics;

/// Column gap used between table cells.
const PADDING: usize = 3;

/// Output mode for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Aligned table with a header row
    Normal,
    /// First column only, no header
    Quiet,
    /// One JSON object per line
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Print a plain result line.
    pub fn line(&self, message: &str) {
        println!("{message}");
    }

    /// Print `items` as a listing: table rows from `row`, or JSON lines.
    pub fn listing<T: Serialize>(
        &self,
        headers: &[&str],
        items: &[T],
        row: impl Fn(&T) -> Vec<String>,
    ) {
        match self.mode {
            OutputMode::Normal => {
                let rows: Vec<Vec<String>> = items.iter().map(&row).collect();
                print!("{}", render_table(headers, &rows));
            }
            OutputMode::Quiet => {
                for item in items {
                    if let Some(first) = row(item).into_iter().next() {
                        println!("{first}");
                    }
                }
            }
            OutputMode::Json => {
                for item in items {
                    match serde_json::to_string(item) {
                        Ok(json) => println!("{json}"),
                        Err(e) => tracing::warn!("failed to encode output: {}", e),
                    }
                }
            }
        }
    }

    /// Print `value` as indented JSON, the inspect format.
    pub fn document<T: Serialize + ?Sized>(&self, value: &T) -> serde_json::Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        println!("{json}");
        Ok(())
    }

    /// Print collected warnings on stderr.
    pub fn warnings(&self, diagnostics: &Diagnostics) {
        let mut stderr = std::io::stderr().lock();
        for warning in diagnostics.warnings() {
            let _ = writeln!(stderr, "WARN: {}", warning.message);
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        eprintln!("Error: {message}");
    }
}

/// Left-aligned columns separated by at least three spaces.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            let len = cell.chars().count();
            match widths.get_mut(i) {
                Some(w) => *w = (*w).max(len),
                None => widths.push(len),
            }
        }
    }

    let mut out = String::new();
    let header: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    for row in std::iter::once(&header).chain(rows) {
        let last = row.len().saturating_sub(1);
        for (i, cell) in row.iter().enumerate() {
            out.push_str(cell);
            if i < last {
                let pad = widths[i] - cell.chars().count() + PADDING;
                out.extend(std::iter::repeat_n(' ', pad));
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_align_on_the_widest_cell() {
        let table = render_table(
            &["NAME", "DRIVER"],
            &[
                vec!["data".to_string(), "local".to_string()],
                vec!["a-much-longer-name".to_string(), "local".to_string()],
            ],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], format!("NAME{}DRIVER", " ".repeat(17)));
        assert_eq!(lines[1], format!("data{}local", " ".repeat(17)));
        assert_eq!(lines[2], "a-much-longer-name   local");
    }

    #[test]
    fn empty_listing_prints_the_header() {
        assert_eq!(render_table(&["VOLUME NAME"], &[]), "VOLUME NAME\n");
    }
}
