// ABOUTME: Diagnostics accumulator for non-fatal warnings.
// ABOUTME: Collects warnings that shouldn't fail a command but should be shown to users.

/// Collects non-fatal warnings during container operations.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// A non-fatal warning.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// A filter value that is accepted but has no effect.
    pub fn ignored_filter(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::IgnoredFilter,
            message: message.into(),
        }
    }

    /// A task could not be inspected while matching filters.
    pub fn task_probe(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::TaskProbe,
            message: message.into(),
        }
    }

    /// A namespace resource could not be counted.
    pub fn namespace_count(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::NamespaceCount,
            message: message.into(),
        }
    }

    /// A best-effort cleanup step failed.
    pub fn cleanup(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Cleanup,
            message: message.into(),
        }
    }

    /// Credentials were stored without a credential helper.
    pub fn unencrypted_credentials(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::UnencryptedCredentials,
            message: message.into(),
        }
    }
}

/// Categories of non-fatal warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Filter value accepted for compatibility but ignored.
    IgnoredFilter,
    /// Task status lookup failed or timed out.
    TaskProbe,
    /// Container, image or volume count unavailable for a namespace.
    NamespaceCount,
    /// Cleanup of a secondary resource failed.
    Cleanup,
    /// Password stored base64-encoded in the auth config file.
    UnencryptedCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_starts_empty() {
        let diag = Diagnostics::default();
        assert!(!diag.has_warnings());
        assert!(diag.warnings().is_empty());
    }

    #[test]
    fn diagnostics_collects_warnings() {
        let mut diag = Diagnostics::default();

        diag.warn(Warning::ignored_filter("status=dead is ignored"));
        diag.warn(Warning::cleanup("failed to remove state dir"));

        assert!(diag.has_warnings());
        assert_eq!(diag.warnings().len(), 2);
    }

    #[test]
    fn warning_constructors_set_correct_kind() {
        assert_eq!(
            Warning::task_probe("x").kind,
            WarningKind::TaskProbe
        );
        assert_eq!(
            Warning::namespace_count("x").kind,
            WarningKind::NamespaceCount
        );
        assert_eq!(
            Warning::unencrypted_credentials("x").kind,
            WarningKind::UnencryptedCredentials
        );
    }
}
