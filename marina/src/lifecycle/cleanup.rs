//! Aggregated result of best-effort cleanup.
//!
//! Cleanup operations never raise: each one is attempted on its own and a
//! failure is recorded here, so one failed removal cannot prevent the next
//! and cannot mask the build's own result.

use std::fmt;

use marina_shared::errors::MarinaResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    /// What was being cleaned up, e.g. `stop container 3f2a...`
    pub operation: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    warnings: Vec<CleanupWarning>,
}

impl CleanupReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one cleanup operation.
    pub fn record<T>(&mut self, operation: impl Into<String>, result: MarinaResult<T>) {
        if let Err(e) = result {
            self.warnings.push(CleanupWarning {
                operation: operation.into(),
                error: e.to_string(),
            });
        }
    }

    pub fn merge(&mut self, other: CleanupReport) {
        self.warnings.extend(other.warnings);
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn warnings(&self) -> &[CleanupWarning] {
        &self.warnings
    }

    /// Emit one log line per failed operation.
    pub fn log(&self) {
        for w in &self.warnings {
            tracing::warn!(operation = %w.operation, "cleanup failed: {}", w.error);
        }
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.warnings.is_empty() {
            return f.write_str("cleanup completed");
        }
        write!(f, "{} cleanup operation(s) failed:", self.warnings.len())?;
        for w in &self.warnings {
            write!(f, "\n  {}: {}", w.operation, w.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marina_shared::errors::MarinaError;

    #[test]
    fn test_record_keeps_only_failures() {
        let mut report = CleanupReport::new();
        report.record("stop container a", Ok(()));
        report.record::<()>(
            "remove container a",
            Err(MarinaError::Engine("conflict".into())),
        );
        report.record::<()>("remove image x", Err(MarinaError::Engine("busy".into())));

        assert!(!report.is_clean());
        assert_eq!(report.warnings().len(), 2);
        assert_eq!(report.warnings()[0].operation, "remove container a");
        assert!(report.to_string().starts_with("2 cleanup operation(s) failed:"));
    }

    #[test]
    fn test_merge() {
        let mut a = CleanupReport::new();
        let mut b = CleanupReport::new();
        b.record::<()>("delete dir", Err(MarinaError::Storage("denied".into())));
        a.merge(b);
        assert_eq!(a.warnings().len(), 1);
        assert_eq!(CleanupReport::new().to_string(), "cleanup completed");
    }
}
