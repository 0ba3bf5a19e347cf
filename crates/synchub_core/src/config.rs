//! Metadata provider configuration.

/// Configuration for a metadata provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    /// Maximum number of log entries one change query scans.
    ///
    /// `None` scans to the end of the log. With a limit, the returned
    /// cursor lets the caller continue where the scan stopped.
    pub max_changes_per_query: Option<usize>,
}

impl ProviderConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-query scan limit.
    #[must_use]
    pub const fn max_changes_per_query(mut self, limit: usize) -> Self {
        self.max_changes_per_query = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unbounded() {
        assert_eq!(ProviderConfig::default().max_changes_per_query, None);
        assert_eq!(
            ProviderConfig::new().max_changes_per_query(50).max_changes_per_query,
            Some(50)
        );
    }
}
