//! Server configuration.

/// Configuration for the storage server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum records accepted by one POST.
    pub max_post_records: usize,
    /// Upper bound applied to every GET `limit`. `None` means unbounded.
    pub max_get_limit: Option<usize>,
    /// When set, only this user's storage is served.
    pub user: Option<String>,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_post_records: 100,
            max_get_limit: None,
            user: None,
        }
    }

    /// Sets the maximum records per POST.
    pub fn with_max_post_records(mut self, max: usize) -> Self {
        self.max_post_records = max;
        self
    }

    /// Caps GET result sizes.
    pub fn with_max_get_limit(mut self, max: usize) -> Self {
        self.max_get_limit = Some(max);
        self
    }

    /// Restricts the server to one user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_post_records, 100);
        assert!(config.user.is_none());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_post_records(10)
            .with_max_get_limit(5)
            .with_user("alice");
        assert_eq!(config.max_post_records, 10);
        assert_eq!(config.max_get_limit, Some(5));
        assert_eq!(config.user.as_deref(), Some("alice"));
    }
}
