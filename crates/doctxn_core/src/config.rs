//! Runner configuration.

/// Configuration for a [`crate::Runner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Collection holding transaction records.
    pub collection: String,

    /// Whether stubs are deleted once their queue drains.
    pub collect_stubs: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            collection: "txns".to_string(),
            collect_stubs: true,
        }
    }
}

impl RunnerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the record collection.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = name.into();
        self
    }

    /// Sets whether drained stubs are deleted.
    #[must_use]
    pub const fn collect_stubs(mut self, value: bool) -> Self {
        self.collect_stubs = value;
        self
    }
}
