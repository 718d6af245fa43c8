//! Engine configuration options.

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Log every event at info level instead of debug.
    pub verbose: bool,
    /// Warn with the failure reason whenever an operation is rolled back.
    pub log_rollbacks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            verbose: false,
            log_rollbacks: true,
        }
    }
}
