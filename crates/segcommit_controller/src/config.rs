//! Controller configuration.

use std::time::Duration;

/// Configuration for segment completion arbitration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How long a winner may take to finish its commit before another
    /// proposer is admitted.
    pub max_commit_time: Duration,
    /// Build budget advertised to the winner, in seconds.
    pub build_time_seconds: u64,
    /// Largest single build time extension granted.
    pub max_build_time_extension: Duration,
    /// Whether winners are told to use the split commit flow.
    pub split_commit: bool,
    /// Stable controller address returned with split commits.
    pub controller_vip_url: String,
    /// Deep-store prefix for segments committed without the split flow.
    pub segment_location_prefix: Option<String>,
}

impl ControllerConfig {
    /// Creates a configuration for a controller reachable at `vip_url`.
    pub fn new(controller_vip_url: impl Into<String>) -> Self {
        Self {
            max_commit_time: Duration::from_secs(120),
            build_time_seconds: 60,
            max_build_time_extension: Duration::from_secs(300),
            split_commit: true,
            controller_vip_url: controller_vip_url.into(),
            segment_location_prefix: None,
        }
    }

    /// Sets the winner deadline.
    pub fn with_max_commit_time(mut self, timeout: Duration) -> Self {
        self.max_commit_time = timeout;
        self
    }

    /// Sets the advertised build budget.
    pub fn with_build_time_seconds(mut self, seconds: u64) -> Self {
        self.build_time_seconds = seconds;
        self
    }

    /// Sets the largest build time extension.
    pub fn with_max_build_time_extension(mut self, extension: Duration) -> Self {
        self.max_build_time_extension = extension;
        self
    }

    /// Enables or disables the split commit flow.
    pub fn with_split_commit(mut self, split_commit: bool) -> Self {
        self.split_commit = split_commit;
        self
    }

    /// Sets the deep-store prefix used for non-split commits.
    pub fn with_segment_location_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.segment_location_prefix = Some(prefix.into());
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new("http://localhost:9000")
    }
}
