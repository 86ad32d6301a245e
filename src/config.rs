use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::protocol::ConsistencyLevel;

pub const DEFAULT_PROFILE: &str = "default";

/// Named, immutable set of request options.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionProfile {
    pub name: String,
    /// A zero timeout means requests never time out.
    pub request_timeout: Duration,
    pub default_idempotence: bool,
    pub consistency: ConsistencyLevel,
    pub log_warnings: bool,
    pub logger_max_query_length: usize,
    pub logger_show_values: bool,
    pub logger_max_values: usize,
    pub logger_max_value_length: usize,
}

impl Default for ExecutionProfile {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROFILE.to_string(),
            request_timeout: Duration::from_secs(2),
            default_idempotence: false,
            consistency: ConsistencyLevel::LocalOne,
            log_warnings: true,
            logger_max_query_length: 500,
            logger_show_values: true,
            logger_max_values: 50,
            logger_max_value_length: 50,
        }
    }
}

impl ExecutionProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_default_idempotence(mut self, idempotent: bool) -> Self {
        self.default_idempotence = idempotent;
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_log_warnings(mut self, log_warnings: bool) -> Self {
        self.log_warnings = log_warnings;
        self
    }

    pub fn with_logger_limits(
        mut self,
        max_query_length: usize,
        max_values: usize,
        max_value_length: usize,
    ) -> Self {
        self.logger_max_query_length = max_query_length;
        self.logger_max_values = max_values;
        self.logger_max_value_length = max_value_length;
        self
    }

    pub fn with_logger_show_values(mut self, show: bool) -> Self {
        self.logger_show_values = show;
        self
    }
}

/// Session-wide configuration: the session name and its execution profiles.
///
/// A profile named [`DEFAULT_PROFILE`] is always present.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    session_name: String,
    profiles: HashMap<String, Arc<ExecutionProfile>>,
}

impl DriverConfig {
    pub fn new(session_name: impl Into<String>) -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            DEFAULT_PROFILE.to_string(),
            Arc::new(ExecutionProfile::default()),
        );
        Self {
            session_name: session_name.into(),
            profiles,
        }
    }

    /// Adds a profile, replacing any profile with the same name.
    pub fn with_profile(mut self, profile: ExecutionProfile) -> Self {
        self.profiles
            .insert(profile.name.clone(), Arc::new(profile));
        self
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn profile(&self, name: &str) -> Option<Arc<ExecutionProfile>> {
        self.profiles.get(name).cloned()
    }

    pub fn default_profile(&self) -> Arc<ExecutionProfile> {
        self.profile(DEFAULT_PROFILE)
            .unwrap_or_else(|| Arc::new(ExecutionProfile::default()))
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::new("s0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_always_present() {
        let config = DriverConfig::new("s1");
        assert_eq!(config.default_profile().name, DEFAULT_PROFILE);
        assert!(config.profile("olap").is_none());
    }

    #[test]
    fn profiles_replace_by_name() {
        let config = DriverConfig::new("s1")
            .with_profile(ExecutionProfile::named("olap").with_request_timeout(Duration::ZERO))
            .with_profile(ExecutionProfile::default().with_default_idempotence(true));

        assert_eq!(
            config.profile("olap").unwrap().request_timeout,
            Duration::ZERO
        );
        assert!(config.default_profile().default_idempotence);
    }
}
