use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Three-state classification of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Reachable and capable
    Healthy,
    /// Reachable but missing an expected capability (no models, missing tool)
    Degraded,
    /// Unreachable, timed out, misconfigured or unknown
    Unhealthy,
}

impl HealthStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one health check. Each check replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub status: HealthStatus,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, Value>,
    pub checked_at: DateTime<Utc>,
}

impl ProviderHealth {
    #[must_use]
    pub fn new(provider: impl Into<String>, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status,
            message: message.into(),
            details: BTreeMap::new(),
            checked_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn healthy(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, HealthStatus::Healthy, message)
    }

    #[must_use]
    pub fn degraded(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, HealthStatus::Degraded, message)
    }

    #[must_use]
    pub fn unhealthy(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(provider, HealthStatus::Unhealthy, message)
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        let health = ProviderHealth::degraded("ollama", "no models").with_detail("model_count", 0);
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["details"]["model_count"], 0);
        assert!(!health.is_healthy());
    }
}
