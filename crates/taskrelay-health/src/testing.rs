//! Fixed-answer probe for tests of health-gated code

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::probes::Probe;
use crate::status::{HealthStatus, ProviderHealth};

/// Probe that reports a settable status and counts its calls.
#[derive(Debug)]
pub struct StaticProbe {
    status: Mutex<HealthStatus>,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl StaticProbe {
    #[must_use]
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status: Mutex::new(status),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_status(&self, status: HealthStatus) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
    }

    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for StaticProbe {
    async fn probe(&self, provider: &str, _timeout: Duration) -> ProviderHealth {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let status = self
            .status
            .lock()
            .map(|s| *s)
            .unwrap_or(HealthStatus::Unhealthy);
        ProviderHealth::new(provider, status, format!("static {status}")).with_detail("call", call)
    }
}
