//! Provider health probing with a TTL cache
//!
//! Classification per provider: connection or timeout failure is
//! `unhealthy`; reachable without an expected capability (no models, missing
//! tool) is `degraded`; reachable and capable is `healthy`.

mod health_probe;
mod probes;
mod status;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use health_probe::HealthProbe;
pub use probes::{HttpProbe, Probe, ProcessProbe, probe_for_provider};
pub use status::{HealthStatus, ProviderHealth};
