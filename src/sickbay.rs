//! Health probing and failure containment for monitored apps
//!
//! Provides:
//! - HTTP health probes with bounded retry
//! - A store-backed circuit breaker guarding automatic remediation
//! - Remediation policy (thresholds, pacing, readiness polling)

pub mod breaker;
pub mod probe;
pub mod recovery;

pub use breaker::CircuitBreaker;
pub use probe::{HealthProber, ProbeConfig};
pub use recovery::RemediationPolicy;
