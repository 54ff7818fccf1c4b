//! Transport settings for an `Executor`.
//!
//! Defaults reproduce the dialing and pooling limits of the diagnostic tool
//! this crate serves. Everything can be overridden from a partial JSON
//! object; durations are expressed in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecuteError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Idle connections kept across all hosts.
    pub max_idle_connections: usize,
    pub max_idle_connections_per_host: usize,
    #[serde(rename = "idle_timeout_ms", with = "millis")]
    pub idle_timeout: Duration,
    /// TCP connect (and TLS handshake) budget per attempt.
    #[serde(rename = "dial_timeout_ms", with = "millis")]
    pub dial_timeout: Duration,
    /// How long to wait for `100 Continue` before sending the body anyway.
    #[serde(rename = "expect_continue_timeout_ms", with = "millis")]
    pub expect_continue_timeout: Duration,
    /// Dial both IPv4 and IPv6 addresses; IPv4 only when false.
    pub dual_stack: bool,
    /// Honor `HTTP_PROXY`, `HTTPS_PROXY` and `ALL_PROXY`.
    pub proxy_from_env: bool,
    /// Skip certificate verification for `https` targets.
    pub insecure_skip_verify: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_idle_connections: 100,
            max_idle_connections_per_host: 2,
            idle_timeout: Duration::from_secs(90),
            dial_timeout: Duration::from_secs(30),
            expect_continue_timeout: Duration::from_secs(1),
            dual_stack: true,
            proxy_from_env: true,
            insecure_skip_verify: false,
        }
    }
}

impl TransportConfig {
    pub fn from_json(json: &str) -> Result<Self, ExecuteError> {
        serde_json::from_str(json).map_err(|e| ExecuteError::Config(e.to_string()))
    }

    pub fn insecure(mut self, skip_verify: bool) -> Self {
        self.insecure_skip_verify = skip_verify;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
