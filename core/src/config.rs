//! Transport configuration.
//!
//! One struct covers the whole stack: where the simulation service listens,
//! how long to wait for its replies, and the connect-retry policy. No
//! environment variables and no persisted state.

use serde::{Deserialize, Serialize};

/// Configuration for an [`AteTransport`](crate::transport::AteTransport).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AteConfig {
    /// Hostname or IP address of the simulation service.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Reply deadline in seconds for every command; 0 waits indefinitely.
    #[serde(default = "default_telnet_timeout_s")]
    pub telnet_timeout_s: u32,
    /// Retry the initial connect once after a one-second backoff.
    #[serde(default = "default_connect_retry")]
    pub connect_retry: bool,
    /// Upper bound on JTAG busy-status polls per scan. `None` polls until
    /// the master goes idle; liveness is then the simulator's business.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jtag_poll_budget: Option<u32>,
}

impl Default for AteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            telnet_timeout_s: default_telnet_timeout_s(),
            connect_retry: default_connect_retry(),
            jtag_poll_budget: None,
        }
    }
}

// --- Default value functions ---

fn default_port() -> u16 {
    5023
}

fn default_telnet_timeout_s() -> u32 {
    60
}

fn default_connect_retry() -> bool {
    true
}
