use std::time::Duration;

use scatter_io::{PoolStrategy, TransportKind};
use scatter_protocol::Flavor;

use crate::proxy::ServerProxyConfig;
use crate::ring::PoolConfig;

/// Client-loop configuration.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Maximum ring positions tried for one operation (default: 3).
    pub max_continues: u32,
    /// A miss from a server restored more recently than this is retried on
    /// the next ring position (default: 300s).
    pub h404_duration: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            max_continues: 3,
            h404_duration: Duration::from_secs(300),
        }
    }
}

/// Full client construction configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Retry-loop tuning.
    pub client: ClientConfig,
    /// Key-distribution pool tuning.
    pub pool: PoolConfig,
    /// Per-server health and I/O tuning.
    pub proxy: ServerProxyConfig,
    /// Wire flavor (default: text).
    pub protocol: Flavor,
    /// Wire carrier (default: TCP).
    pub transport: TransportKind,
    /// Connection-pool strategy (default: bounded caching).
    pub strategy: PoolStrategy,
}
