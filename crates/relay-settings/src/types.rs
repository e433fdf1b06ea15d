//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every struct carries `#[serde(default)]`
//! so a settings file only needs the values it changes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings for a relay node. One file configures both roles; each
/// subcommand reads the sections it needs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    pub logging: LoggingSettings,
    pub acceptor: AcceptorSettings,
    pub dispatcher: DispatcherSettings,
    pub queue: QueueSettings,
    pub business: BusinessSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace` through `error`).
    pub level: String,
    /// Per-module overrides, e.g. `{"relay_queue": "debug"}`.
    pub modules: BTreeMap<String, String>,
    /// One JSON object per line instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: BTreeMap::new(),
            json: false,
        }
    }
}

/// A dispatcher the acceptor links to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherEndpoint {
    pub id: String,
    /// WebSocket URL of the dispatcher's link endpoint, e.g. `ws://10.0.0.2:9090/link`.
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AcceptorSettings {
    pub listen: String,
    /// Workers per request-type pool.
    pub workers: usize,
    /// Queued tasks per pool before `submit` starts rejecting.
    pub queue_capacity: usize,
    /// Outbound frames buffered per client socket.
    pub client_buffer: usize,
    /// Outbound frames buffered per dispatcher link.
    pub link_buffer: usize,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub dispatchers: Vec<DispatcherEndpoint>,
}

impl Default for AcceptorSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            workers: 8,
            queue_capacity: 1024,
            client_buffer: 256,
            link_buffer: 4096,
            reconnect_initial_ms: 100,
            reconnect_max_ms: 10_000,
            dispatchers: Vec::new(),
        }
    }
}

impl AcceptorSettings {
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatcherSettings {
    /// Name used in logs and the health report.
    pub id: String,
    pub listen: String,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Outbound frames buffered per acceptor link.
    pub link_buffer: usize,
    /// Replies taken per partition on each pass of the reply router.
    pub reply_batch_size: usize,
    pub reply_poll_interval_ms: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            id: "dispatcher-1".to_string(),
            listen: "0.0.0.0:9090".to_string(),
            workers: 8,
            queue_capacity: 1024,
            link_buffer: 4096,
            reply_batch_size: 64,
            reply_poll_interval_ms: 5,
        }
    }
}

impl DispatcherSettings {
    pub fn reply_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reply_poll_interval_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    pub partitions: usize,
    /// Uncommitted units a partition holds before publishes fail.
    pub partition_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            partitions: 16,
            partition_capacity: 65_536,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusinessSettings {
    pub consumers: usize,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
}

impl Default for BusinessSettings {
    fn default() -> Self {
        Self {
            consumers: 4,
            batch_size: 32,
            poll_interval_ms: 10,
        }
    }
}

impl BusinessSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = RelaySettings::default();
        assert_eq!(s.logging.level, "info");
        assert_eq!(s.acceptor.listen, "0.0.0.0:8080");
        assert_eq!(s.dispatcher.listen, "0.0.0.0:9090");
        assert!(s.acceptor.dispatchers.is_empty());
        assert_eq!(s.queue.partitions, 16);
        assert_eq!(s.business.consumers, 4);
        assert_eq!(s.business.poll_interval(), Duration::from_millis(10));
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RelaySettings::default()).unwrap();
        assert!(json["acceptor"]["queueCapacity"].is_number());
        assert!(json["acceptor"]["reconnectMaxMs"].is_number());
        assert!(json["business"]["pollIntervalMs"].is_number());
        assert!(json["queue"]["partitionCapacity"].is_number());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: RelaySettings =
            serde_json::from_str(r#"{"acceptor": {"workers": 2}}"#).unwrap();
        assert_eq!(s.acceptor.workers, 2);
        assert_eq!(s.acceptor.queue_capacity, 1024);
        assert_eq!(s.dispatcher.workers, 8);
    }
}
