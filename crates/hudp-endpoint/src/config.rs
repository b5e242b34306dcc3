use std::time::Duration;

use serde::Deserialize;

use hudp_transport::arq::{GiveUpPolicy, RetransmitConfig};
use hudp_transport::receiver::ReceiverConfig;
use hudp_transport::wire::MAX_DATAGRAM_SIZE;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProtocolConfigInput {
    pub version: u32,
    pub sender: SenderConfigInput,
    pub receiver: ReceiverConfigInput,
    pub socket: SocketConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SenderConfigInput {
    pub retransmit_timeout_ms: Option<u64>,
    pub give_up_ms: Option<u64>,
    pub give_up_policy: Option<GiveUpPolicy>,
    pub retransmit_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReceiverConfigInput {
    pub gap_timeout_ms: Option<u64>,
    pub gap_check_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SocketConfigInput {
    pub poll_timeout_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
    pub max_datagram: Option<usize>,
}

/// Client-side timing.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub retransmit: RetransmitConfig,
    /// Period of the retransmit scan.
    pub retransmit_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            retransmit: RetransmitConfig::default(),
            retransmit_interval: Duration::from_millis(50),
        }
    }
}

/// Server-side timing.
#[derive(Debug, Clone)]
pub struct ServerReceiverConfig {
    pub receiver: ReceiverConfig,
    /// Period of the gap-skip scan.
    pub gap_check_interval: Duration,
}

impl Default for ServerReceiverConfig {
    fn default() -> Self {
        Self {
            receiver: ReceiverConfig::default(),
            gap_check_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Receive timeout; bounds how long a worker takes to notice shutdown.
    pub poll_timeout: Duration,
    /// Pause between clearing the running flag and joining workers.
    pub shutdown_grace: Duration,
    /// Receive buffer size per datagram. A smaller buffer would let the
    /// socket truncate a full-size datagram into a still-decodable packet.
    pub max_datagram: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            shutdown_grace: Duration::from_millis(200),
            max_datagram: MAX_DATAGRAM_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub version: u32,
    pub sender: SenderConfig,
    pub receiver: ServerReceiverConfig,
    pub socket: SocketConfig,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            sender: SenderConfig::default(),
            receiver: ServerReceiverConfig::default(),
            socket: SocketConfig::default(),
        }
    }
}

fn nonzero_period(name: &str, value: Option<u64>, default: Duration) -> Result<Duration, String> {
    match value {
        Some(0) => Err(format!("{} must be greater than zero", name)),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}

impl ProtocolConfigInput {
    pub fn resolve(self) -> Result<ProtocolConfig, String> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(format!("Unsupported config version {}", version));
        }

        let defaults = ProtocolConfig::default();

        let retransmit = RetransmitConfig {
            timeout: self
                .sender
                .retransmit_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.sender.retransmit.timeout),
            give_up: self
                .sender
                .give_up_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.sender.retransmit.give_up),
            policy: self.sender.give_up_policy.unwrap_or_default(),
        };
        let sender = SenderConfig {
            retransmit,
            retransmit_interval: nonzero_period(
                "sender.retransmit_interval_ms",
                self.sender.retransmit_interval_ms,
                defaults.sender.retransmit_interval,
            )?,
        };

        let receiver = ServerReceiverConfig {
            receiver: ReceiverConfig {
                gap_timeout: self
                    .receiver
                    .gap_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.receiver.receiver.gap_timeout),
            },
            gap_check_interval: nonzero_period(
                "receiver.gap_check_interval_ms",
                self.receiver.gap_check_interval_ms,
                defaults.receiver.gap_check_interval,
            )?,
        };

        let max_datagram = self
            .socket
            .max_datagram
            .unwrap_or(defaults.socket.max_datagram);
        if max_datagram < MAX_DATAGRAM_SIZE {
            return Err(format!(
                "socket.max_datagram must be at least {} (got {})",
                MAX_DATAGRAM_SIZE, max_datagram
            ));
        }

        let socket = SocketConfig {
            poll_timeout: nonzero_period(
                "socket.poll_timeout_ms",
                self.socket.poll_timeout_ms,
                defaults.socket.poll_timeout,
            )?,
            shutdown_grace: self
                .socket
                .shutdown_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.socket.shutdown_grace),
            max_datagram,
        };

        Ok(ProtocolConfig {
            version,
            sender,
            receiver,
            socket,
        })
    }
}

impl ProtocolConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, String> {
        if input.trim().is_empty() {
            return Ok(ProtocolConfig::default());
        }
        let parsed: ProtocolConfigInput =
            toml::from_str(input).map_err(|e| format!("Invalid config TOML: {}", e))?;
        parsed.resolve()
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        Self::from_toml_str(&text).map_err(anyhow::Error::msg)
    }
}
