//! Application configuration
//!
//! Resolved in three layers: an optional TOML file, then `EDALAB_*`
//! environment variables, then command-line flags (applied by `main`).

use edalab_hub::HubConfig;
use edalab_simulator::{parse_event_type, SimulationConfig};
use edalab_transport::{BrokerConfig, ConsumerConfig, OffsetReset, ProducerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerSection,
    pub registry: RegistrySection,
    pub producer: ProducerSection,
    pub consumer: ConsumerSection,
    pub ledger: LedgerSection,
    pub hub: HubSection,
    pub simulation: SimulationSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    pub partitions: u32,
    pub ack_latency_ms: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            partitions: 3,
            ack_latency_ms: 0,
        }
    }
}

/// Without a URL the bundled schemas are served in-process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSection {
    pub delivery_timeout_ms: u64,
}

impl Default for ProducerSection {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSection {
    pub group_id: String,
    pub auto_offset_reset: OffsetReset,
    pub enable_auto_commit: bool,
    pub poll_timeout_ms: u64,
    pub dead_letter_topic: Option<String>,
}

impl Default for ConsumerSection {
    fn default() -> Self {
        Self {
            group_id: "edalab".to_string(),
            auto_offset_reset: OffsetReset::Earliest,
            enable_auto_commit: true,
            poll_timeout_ms: 1_000,
            dead_letter_topic: Some(edalab_events::topics::DEAD_LETTER.to_string()),
        }
    }
}

/// `memory` or `sqlite:<path>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub storage: String,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            storage: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    pub addr: String,
    pub mailbox_capacity: usize,
    pub broadcast_buffer: usize,
    pub control_buffer: usize,
    pub ping_period_secs: u64,
    pub write_wait_secs: u64,
    pub read_timeout_secs: u64,
    pub max_frame_size: usize,
    pub drop_threshold: u32,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7070".to_string(),
            mailbox_capacity: 256,
            broadcast_buffer: 256,
            control_buffer: 64,
            ping_period_secs: 54,
            write_wait_secs: 10,
            read_timeout_secs: 60,
            max_frame_size: 512,
            drop_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    pub scenario: String,
    pub rate: u32,
    /// Zero runs until stopped
    pub duration_secs: u64,
    pub event_types: Vec<String>,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            scenario: "default".to_string(),
            rate: 10,
            duration_secs: 0,
            event_types: vec!["AccountOpened".to_string()],
            seed: None,
        }
    }
}

/// Where the ledger keeps its state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStorage {
    Memory,
    Sqlite(PathBuf),
}

impl LedgerStorage {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "memory" => Ok(LedgerStorage::Memory),
            other => match other.strip_prefix("sqlite:") {
                Some(path) if !path.is_empty() => Ok(LedgerStorage::Sqlite(PathBuf::from(path))),
                _ => Err(ConfigError::Validation(format!(
                    "ledger storage must be 'memory' or 'sqlite:<path>', got '{other}'"
                ))),
            },
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid with the file at `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    pub fn load_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Override fields from `EDALAB_*` variables supplied by `lookup`
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("EDALAB_REGISTRY_URL") {
            self.registry.url = (!url.is_empty()).then_some(url);
        }
        if let Some(storage) = lookup("EDALAB_LEDGER_STORAGE") {
            self.ledger.storage = storage;
        }
        if let Some(addr) = lookup("EDALAB_HUB_ADDR") {
            self.hub.addr = addr;
        }
        if let Some(group) = lookup("EDALAB_CONSUMER_GROUP_ID") {
            self.consumer.group_id = group;
        }
        if let Some(value) = lookup("EDALAB_BROKER_PARTITIONS") {
            self.broker.partitions = parse_env("EDALAB_BROKER_PARTITIONS", &value)?;
        }
        if let Some(value) = lookup("EDALAB_SIMULATION_RATE") {
            self.simulation.rate = parse_env("EDALAB_SIMULATION_RATE", &value)?;
        }
        if let Some(value) = lookup("EDALAB_SIMULATION_SEED") {
            self.simulation.seed = Some(parse_env("EDALAB_SIMULATION_SEED", &value)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.partitions == 0 {
            return Err(ConfigError::Validation(
                "broker.partitions must be at least 1".to_string(),
            ));
        }
        if self.consumer.group_id.is_empty() {
            return Err(ConfigError::Validation(
                "consumer.group_id must not be empty".to_string(),
            ));
        }
        if self.hub.mailbox_capacity == 0 || self.hub.max_frame_size == 0 {
            return Err(ConfigError::Validation(
                "hub.mailbox_capacity and hub.max_frame_size must be positive".to_string(),
            ));
        }
        self.ledger_storage()?;
        self.simulation_config()?;
        Ok(())
    }

    pub fn ledger_storage(&self) -> Result<LedgerStorage, ConfigError> {
        LedgerStorage::parse(&self.ledger.storage)
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            partitions: self.broker.partitions,
            ack_latency: Duration::from_millis(self.broker.ack_latency_ms),
        }
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            delivery_timeout: Duration::from_millis(self.producer.delivery_timeout_ms),
            ..ProducerConfig::default()
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            group_id: self.consumer.group_id.clone(),
            auto_offset_reset: self.consumer.auto_offset_reset,
            enable_auto_commit: self.consumer.enable_auto_commit,
            poll_timeout: Duration::from_millis(self.consumer.poll_timeout_ms),
            dead_letter_topic: self.consumer.dead_letter_topic.clone(),
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            mailbox_capacity: self.hub.mailbox_capacity,
            broadcast_buffer: self.hub.broadcast_buffer,
            control_buffer: self.hub.control_buffer,
            ping_period: Duration::from_secs(self.hub.ping_period_secs),
            write_wait: Duration::from_secs(self.hub.write_wait_secs),
            read_timeout: Duration::from_secs(self.hub.read_timeout_secs),
            max_frame_size: self.hub.max_frame_size,
            drop_threshold: self.hub.drop_threshold,
        }
    }

    pub fn simulation_config(&self) -> Result<SimulationConfig, ConfigError> {
        let event_types = self
            .simulation
            .event_types
            .iter()
            .map(|name| parse_event_type(name))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        let config = SimulationConfig {
            scenario: self.simulation.scenario.clone(),
            rate: self.simulation.rate,
            duration: Duration::from_secs(self.simulation.duration_secs),
            event_types,
        };
        config
            .validate()
            .map_err(|err| ConfigError::Validation(format!("simulation: {err}")))?;
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
