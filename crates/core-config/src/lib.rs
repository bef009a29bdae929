//! Configuration loading and validation for the simulated device and
//! workload.
//!
//! Two TOML files describe a run: `device.toml` fixes the NAND topology,
//! channel bus, and flash timing; `workload.toml` fixes the feature
//! dimension, buffer capacities, compute latencies, and query parameters.
//! Unknown fields are tolerated (forward evolution); missing fields fall
//! back to the documented defaults. `validate()` runs after parsing and
//! fails fast on an inconsistent topology, before any simulation state is
//! built.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// NAND array geometry. Counts are per parent unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Topology {
    #[serde(default = "Topology::default_channels")]
    pub channels: u32,
    #[serde(default = "Topology::default_chips_per_channel")]
    pub chips_per_channel: u32,
    #[serde(default = "Topology::default_dies_per_chip")]
    pub dies_per_chip: u32,
    #[serde(default = "Topology::default_planes_per_die")]
    pub planes_per_die: u32,
    #[serde(default = "Topology::default_blocks_per_plane")]
    pub blocks_per_plane: u32,
    #[serde(default = "Topology::default_pages_per_block")]
    pub pages_per_block: u32,
    #[serde(default = "Topology::default_page_capacity")]
    pub page_capacity: u32,
}

impl Topology {
    const fn default_channels() -> u32 {
        8
    }
    const fn default_chips_per_channel() -> u32 {
        4
    }
    const fn default_dies_per_chip() -> u32 {
        2
    }
    const fn default_planes_per_die() -> u32 {
        4
    }
    const fn default_blocks_per_plane() -> u32 {
        512
    }
    const fn default_pages_per_block() -> u32 {
        256
    }
    const fn default_page_capacity() -> u32 {
        4096
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            channels: Self::default_channels(),
            chips_per_channel: Self::default_chips_per_channel(),
            dies_per_chip: Self::default_dies_per_chip(),
            planes_per_die: Self::default_planes_per_die(),
            blocks_per_plane: Self::default_blocks_per_plane(),
            pages_per_block: Self::default_pages_per_block(),
            page_capacity: Self::default_page_capacity(),
        }
    }
}

/// Channel bus parameters: `width` in bytes, `transfer_rate` in
/// mega-transfers per second.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "ChannelConfig::default_width")]
    pub width: u32,
    #[serde(default = "ChannelConfig::default_transfer_rate")]
    pub transfer_rate: f64,
}

impl ChannelConfig {
    const fn default_width() -> u32 {
        1
    }
    const fn default_transfer_rate() -> f64 {
        333.0
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            transfer_rate: Self::default_transfer_rate(),
        }
    }
}

/// Flash array timing in logical cycles per page operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FlashTiming {
    #[serde(default = "FlashTiming::default_read_latency")]
    pub read_latency: u64,
    #[serde(default = "FlashTiming::default_program_latency")]
    pub program_latency: u64,
}

impl FlashTiming {
    const fn default_read_latency() -> u64 {
        25_000
    }
    const fn default_program_latency() -> u64 {
        200_000
    }
}

impl Default for FlashTiming {
    fn default() -> Self {
        Self {
            read_latency: Self::default_read_latency(),
            program_latency: Self::default_program_latency(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub topology: Topology,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub timing: FlashTiming,
}

impl DeviceConfig {
    pub fn num_chips(&self) -> u32 {
        self.topology.channels * self.topology.chips_per_channel
    }

    /// One multi-plane page stripe: the unit a single array read fills.
    pub fn stripe_bytes(&self) -> u32 {
        self.topology.page_capacity * self.topology.planes_per_die
    }

    /// Channel throughput in bytes per logical cycle, derived from the
    /// MT/s rate on a 1ns cycle (binary mega over decimal nano).
    pub fn bytes_per_cycle(&self) -> f64 {
        let mega = 1024.0 / 1000.0 * 1024.0 / 1000.0;
        self.channel.width as f64 * self.channel.transfer_rate * mega / 1000.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.topology;
        for (name, value) in [
            ("topology.channels", t.channels),
            ("topology.chips_per_channel", t.chips_per_channel),
            ("topology.dies_per_chip", t.dies_per_chip),
            ("topology.planes_per_die", t.planes_per_die),
            ("topology.blocks_per_plane", t.blocks_per_plane),
            ("topology.pages_per_block", t.pages_per_block),
            ("topology.page_capacity", t.page_capacity),
            ("channel.width", self.channel.width),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be nonzero")));
            }
        }
        // Die 0 carries graph structure, die 1 carries node features.
        if t.dies_per_chip < 2 {
            return Err(ConfigError::Invalid(format!(
                "topology.dies_per_chip is {}, need at least 2",
                t.dies_per_chip
            )));
        }
        if !(self.channel.transfer_rate > 0.0) {
            return Err(ConfigError::Invalid(
                "channel.transfer_rate must be positive".into(),
            ));
        }
        if self.timing.read_latency == 0 || self.timing.program_latency == 0 {
            return Err(ConfigError::Invalid(
                "timing latencies must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FeatureParams {
    #[serde(default = "FeatureParams::default_dim")]
    pub node_feature_dim: u32,
}

impl FeatureParams {
    const fn default_dim() -> u32 {
        602
    }
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self { node_feature_dim: Self::default_dim() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BufferParams {
    /// Shared staging buffer between the page registers and DRAM, bytes.
    #[serde(default = "BufferParams::default_transfer_capacity")]
    pub transfer_capacity: u64,
    #[serde(default = "BufferParams::default_dram_capacity")]
    pub dram_capacity: u64,
    #[serde(default = "BufferParams::default_cache_capacity")]
    pub cache_capacity: u64,
}

impl BufferParams {
    const fn default_transfer_capacity() -> u64 {
        4 << 20
    }
    const fn default_dram_capacity() -> u64 {
        1 << 30
    }
    const fn default_cache_capacity() -> u64 {
        256 << 20
    }
}

impl Default for BufferParams {
    fn default() -> Self {
        Self {
            transfer_capacity: Self::default_transfer_capacity(),
            dram_capacity: Self::default_dram_capacity(),
            cache_capacity: Self::default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ComputeParams {
    #[serde(default = "ComputeParams::default_aggregator_latency")]
    pub aggregator_latency: u64,
    #[serde(default = "ComputeParams::default_pe_latency")]
    pub pe_latency: u64,
}

impl ComputeParams {
    const fn default_aggregator_latency() -> u64 {
        64
    }
    const fn default_pe_latency() -> u64 {
        1
    }
}

impl Default for ComputeParams {
    fn default() -> Self {
        Self {
            aggregator_latency: Self::default_aggregator_latency(),
            pe_latency: Self::default_pe_latency(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct QueryParams {
    #[serde(default = "QueryParams::default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "QueryParams::default_seed")]
    pub seed: u64,
}

impl QueryParams {
    const fn default_batch_size() -> u32 {
        256
    }
    const fn default_seed() -> u64 {
        2333
    }
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            batch_size: Self::default_batch_size(),
            seed: Self::default_seed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default)]
    pub feature: FeatureParams,
    #[serde(default)]
    pub buffers: BufferParams,
    #[serde(default)]
    pub compute: ComputeParams,
    #[serde(default)]
    pub query: QueryParams,
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feature.node_feature_dim == 0 {
            return Err(ConfigError::Invalid(
                "feature.node_feature_dim must be nonzero".into(),
            ));
        }
        if self.buffers.transfer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "buffers.transfer_capacity must be nonzero".into(),
            ));
        }
        if self.compute.aggregator_latency == 0 || self.compute.pe_latency == 0 {
            return Err(ConfigError::Invalid(
                "compute latencies must be nonzero".into(),
            ));
        }
        if self.query.batch_size == 0 {
            return Err(ConfigError::Invalid("query.batch_size must be nonzero".into()));
        }
        Ok(())
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_device(path: impl AsRef<Path>) -> Result<DeviceConfig, ConfigError> {
    let path = path.as_ref();
    let config: DeviceConfig = read_toml(path)?;
    config.validate()?;
    info!(
        target: "config",
        path = %path.display(),
        channels = config.topology.channels,
        chips_per_channel = config.topology.chips_per_channel,
        page_capacity = config.topology.page_capacity,
        "device config loaded"
    );
    Ok(config)
}

pub fn load_workload(path: impl AsRef<Path>) -> Result<WorkloadConfig, ConfigError> {
    let path = path.as_ref();
    let config: WorkloadConfig = read_toml(path)?;
    config.validate()?;
    info!(
        target: "config",
        path = %path.display(),
        node_feature_dim = config.feature.node_feature_dim,
        batch_size = config.query.batch_size,
        "workload config loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        DeviceConfig::default().validate().unwrap();
        WorkloadConfig::default().validate().unwrap();
    }

    #[test]
    fn derived_helpers() {
        let device = DeviceConfig::default();
        assert_eq!(device.num_chips(), 32);
        assert_eq!(device.stripe_bytes(), 4096 * 4);
        let expected = 333.0 * 1.024 * 1.024 / 1000.0;
        assert!((device.bytes_per_cycle() - expected).abs() < 1e-9);
    }

    #[test]
    fn load_device_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[topology]\nchannels = 2\nchips_per_channel = 2\n\n\
             [channel]\nwidth = 2\ntransfer_rate = 400.0\n\n\
             [timing]\nread_latency = 100\n"
        )
        .unwrap();
        let device = load_device(file.path()).unwrap();
        assert_eq!(device.topology.channels, 2);
        assert_eq!(device.topology.pages_per_block, 256); // default kept
        assert_eq!(device.channel.width, 2);
        assert_eq!(device.timing.read_latency, 100);
        assert_eq!(
            device.timing.program_latency,
            FlashTiming::default_program_latency()
        );
    }

    #[test]
    fn zero_count_rejected() {
        let device = DeviceConfig {
            topology: Topology { channels: 0, ..Topology::default() },
            ..DeviceConfig::default()
        };
        let err = device.validate().unwrap_err();
        assert!(err.to_string().contains("channels"));
    }

    #[test]
    fn single_die_rejected() {
        let device = DeviceConfig {
            topology: Topology { dies_per_chip: 1, ..Topology::default() },
            ..DeviceConfig::default()
        };
        let err = device.validate().unwrap_err();
        assert!(err.to_string().contains("dies_per_chip"));
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[topology\nchannels = ").unwrap();
        let err = load_device(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = load_workload("/nonexistent/workload.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn workload_overrides_parse() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[feature]\nnode_feature_dim = 64\n\n\
             [buffers]\ntransfer_capacity = 65536\n\n\
             [compute]\naggregator_latency = 32\npe_latency = 2\n\n\
             [query]\nbatch_size = 16\nseed = 7\n"
        )
        .unwrap();
        let workload = load_workload(file.path()).unwrap();
        assert_eq!(workload.feature.node_feature_dim, 64);
        assert_eq!(workload.buffers.transfer_capacity, 65536);
        assert_eq!(workload.compute.pe_latency, 2);
        assert_eq!(workload.query.seed, 7);
    }
}
