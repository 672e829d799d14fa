//! Runner configuration
//!
//! One YAML file, overridable through `FIELDSCAN_` environment variables
//! (`FIELDSCAN_LOGGING__LEVEL=debug`).

use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use field_comlink::{AccessUnit, LogLevel, ProtocolType, TagTable};
use field_protocols::masterk::MasterKOptions;
use field_protocols::melsec::MelsecOptions;
use field_protocols::temi::TemiOptions;
use field_protocols::{ScanBlock, ScannerOptions, TransportConfig};
use field_scan::DEFAULT_INTERVAL_MS;

pub const ENV_PREFIX: &str = "FIELDSCAN_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, `RUST_LOG` wins when set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Daily rolling log file (`<dir>/<name>.YYYY-MM-DD`)
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ansi() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            ansi: default_ansi(),
        }
    }
}

/// One device client plus the scanner that polls it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub protocol: ProtocolType,
    pub transport: TransportConfig,
    #[serde(default)]
    pub melsec: MelsecOptions,
    #[serde(default)]
    pub masterk: MasterKOptions,
    #[serde(default)]
    pub temi: TemiOptions,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Register file size in bytes
    #[serde(default = "default_register_bytes")]
    pub register_bytes: usize,
    #[serde(flatten)]
    pub scanner: ScannerOptions,
    #[serde(default)]
    pub blocks: Vec<ScanBlock>,
    #[serde(default)]
    pub tags: TagTable,
    /// Scan thread event log level
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub raise_on_terminate: bool,
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_register_bytes() -> usize {
    1024
}

/// Master device scanned in lockstep with its slaves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub master: String,
    #[serde(default)]
    pub slaves: Vec<String>,
}

impl AppConfig {
    /// Load from a YAML file with environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: &Path, prefix: &str) -> Result<Self> {
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        let config: AppConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(prefix).split("__"))
            .extract()
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that need no socket
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            bail!("no devices configured");
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                bail!("duplicate device name '{}'", device.name);
            }
            device
                .validate()
                .with_context(|| format!("device '{}'", device.name))?;
        }

        let mut grouped = HashSet::new();
        for group in &self.groups {
            for member in std::iter::once(&group.master).chain(&group.slaves) {
                if !names.contains(member.as_str()) {
                    bail!("group '{}' references unknown device '{}'", group.master, member);
                }
                if !grouped.insert(member.as_str()) {
                    bail!("device '{}' belongs to more than one group", member);
                }
            }
        }
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Devices outside every group, each on its own scan thread
    pub fn standalone_devices(&self) -> impl Iterator<Item = &DeviceConfig> {
        let grouped: HashSet<&str> = self
            .groups
            .iter()
            .flat_map(|g| std::iter::once(&g.master).chain(&g.slaves))
            .map(String::as_str)
            .collect();
        self.devices
            .iter()
            .filter(move |d| !grouped.contains(d.name.as_str()))
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<()> {
        self.transport.validate()?;
        if self.interval_ms == 0 {
            bail!("interval_ms must be positive");
        }
        if self.register_bytes == 0 || self.register_bytes % 2 != 0 {
            bail!("register_bytes must be a positive even number");
        }
        let words = self.register_bytes / 2;
        for block in &self.blocks {
            let capacity = match block.unit {
                AccessUnit::Word => words,
                AccessUnit::Bit => words * 16,
            };
            let fits = block
                .register_offset
                .checked_add(block.count)
                .is_some_and(|end| end <= capacity);
            if block.count == 0 || !fits {
                bail!(
                    "block {} x{} at {} exceeds the register file",
                    block.address,
                    block.count,
                    block.register_offset
                );
            }
        }
        Ok(())
    }
}
