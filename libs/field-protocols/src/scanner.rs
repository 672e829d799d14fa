//! Scanner
//!
//! A `ScanLoop` that polls one device client each cycle and copies the
//! blocks it reads into a shared register file. When the device stops
//! answering the scanner closes the link and goes offline: it keeps the
//! register file moving with generated values (or holds the last ones) and
//! tries to reconnect every `reconnect_cycles` ticks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use field_comlink::{AccessUnit, DeviceAddress, LinkError, RegisterFile, Result};
use field_scan::{ScanContext, ScanLoop};

use crate::client::DeviceClient;

/// Range read per cycle
///
/// `register_offset` is a word index for word blocks and a bit index for
/// bit blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanBlock {
    pub address: DeviceAddress,
    pub unit: AccessUnit,
    pub count: usize,
    pub register_offset: usize,
}

impl ScanBlock {
    pub fn words(address: DeviceAddress, count: usize, register_offset: usize) -> Self {
        Self {
            address,
            unit: AccessUnit::Word,
            count,
            register_offset,
        }
    }

    pub fn bits(address: DeviceAddress, count: usize, register_offset: usize) -> Self {
        Self {
            address,
            unit: AccessUnit::Bit,
            count,
            register_offset,
        }
    }

    fn check_fits(&self, registers: &RegisterFile) -> Result<()> {
        let capacity = match self.unit {
            AccessUnit::Word => registers.len_words(),
            AccessUnit::Bit => registers.len_words() * 16,
        };
        let fits = self
            .register_offset
            .checked_add(self.count)
            .is_some_and(|end| end <= capacity);
        if self.count == 0 || !fits {
            return Err(LinkError::config(format!(
                "block {} x{} at register {} does not fit {} {:?} slots",
                self.address, self.count, self.register_offset, capacity, self.unit
            )));
        }
        Ok(())
    }
}

/// Register file behaviour while the device is unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineMode {
    /// Counter ramp for words, toggling bits
    #[default]
    Simulate,
    /// Keep the last values
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerOptions {
    #[serde(default)]
    pub offline: OfflineMode,
    /// Offline ticks between reconnect attempts
    #[serde(default = "default_reconnect_cycles")]
    pub reconnect_cycles: u32,
}

fn default_reconnect_cycles() -> u32 {
    10
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            offline: OfflineMode::default(),
            reconnect_cycles: default_reconnect_cycles(),
        }
    }
}

/// Online flag readable after the scanner moved into its thread
#[derive(Debug, Clone)]
pub struct LinkStatus(Arc<AtomicBool>);

impl LinkStatus {
    pub fn is_online(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct Scanner {
    client: Arc<dyn DeviceClient>,
    registers: Arc<RegisterFile>,
    blocks: Vec<ScanBlock>,
    options: ScannerOptions,
    online: Arc<AtomicBool>,
    offline_ticks: u32,
    ramp: u16,
    cancellation_bound: bool,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("client", &self.client.name())
            .field("blocks", &self.blocks)
            .field("options", &self.options)
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

impl Scanner {
    pub fn new(
        client: Arc<dyn DeviceClient>,
        registers: Arc<RegisterFile>,
        blocks: Vec<ScanBlock>,
        options: ScannerOptions,
    ) -> Result<Self> {
        for block in &blocks {
            block.check_fits(&registers)?;
        }
        Ok(Self {
            client,
            registers,
            blocks,
            options,
            online: Arc::new(AtomicBool::new(true)),
            offline_ticks: 0,
            ramp: 0,
            cancellation_bound: false,
        })
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus(self.online.clone())
    }

    pub fn registers(&self) -> &Arc<RegisterFile> {
        &self.registers
    }

    pub fn client(&self) -> &Arc<dyn DeviceClient> {
        &self.client
    }

    /// Open if needed and read every block into the register file
    async fn poll(&self) -> Result<()> {
        if !self.client.is_open() {
            self.client.open().await?;
        }
        for block in &self.blocks {
            match block.unit {
                AccessUnit::Word => {
                    let values = self.client.read_words(block.address, block.count).await?;
                    self.registers.set_words(block.register_offset, &values)?;
                },
                AccessUnit::Bit => {
                    let values = self.client.read_bits(block.address, block.count).await?;
                    self.registers.set_bits(block.register_offset, &values)?;
                },
            }
        }
        Ok(())
    }

    /// Offline data for one tick
    fn simulate(&mut self) -> Result<()> {
        if self.options.offline == OfflineMode::Hold {
            return Ok(());
        }
        self.ramp = self.ramp.wrapping_add(1);
        let toggle = self.ramp % 2 == 1;
        for block in &self.blocks {
            match block.unit {
                AccessUnit::Word => {
                    let values: Vec<u16> = (0..block.count)
                        .map(|i| self.ramp.wrapping_add(i as u16))
                        .collect();
                    self.registers.set_words(block.register_offset, &values)?;
                },
                AccessUnit::Bit => {
                    self.registers
                        .set_bits(block.register_offset, &vec![toggle; block.count])?;
                },
            }
        }
        Ok(())
    }

    async fn go_offline(&mut self, ctx: &ScanContext) {
        self.client.close().await;
        if self.online.swap(false, Ordering::AcqRel) {
            ctx.logger().note(&format!(
                "{} offline, reconnect every {} cycles",
                self.client.name(),
                self.options.reconnect_cycles
            ));
        }
        self.offline_ticks = 0;
    }
}

#[async_trait]
impl ScanLoop for Scanner {
    async fn tick(&mut self, ctx: &ScanContext) -> Result<()> {
        if !self.cancellation_bound {
            self.client.set_cancellation(ctx.cancellation());
            self.cancellation_bound = true;
        }

        if !self.is_online() {
            self.offline_ticks += 1;
            if self.offline_ticks < self.options.reconnect_cycles {
                return self.simulate();
            }
            self.offline_ticks = 0;
        }

        match self.poll().await {
            Ok(()) => {
                if !self.online.swap(true, Ordering::AcqRel) {
                    ctx.logger()
                        .note(&format!("{} back online", self.client.name()));
                }
                Ok(())
            },
            Err(e) if e.is_terminated() => Err(e),
            Err(e) => {
                self.go_offline(ctx).await;
                if let Err(sim) = self.simulate() {
                    ctx.logger().exception("offline data", &sim);
                }
                Err(e)
            },
        }
    }

    async fn on_stop(&mut self, _ctx: &ScanContext) {
        self.client.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options: ScannerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.offline, OfflineMode::Simulate);
        assert_eq!(options.reconnect_cycles, 10);

        let options: ScannerOptions =
            serde_json::from_str(r#"{"offline": "hold", "reconnect_cycles": 2}"#).unwrap();
        assert_eq!(options.offline, OfflineMode::Hold);
    }

    #[test]
    fn test_block_from_json() {
        let block: ScanBlock = serde_json::from_str(
            r#"{"address": "D100", "unit": "word", "count": 4, "register_offset": 0}"#,
        )
        .unwrap();
        assert_eq!(block, ScanBlock::words("D100".parse().unwrap(), 4, 0));
    }

    #[test]
    fn test_block_must_fit() {
        let registers = RegisterFile::new(8);
        assert!(ScanBlock::words("D0".parse().unwrap(), 4, 0)
            .check_fits(&registers)
            .is_ok());
        assert!(ScanBlock::words("D0".parse().unwrap(), 4, 1)
            .check_fits(&registers)
            .is_err());
        assert!(ScanBlock::bits("M0".parse().unwrap(), 64, 0)
            .check_fits(&registers)
            .is_ok());
        assert!(ScanBlock::bits("M0".parse().unwrap(), 0, 0)
            .check_fits(&registers)
            .is_err());
        assert!(ScanBlock::words("D0".parse().unwrap(), 2, usize::MAX)
            .check_fits(&registers)
            .is_err());
    }
}
