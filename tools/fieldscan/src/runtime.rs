//! Scan thread wiring
//!
//! Each configured device becomes a protocol client, a register file and a
//! scanner. Devices named in a group run as that group's master or slaves;
//! all others get a scan thread of their own.

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use field_comlink::{ProtocolType, RegisterFile};
use field_protocols::{
    DeviceClient, LinkStatus, MasterKClient, MelsecClient, Scanner, TemiClient,
};
use field_scan::{ScanGroup, ScanThread, ThreadOptions};

use crate::config::{AppConfig, DeviceConfig, GroupConfig};

/// Protocol client for one device entry
pub fn build_client(device: &DeviceConfig) -> Result<Arc<dyn DeviceClient>> {
    let name = device.name.clone();
    let transport = device.transport.clone();
    let client: Arc<dyn DeviceClient> = match device.protocol {
        ProtocolType::Melsec => Arc::new(MelsecClient::new(name, transport, device.melsec.clone())?),
        ProtocolType::MasterK => {
            Arc::new(MasterKClient::new(name, transport, device.masterk.clone())?)
        },
        ProtocolType::Temi => Arc::new(TemiClient::new(name, transport, device.temi.clone())?),
    };
    Ok(client)
}

/// Scanner over a fresh register file, plus the options of its thread
fn build_scanner(device: &DeviceConfig) -> Result<(Scanner, ThreadOptions, DeviceHandle)> {
    let client = build_client(device)?;
    let registers = Arc::new(RegisterFile::with_tags(
        device.register_bytes,
        device.tags.clone(),
    ));
    let scanner = Scanner::new(
        client,
        registers.clone(),
        device.blocks.clone(),
        device.scanner.clone(),
    )
    .with_context(|| format!("device '{}'", device.name))?;

    let options = ThreadOptions::new(device.name.clone())
        .with_interval(Duration::from_millis(device.interval_ms))
        .with_raise_on_terminate(device.raise_on_terminate)
        .with_log_level(device.log_level);
    let handle = DeviceHandle {
        registers,
        status: scanner.status(),
    };
    Ok((scanner, options, handle))
}

/// What stays reachable once a scanner moved into its thread
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    pub registers: Arc<RegisterFile>,
    pub status: LinkStatus,
}

#[derive(Debug)]
enum Unit {
    Thread(ScanThread),
    Group(ScanGroup),
}

impl Unit {
    async fn terminate(&self) {
        match self {
            Unit::Thread(thread) => thread.terminate(0, true).await,
            Unit::Group(group) => group.terminate(0, true).await,
        }
    }
}

/// Every running scan thread of the process
#[derive(Debug)]
pub struct Runtime {
    units: Vec<Unit>,
    devices: HashMap<String, DeviceHandle>,
}

impl Runtime {
    pub async fn start(config: &AppConfig) -> Result<Self> {
        let mut runtime = Self {
            units: Vec::new(),
            devices: HashMap::new(),
        };

        for group in &config.groups {
            if let Err(e) = runtime.start_group(config, group).await {
                runtime.shutdown().await;
                return Err(e);
            }
        }

        for device in config.standalone_devices() {
            let started = async {
                let (scanner, options, handle) = build_scanner(device)?;
                let thread = ScanThread::spawn(scanner, options)
                    .await
                    .with_context(|| format!("cannot start scan thread '{}'", device.name))?;
                Ok::<_, anyhow::Error>((thread, handle))
            }
            .await;

            match started {
                Ok((thread, handle)) => {
                    runtime.devices.insert(device.name.clone(), handle);
                    runtime.units.push(Unit::Thread(thread));
                },
                Err(e) => {
                    runtime.shutdown().await;
                    return Err(e);
                },
            }
        }

        info!(
            "[runtime] {} devices running on {} scan units",
            runtime.devices.len(),
            runtime.units.len()
        );
        Ok(runtime)
    }

    async fn start_group(&mut self, config: &AppConfig, group: &GroupConfig) -> Result<()> {
        let lookup = |name: &str| {
            config
                .device(name)
                .ok_or_else(|| anyhow!("unknown device '{}'", name))
        };

        let (master, options, handle) = build_scanner(lookup(&group.master)?)?;
        let mut builder = ScanGroup::builder().master(master, options);
        let mut handles = vec![(group.master.clone(), handle)];

        for name in &group.slaves {
            let (slave, options, handle) = build_scanner(lookup(name)?)?;
            builder = builder.slave(slave, options);
            handles.push((name.clone(), handle));
        }

        let running = builder
            .start()
            .await
            .with_context(|| format!("cannot start scan group '{}'", group.master))?;
        self.devices.extend(handles);
        self.units.push(Unit::Group(running));
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&DeviceHandle> {
        self.devices.get(name)
    }

    /// Running threads and groups
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Terminate every unit with code 0 and wait for all of them
    pub async fn shutdown(&mut self) {
        join_all(self.units.iter().map(Unit::terminate)).await;
        self.units.clear();
        info!("[runtime] all scan threads stopped");
    }
}
