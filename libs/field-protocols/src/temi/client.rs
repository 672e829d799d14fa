//! Temi controller client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use field_comlink::{
    DeviceAddress, LinkError, LinkLogger, LogLevel, ProtocolType, Result, SharedObserver,
    ValidationError,
};

use super::frame::{parse_response, register, TemiRequest};
use crate::client::DeviceClient;
use crate::transport::{ReceivePolicy, TransportConfig, TransportManager, TransportStats, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemiOptions {
    /// Controller address on the line
    #[serde(default = "default_address")]
    pub address: u8,
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_address() -> u8 {
    1
}

impl Default for TemiOptions {
    fn default() -> Self {
        Self {
            address: default_address(),
            log_level: LogLevel::default(),
        }
    }
}

#[derive(Debug)]
pub struct TemiClient {
    name: String,
    transport: TransportManager,
    address: u8,
}

impl TemiClient {
    pub fn new(
        name: impl Into<String>,
        transport: TransportConfig,
        options: TemiOptions,
    ) -> Result<Self> {
        let name = name.into();
        let transport = transport.with_default_timeout(ProtocolType::Temi.default_timeout_ms());
        transport.validate()?;
        let logger = LinkLogger::new(name.clone(), options.log_level);

        Ok(Self {
            name,
            transport: TransportManager::new(transport, logger),
            address: options.address,
        })
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.transport = self.transport.with_observer(observer);
        self
    }

    pub fn transport(&self) -> &TransportManager {
        &self.transport
    }

    /// Echo mismatches send the request again
    async fn execute(&self, operation: &str, request: TemiRequest) -> Result<Vec<u16>> {
        let frame = request
            .encode(self.address)
            .map_err(|e| self.reject(operation, e))?;
        debug!("[{}] {} {}B", self.name, operation, frame.len());

        let result = self
            .transport
            .exchange(&frame, ReceivePolicy::Resend, |buf| {
                Verdict::classify(parse_response(buf, &frame), |v| {
                    matches!(v, ValidationError::EchoMismatch)
                })
            })
            .await;

        if let Err(e) = &result {
            if !e.is_terminated() {
                self.transport.logger().exception(operation, e);
            }
        }
        result
    }

    fn reject(&self, operation: &str, err: LinkError) -> LinkError {
        self.transport.logger().exception(operation, &err);
        err
    }
}

#[async_trait]
impl DeviceClient for TemiClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> ProtocolType {
        ProtocolType::Temi
    }

    async fn open(&self) -> Result<()> {
        self.transport.open().await
    }

    async fn close(&self) {
        self.transport.close().await
    }

    fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    async fn read_words(&self, address: DeviceAddress, count: usize) -> Result<Vec<u16>> {
        let operation = format!("read {} registers at {}", count, address);
        let start = register(address).map_err(|e| self.reject(&operation, e))?;
        let values = self
            .execute(&operation, TemiRequest::Read { start, count })
            .await?;
        if values.len() != count {
            return Err(self.reject(
                &operation,
                LinkError::malformed(format!("expected {} values, got {}", count, values.len())),
            ));
        }
        Ok(values)
    }

    async fn read_bits(&self, address: DeviceAddress, _count: usize) -> Result<Vec<bool>> {
        Err(self.reject(
            "read bits",
            LinkError::not_supported(format!("Temi has no bit access ({})", address)),
        ))
    }

    async fn write_words(&self, address: DeviceAddress, values: &[u16]) -> Result<()> {
        let operation = format!("write {} registers at {}", values.len(), address);
        let start = register(address).map_err(|e| self.reject(&operation, e))?;
        self.execute(
            &operation,
            TemiRequest::Write {
                start,
                values: values.to_vec(),
            },
        )
        .await
        .map(|_| ())
    }

    async fn write_bits(&self, address: DeviceAddress, _values: &[bool]) -> Result<()> {
        Err(self.reject(
            "write bits",
            LinkError::not_supported(format!("Temi has no bit access ({})", address)),
        ))
    }

    fn set_cancellation(&self, token: CancellationToken) {
        self.transport.set_cancellation(token);
    }

    fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }
}
