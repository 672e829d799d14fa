//! Melsec MC 4E client

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use field_comlink::{
    AccessUnit, DeviceAddress, LinkError, LinkLogger, LogLevel, ProtocolType, Result,
    SharedObserver, ValidationError,
};

use super::frame::{
    decode_bits, decode_words, parse_response, response_len, MelsecRequest, MelsecResponse, Route,
};
use crate::client::DeviceClient;
use crate::serial::{SerialGenerator, SerialMode};
use crate::transport::{ReceivePolicy, TransportConfig, TransportManager, TransportStats, Verdict};

/// Monitoring timer resolution
const TIMER_UNIT_MS: u64 = 250;

/// Client options besides the transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MelsecOptions {
    #[serde(default)]
    pub route: Route,
    #[serde(default)]
    pub serial: SerialMode,
    /// Monitoring timer in 250 ms units; derived from the receive window
    /// when unset
    #[serde(default)]
    pub monitoring_timer: Option<u16>,
    #[serde(default)]
    pub log_level: LogLevel,
}

pub struct MelsecClient {
    name: String,
    transport: TransportManager,
    serials: Mutex<SerialGenerator>,
    route: Route,
    monitoring_timer: u16,
}

impl std::fmt::Debug for MelsecClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelsecClient")
            .field("name", &self.name)
            .field("route", &self.route)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl MelsecClient {
    pub fn new(
        name: impl Into<String>,
        transport: TransportConfig,
        options: MelsecOptions,
    ) -> Result<Self> {
        let name = name.into();
        let transport =
            transport.with_default_timeout(ProtocolType::Melsec.default_timeout_ms());
        transport.validate()?;

        let monitoring_timer = options
            .monitoring_timer
            .unwrap_or_else(|| timer_units(transport.timeout().as_millis() as u64));
        let logger = LinkLogger::new(name.clone(), options.log_level);

        Ok(Self {
            name,
            transport: TransportManager::new(transport, logger),
            serials: Mutex::new(SerialGenerator::new(options.serial)),
            route: options.route,
            monitoring_timer,
        })
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.transport = self.transport.with_observer(observer);
        self
    }

    pub fn transport(&self) -> &TransportManager {
        &self.transport
    }

    fn next_serial(&self) -> u16 {
        self.serials.lock().next_serial()
    }

    /// One request/response round trip, correlated by serial
    async fn execute(&self, operation: &str, request: MelsecRequest) -> Result<MelsecResponse> {
        let frame = match request.encode() {
            Ok(frame) => frame,
            Err(e) => {
                self.transport.logger().exception(operation, &e);
                return Err(e);
            },
        };
        let serial = request.serial;
        debug!(
            "[{}] {} serial={:#06X} {}B",
            self.name,
            operation,
            serial,
            frame.len()
        );

        let result = self
            .transport
            .exchange(&frame, ReceivePolicy::InPlace, |buf| {
                Verdict::classify(parse_response(buf, serial), |v| {
                    matches!(v, ValidationError::SerialMismatch { .. })
                })
                .with_frame_len(response_len(buf))
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

/// Receive window expressed in monitoring timer units, at least one
fn timer_units(timeout_ms: u64) -> u16 {
    timeout_ms.div_ceil(TIMER_UNIT_MS).clamp(1, u64::from(u16::MAX)) as u16
}

#[async_trait]
impl DeviceClient for MelsecClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> ProtocolType {
        ProtocolType::Melsec
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
        let operation = format!("read {} words at {}", count, address);
        let request = MelsecRequest::read(
            self.next_serial(),
            self.route,
            self.monitoring_timer,
            address,
            AccessUnit::Word,
            count,
        )
        .map_err(|e| self.reject(&operation, e))?;

        let response = self.execute(&operation, request).await?;
        decode_words(&response.data, count).map_err(|e| self.reject(&operation, e))
    }

    async fn read_bits(&self, address: DeviceAddress, count: usize) -> Result<Vec<bool>> {
        let operation = format!("read {} bits at {}", count, address);
        let request = MelsecRequest::read(
            self.next_serial(),
            self.route,
            self.monitoring_timer,
            address,
            AccessUnit::Bit,
            count,
        )
        .map_err(|e| self.reject(&operation, e))?;

        let response = self.execute(&operation, request).await?;
        decode_bits(&response.data, count).map_err(|e| self.reject(&operation, e))
    }

    async fn write_words(&self, address: DeviceAddress, values: &[u16]) -> Result<()> {
        let operation = format!("write {} words at {}", values.len(), address);
        let request = MelsecRequest::write_words(
            self.next_serial(),
            self.route,
            self.monitoring_timer,
            address,
            values,
        )
        .map_err(|e| self.reject(&operation, e))?;

        self.execute(&operation, request).await.map(|_| ())
    }

    async fn write_bits(&self, address: DeviceAddress, values: &[bool]) -> Result<()> {
        let operation = format!("write {} bits at {}", values.len(), address);
        let request = MelsecRequest::write_bits(
            self.next_serial(),
            self.route,
            self.monitoring_timer,
            address,
            values,
        )
        .map_err(|e| self.reject(&operation, e))?;

        self.execute(&operation, request).await.map(|_| ())
    }

    fn set_cancellation(&self, token: CancellationToken) {
        self.transport.set_cancellation(token);
    }

    fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use field_comlink::DeviceClass;

    #[test]
    fn test_timer_units() {
        assert_eq!(timer_units(1000), 4);
        assert_eq!(timer_units(1001), 5);
        assert_eq!(timer_units(0), 1);
        assert_eq!(timer_units(u64::MAX), u16::MAX);
    }

    #[test]
    fn test_defaults_applied() {
        let client = MelsecClient::new(
            "plc",
            TransportConfig::tcp("127.0.0.1", 5000),
            MelsecOptions::default(),
        )
        .unwrap();
        assert_eq!(client.transport().config().timeout_ms, Some(1000));
        assert_eq!(client.monitoring_timer, 4);
        assert_eq!(client.protocol(), ProtocolType::Melsec);
        assert!(!client.is_open());
    }

    #[test]
    fn test_options_from_json() {
        let options: MelsecOptions = serde_json::from_str(
            r#"{"route": {"station": 3}, "serial": {"seeded": 7}, "monitoring_timer": 8}"#,
        )
        .unwrap();
        assert_eq!(options.route.station, 3);
        assert_eq!(options.route.pc, 0xFF);
        assert_eq!(options.serial, SerialMode::Seeded(7));
        assert_eq!(options.monitoring_timer, Some(8));
    }

    #[tokio::test]
    async fn test_limits_rejected_before_io() {
        // Nothing listens on this port; a Config error proves no connect was tried
        let client = MelsecClient::new(
            "plc",
            TransportConfig::tcp("127.0.0.1", 1),
            MelsecOptions::default(),
        )
        .unwrap();
        let d0 = DeviceAddress::new(DeviceClass::DataRegister, 0);

        assert!(matches!(
            client.read_words(d0, 961).await,
            Err(LinkError::Config(_))
        ));
        assert!(matches!(
            client.write_bits(DeviceAddress::new(DeviceClass::KeepRelay, 0), &[true]).await,
            Err(LinkError::Config(_))
        ));
        assert_eq!(client.transport_stats().connect_attempts, 0);
    }
}
