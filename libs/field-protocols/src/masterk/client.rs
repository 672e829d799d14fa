//! Master-K client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use field_comlink::bytes::unpack_word_bits;
use field_comlink::{
    DeviceAddress, DeviceClass, LinkError, LinkLogger, LogLevel, ProtocolType, Result,
    SharedObserver,
};

use super::frame::{
    decode_words, parse_response, read_payload, MasterKRequest, MasterKResponse, MAX_BLOCK_WORDS,
};
use crate::client::{check_count, DeviceClient};
use crate::transport::{ReceivePolicy, TransportConfig, TransportManager, TransportStats, Verdict};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKOptions {
    /// PLC station number
    #[serde(default)]
    pub station: u8,
    /// Append and verify block check characters
    #[serde(default)]
    pub bcc: bool,
    #[serde(default)]
    pub log_level: LogLevel,
}

#[derive(Debug)]
pub struct MasterKClient {
    name: String,
    transport: TransportManager,
    station: u8,
    bcc: bool,
}

impl MasterKClient {
    pub fn new(
        name: impl Into<String>,
        transport: TransportConfig,
        options: MasterKOptions,
    ) -> Result<Self> {
        let name = name.into();
        let transport =
            transport.with_default_timeout(ProtocolType::MasterK.default_timeout_ms());
        transport.validate()?;
        let logger = LinkLogger::new(name.clone(), options.log_level);

        Ok(Self {
            name,
            transport: TransportManager::new(transport, logger),
            station: options.station,
            bcc: options.bcc,
        })
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.transport = self.transport.with_observer(observer);
        self
    }

    pub fn transport(&self) -> &TransportManager {
        &self.transport
    }

    async fn execute(&self, operation: &str, request: MasterKRequest) -> Result<MasterKResponse> {
        let frame = request
            .encode(self.station, self.bcc)
            .map_err(|e| self.reject(operation, e))?;
        debug!("[{}] {} {}B", self.name, operation, frame.len());

        let bcc = self.bcc;
        let result = self
            .transport
            .exchange(&frame, ReceivePolicy::InPlace, |buf| {
                Verdict::classify(parse_response(buf, bcc), |_| false)
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

    async fn read_bit(&self, address: DeviceAddress) -> Result<bool> {
        let operation = format!("read bit {}", address);
        let response = self
            .execute(&operation, MasterKRequest::ReadBit { address })
            .await?;
        let data = read_payload(&response.body).map_err(|e| self.reject(&operation, e))?;
        match data.first() {
            Some(value) => Ok(*value != 0),
            None => Err(self.reject(&operation, LinkError::malformed("empty bit read"))),
        }
    }

    async fn read_block(&self, address: DeviceAddress, count: usize) -> Result<Vec<u16>> {
        let operation = format!("read {} words at {}", count, address);
        let response = self
            .execute(&operation, MasterKRequest::ReadWords { address, count })
            .await?;
        read_payload(&response.body)
            .and_then(|data| decode_words(&data, count))
            .map_err(|e| self.reject(&operation, e))
    }
}

/// Contacts have no packed word view; they are read bit by bit
fn is_contact(class: DeviceClass) -> bool {
    matches!(
        class,
        DeviceClass::TimerContact | DeviceClass::CounterContact
    )
}

#[async_trait]
impl DeviceClient for MasterKClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> ProtocolType {
        ProtocolType::MasterK
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
        check_count("Master-K word read", count, MAX_BLOCK_WORDS)
            .map_err(|e| self.reject("read words", e))?;
        self.read_block(address, count).await
    }

    async fn read_bits(&self, address: DeviceAddress, count: usize) -> Result<Vec<bool>> {
        check_count("Master-K bit read", count, MAX_BLOCK_WORDS * 16)
            .map_err(|e| self.reject("read bits", e))?;
        let last = address
            .last_offset(count)
            .map_err(|e| self.reject("read bits", e))?;

        if count == 1 || is_contact(address.class) {
            let mut bits = Vec::with_capacity(count);
            for i in 0..count as u32 {
                bits.push(self.read_bit(address.advance(i)?).await?);
            }
            return Ok(bits);
        }

        // Packed relays: read the covering words and cut the range out
        let first_word = address.offset / 16;
        let last_word = last / 16;
        let words = (last_word - first_word + 1) as usize;
        if words > MAX_BLOCK_WORDS {
            return Err(self.reject(
                "read bits",
                LinkError::config(format!(
                    "{} bits at {} span {} words, more than {}",
                    count, address, words, MAX_BLOCK_WORDS
                )),
            ));
        }

        let block = self
            .read_block(DeviceAddress::new(address.class, first_word), words)
            .await?;
        let skip = (address.offset % 16) as usize;
        Ok(unpack_word_bits(&block, skip + count).split_off(skip))
    }

    async fn write_words(&self, address: DeviceAddress, values: &[u16]) -> Result<()> {
        let operation = format!("write {} words at {}", values.len(), address);
        check_count("Master-K word write", values.len(), MAX_BLOCK_WORDS)
            .map_err(|e| self.reject(&operation, e))?;
        self.execute(
            &operation,
            MasterKRequest::WriteWords {
                address,
                values: values.to_vec(),
            },
        )
        .await
        .map(|_| ())
    }

    /// One SS request per bit
    async fn write_bits(&self, address: DeviceAddress, values: &[bool]) -> Result<()> {
        check_count("Master-K bit write", values.len(), MAX_BLOCK_WORDS * 16)
            .map_err(|e| self.reject("write bits", e))?;
        address
            .last_offset(values.len())
            .map_err(|e| self.reject("write bits", e))?;
        for (i, value) in values.iter().enumerate() {
            let target = address.advance(i as u32)?;
            let operation = format!("write bit {}", target);
            self.execute(
                &operation,
                MasterKRequest::WriteBit {
                    address: target,
                    value: *value,
                },
            )
            .await?;
        }
        Ok(())
    }

    fn set_cancellation(&self, token: CancellationToken) {
        self.transport.set_cancellation(token);
    }

    fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }
}
