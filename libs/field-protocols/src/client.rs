//! Device client interface
//!
//! The scanner and the runner talk to every protocol through this trait.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use field_comlink::{DeviceAddress, LinkError, ProtocolType, Result};

use crate::transport::TransportStats;

/// Polled field device
#[async_trait]
pub trait DeviceClient: Send + Sync {
    fn name(&self) -> &str;

    fn protocol(&self) -> ProtocolType;

    async fn open(&self) -> Result<()>;

    async fn close(&self);

    fn is_open(&self) -> bool;

    /// Read `count` consecutive words starting at `address`
    async fn read_words(&self, address: DeviceAddress, count: usize) -> Result<Vec<u16>>;

    /// Read `count` consecutive bits starting at `address`
    async fn read_bits(&self, address: DeviceAddress, count: usize) -> Result<Vec<bool>>;

    async fn write_words(&self, address: DeviceAddress, values: &[u16]) -> Result<()>;

    async fn write_bits(&self, address: DeviceAddress, values: &[bool]) -> Result<()>;

    /// Token observed by the receive loop; cancelling it aborts a pending
    /// exchange with `Terminated`
    fn set_cancellation(&self, token: CancellationToken);

    fn transport_stats(&self) -> TransportStats;
}

/// Reject an empty or oversized request before any I/O
pub(crate) fn check_count(operation: &str, count: usize, max: usize) -> Result<()> {
    if count == 0 || count > max {
        return Err(LinkError::config(format!(
            "{} count {} out of range 1..={}",
            operation, count, max
        )));
    }
    Ok(())
}
