//! Field Protocol Implementations
//!
//! Protocol clients for the field devices polled by the scan threads.
//! Protocols are feature-gated for selective compilation.
//!
//! # Features
//!
//! - `melsec` - Melsec MC protocol, 4E binary frames
//! - `masterk` - LG Master-K ASCII protocol
//! - `temi` - Temi temperature/humidity controller ASCII protocol
//!
//! # Architecture
//!
//! ```text
//! field-protocols
//!     ├── TransportManager (TCP port failover / UDP, bounded receive)
//!     ├── SerialGenerator (per-client request serials)
//!     ├── DeviceClient (trait implemented by every protocol client)
//!     ├── melsec / masterk / temi (frame codecs + clients)
//!     └── Scanner (ScanLoop: client -> RegisterFile, offline mode)
//! ```

pub mod client;
pub mod scanner;
pub mod serial;
pub mod transport;

#[cfg(feature = "masterk")]
pub mod masterk;

#[cfg(feature = "melsec")]
pub mod melsec;

#[cfg(feature = "temi")]
pub mod temi;

pub use client::DeviceClient;
pub use scanner::{LinkStatus, OfflineMode, ScanBlock, Scanner, ScannerOptions};
pub use serial::{SerialGenerator, SerialMode};
pub use transport::{
    ReceivePolicy, TransportConfig, TransportKind, TransportManager, TransportStats, Verdict,
};

#[cfg(feature = "masterk")]
pub use masterk::{MasterKClient, MasterKOptions};
#[cfg(feature = "melsec")]
pub use melsec::{MelsecClient, MelsecOptions};
#[cfg(feature = "temi")]
pub use temi::{TemiClient, TemiOptions};

// Re-export common types for convenience
pub use field_comlink::{
    AccessUnit, ConnectionState, DeviceAddress, DeviceClass, LinkError, ProtocolType,
    RegisterFile, Result,
};
