//! Field Communication Link Library
//!
//! Core communication primitives shared by the field protocol clients and
//! the scan scheduler.
//!
//! # Architecture
//!
//! This library provides:
//! - **Errors**: `LinkError` taxonomy (connection, timeout, stream, validation, config, termination)
//! - **Bytes Utilities**: nibble-packed bits, additive checksums, fixed-width ASCII fields
//! - **Protocol Types**: `ProtocolType`, `DeviceClass`, `DeviceAddress`, `AccessUnit`
//! - **Clock**: monotonic `ScanClock` with park/unpark for suspended scan threads
//! - **Register File**: double-buffered old/new storage with edge detection
//! - **Logging**: `LinkLogger` over a `LogSink` (`Log(tag, message)` contract)
//! - **Observer**: `ScanObserver` callbacks fired around scans and exchanges

pub mod bytes;
pub mod clock;
pub mod error;
pub mod logger;
pub mod protocols;
pub mod registers;
pub mod traits;

// Re-export core types
pub use clock::ScanClock;
pub use error::{LinkError, Result, ValidationError};
pub use logger::{LinkLogger, LogLevel, LogSink, LogTag, TracingSink};
pub use protocols::{AccessUnit, DeviceAddress, DeviceClass, ProtocolType};
pub use registers::{RegisterAddr, RegisterFile, RegisterKind, TagTable};
pub use traits::{noop_observer, ConnectionState, NoopObserver, ScanObserver, SharedObserver};
