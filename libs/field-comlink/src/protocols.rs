//! Shared protocol types for the field clients
//!
//! Protocol identifiers and the device addressing model shared by all
//! three protocols. Each protocol maps `DeviceClass` onto its own numeric
//! code or letter; the mapping lives next to the codec.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LinkError;

// ============================================================================
// Protocol Types
// ============================================================================

/// Supported protocol types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    /// Binary MC 4E frames
    Melsec,
    /// Master-K ASCII relay frames
    MasterK,
    /// Temperature/humidity controller ASCII frames
    Temi,
}

impl ProtocolType {
    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "melsec" | "mc" | "mc4e" => Some(Self::Melsec),
            "master_k" | "masterk" | "cnet" => Some(Self::MasterK),
            "temi" | "temi2500" => Some(Self::Temi),
            _ => None,
        }
    }

    /// Whether the protocol is ASCII framed
    pub fn is_ascii(&self) -> bool {
        matches!(self, Self::MasterK | Self::Temi)
    }

    /// Default receive timeout in milliseconds
    pub fn default_timeout_ms(&self) -> u64 {
        match self {
            Self::Melsec => 1000,
            Self::MasterK => 500,
            Self::Temi => 250,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Melsec => "melsec",
            Self::MasterK => "master_k",
            Self::Temi => "temi",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProtocolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Unknown protocol type: {}", s))
    }
}

// ============================================================================
// Device Addressing
// ============================================================================

/// Controller memory category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Input,
    Output,
    InternalRelay,
    LatchRelay,
    LinkRelay,
    KeepRelay,
    SpecialRelay,
    TimerContact,
    TimerValue,
    CounterContact,
    CounterValue,
    DataRegister,
    LinkRegister,
    FileRegister,
}

impl DeviceClass {
    /// Textual prefixes, two-letter forms first so they win over one-letter ones
    const PREFIXES: [(&'static str, DeviceClass); 15] = [
        ("SM", DeviceClass::SpecialRelay),
        ("TS", DeviceClass::TimerContact),
        ("TN", DeviceClass::TimerValue),
        ("CS", DeviceClass::CounterContact),
        ("CN", DeviceClass::CounterValue),
        ("ZR", DeviceClass::FileRegister),
        ("X", DeviceClass::Input),
        ("Y", DeviceClass::Output),
        ("M", DeviceClass::InternalRelay),
        ("L", DeviceClass::LatchRelay),
        ("B", DeviceClass::LinkRelay),
        ("K", DeviceClass::KeepRelay),
        ("D", DeviceClass::DataRegister),
        ("W", DeviceClass::LinkRegister),
        ("R", DeviceClass::FileRegister),
    ];

    /// Canonical textual prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            DeviceClass::Input => "X",
            DeviceClass::Output => "Y",
            DeviceClass::InternalRelay => "M",
            DeviceClass::LatchRelay => "L",
            DeviceClass::LinkRelay => "B",
            DeviceClass::KeepRelay => "K",
            DeviceClass::SpecialRelay => "SM",
            DeviceClass::TimerContact => "TS",
            DeviceClass::TimerValue => "TN",
            DeviceClass::CounterContact => "CS",
            DeviceClass::CounterValue => "CN",
            DeviceClass::DataRegister => "D",
            DeviceClass::LinkRegister => "W",
            DeviceClass::FileRegister => "ZR",
        }
    }

    /// Offsets of I/O and link devices are written in hex
    pub fn hex_offset(&self) -> bool {
        matches!(
            self,
            DeviceClass::Input
                | DeviceClass::Output
                | DeviceClass::LinkRelay
                | DeviceClass::LinkRegister
        )
    }
}

/// Access unit of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessUnit {
    Bit,
    Word,
}

/// (device class, offset) inside the controller's memory map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress {
    pub class: DeviceClass,
    pub offset: u32,
}

impl DeviceAddress {
    pub const fn new(class: DeviceClass, offset: u32) -> Self {
        Self { class, offset }
    }

    /// Address `n` points further on
    pub fn advance(&self, n: u32) -> Result<Self, LinkError> {
        let offset = self.offset.checked_add(n).ok_or_else(|| {
            LinkError::config(format!("{} + {} overflows the device offset", self, n))
        })?;
        Ok(Self {
            class: self.class,
            offset,
        })
    }

    /// Offset of the last point of a `count`-point range starting here
    pub fn last_offset(&self, count: usize) -> Result<u32, LinkError> {
        let span = u32::try_from(count.saturating_sub(1))
            .map_err(|_| LinkError::config(format!("{} points at {} is too many", count, self)))?;
        Ok(self.advance(span)?.offset)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.class.hex_offset() {
            write!(f, "{}{:X}", self.class.prefix(), self.offset)
        } else {
            write!(f, "{}{}", self.class.prefix(), self.offset)
        }
    }
}

impl FromStr for DeviceAddress {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_uppercase();
        let (prefix, class) = DeviceClass::PREFIXES
            .iter()
            .find(|(prefix, _)| {
                text.starts_with(prefix)
                    && text[prefix.len()..]
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_ascii_hexdigit())
            })
            .ok_or_else(|| LinkError::config(format!("unknown device address '{}'", s)))?;

        let digits = &text[prefix.len()..];
        let radix = if class.hex_offset() { 16 } else { 10 };
        let offset = u32::from_str_radix(digits, radix)
            .map_err(|_| LinkError::config(format!("invalid device offset in '{}'", s)))?;

        Ok(Self::new(*class, offset))
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = LinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(value: DeviceAddress) -> Self {
        value.to_string()
    }
}
