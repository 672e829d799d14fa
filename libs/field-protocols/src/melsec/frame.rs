//! MC 4E binary frames
//!
//! Request layout (little-endian):
//!
//! ```text
//! [0..2]   subheader 54 00
//! [2..4]   serial
//! [4..6]   reserved 00 00
//! [6]      network no.
//! [7]      PC no.
//! [8..10]  request destination I/O no.
//! [10]     station no.
//! [11..13] data length (bytes from offset 13 to the end)
//! [13..15] monitoring timer (x250 ms)
//! [15..17] command
//! [17..19] subcommand
//! [19..23] head device: 3-byte number + 1-byte device code
//! [23..25] point count
//! [25..]   write data
//! ```
//!
//! Responses start with D4 00, echo serial and route, carry their data
//! length at 11, the end code at 13 and the payload from 15.

use serde::{Deserialize, Serialize};

use field_comlink::bytes::{pack_nibble_bits, unpack_nibble_bits};
use field_comlink::{
    AccessUnit, DeviceAddress, LinkError, Result, ValidationError,
};

use super::device::{device_class, device_code};

pub const REQUEST_SUBHEADER: [u8; 2] = [0x54, 0x00];
pub const RESPONSE_SUBHEADER: [u8; 2] = [0xD4, 0x00];

/// Bytes before the data length field
pub const LENGTH_OFFSET: usize = 11;
/// Bytes counted by the data length field start here
pub const BODY_OFFSET: usize = 13;
pub const REQUEST_HEADER_LEN: usize = 19;
pub const RESPONSE_HEADER_LEN: usize = 15;

pub const CMD_BATCH_READ: u16 = 0x0401;
pub const CMD_BATCH_WRITE: u16 = 0x1401;
pub const SUB_WORD: u16 = 0x0000;
pub const SUB_BIT: u16 = 0x0001;

pub const MAX_WORDS: usize = 960;
pub const MAX_BITS: usize = 7168;
pub const MAX_DEVICE_NUMBER: u32 = 0x00FF_FFFF;

/// Network route of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub network: u8,
    #[serde(default = "default_pc")]
    pub pc: u8,
    #[serde(default = "default_io")]
    pub io: u16,
    #[serde(default)]
    pub station: u8,
}

fn default_pc() -> u8 {
    0xFF
}

fn default_io() -> u16 {
    0x03FF
}

impl Default for Route {
    fn default() -> Self {
        Self {
            network: 0,
            pc: default_pc(),
            io: default_io(),
            station: 0,
        }
    }
}

/// Batch read/write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MelsecRequest {
    pub serial: u16,
    pub route: Route,
    pub monitoring_timer: u16,
    pub command: u16,
    pub subcommand: u16,
    pub address: DeviceAddress,
    pub count: u16,
    /// Encoded write data (words LE or nibble-packed bits)
    pub data: Vec<u8>,
}

impl MelsecRequest {
    pub fn read(
        serial: u16,
        route: Route,
        monitoring_timer: u16,
        address: DeviceAddress,
        unit: AccessUnit,
        count: usize,
    ) -> Result<Self> {
        check_points(address, unit, count)?;
        Ok(Self {
            serial,
            route,
            monitoring_timer,
            command: CMD_BATCH_READ,
            subcommand: subcommand(unit),
            address,
            count: count as u16,
            data: Vec::new(),
        })
    }

    pub fn write_words(
        serial: u16,
        route: Route,
        monitoring_timer: u16,
        address: DeviceAddress,
        values: &[u16],
    ) -> Result<Self> {
        check_points(address, AccessUnit::Word, values.len())?;
        Ok(Self {
            serial,
            route,
            monitoring_timer,
            command: CMD_BATCH_WRITE,
            subcommand: SUB_WORD,
            address,
            count: values.len() as u16,
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        })
    }

    pub fn write_bits(
        serial: u16,
        route: Route,
        monitoring_timer: u16,
        address: DeviceAddress,
        values: &[bool],
    ) -> Result<Self> {
        check_points(address, AccessUnit::Bit, values.len())?;
        Ok(Self {
            serial,
            route,
            monitoring_timer,
            command: CMD_BATCH_WRITE,
            subcommand: SUB_BIT,
            address,
            count: values.len() as u16,
            data: pack_nibble_bits(values),
        })
    }

    pub fn unit(&self) -> AccessUnit {
        if self.subcommand == SUB_BIT {
            AccessUnit::Bit
        } else {
            AccessUnit::Word
        }
    }

    /// Serialize to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let code = device_code(self.address.class)?;
        if self.address.offset > MAX_DEVICE_NUMBER {
            return Err(LinkError::config(format!(
                "device number {} exceeds 24 bits",
                self.address
            )));
        }

        let body_len = 2 + 2 + 2 + 4 + 2 + self.data.len();
        let mut frame = Vec::with_capacity(BODY_OFFSET + body_len);
        frame.extend_from_slice(&REQUEST_SUBHEADER);
        frame.extend_from_slice(&self.serial.to_le_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.push(self.route.network);
        frame.push(self.route.pc);
        frame.extend_from_slice(&self.route.io.to_le_bytes());
        frame.push(self.route.station);
        frame.extend_from_slice(&(body_len as u16).to_le_bytes());
        frame.extend_from_slice(&self.monitoring_timer.to_le_bytes());
        frame.extend_from_slice(&self.command.to_le_bytes());
        frame.extend_from_slice(&self.subcommand.to_le_bytes());
        let head = (u32::from(code) << 24) | self.address.offset;
        frame.extend_from_slice(&head.to_le_bytes());
        frame.extend_from_slice(&self.count.to_le_bytes());
        frame.extend_from_slice(&self.data);
        Ok(frame)
    }

    /// Parse a request frame (the server side of the exchange)
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < REQUEST_HEADER_LEN + 6 {
            return Err(LinkError::malformed(format!(
                "request too short: {} bytes",
                frame.len()
            )));
        }
        if frame[0..2] != REQUEST_SUBHEADER {
            return Err(ValidationError::UnknownHeader(frame[0]).into());
        }
        let body_len = le16(frame, LENGTH_OFFSET) as usize;
        if BODY_OFFSET + body_len != frame.len() {
            return Err(LinkError::malformed(format!(
                "length field {} does not match frame body {}",
                body_len,
                frame.len() - BODY_OFFSET
            )));
        }

        let head = u32::from_le_bytes([frame[19], frame[20], frame[21], frame[22]]);
        let code = (head >> 24) as u8;
        let class = device_class(code)
            .ok_or_else(|| LinkError::malformed(format!("unknown device code {:#04X}", code)))?;

        Ok(Self {
            serial: le16(frame, 2),
            route: Route {
                network: frame[6],
                pc: frame[7],
                io: le16(frame, 8),
                station: frame[10],
            },
            monitoring_timer: le16(frame, 13),
            command: le16(frame, 15),
            subcommand: le16(frame, 17),
            address: DeviceAddress::new(class, head & MAX_DEVICE_NUMBER),
            count: le16(frame, 23),
            data: frame[25..].to_vec(),
        })
    }
}

fn subcommand(unit: AccessUnit) -> u16 {
    match unit {
        AccessUnit::Bit => SUB_BIT,
        AccessUnit::Word => SUB_WORD,
    }
}

fn check_points(address: DeviceAddress, unit: AccessUnit, count: usize) -> Result<()> {
    let max = match unit {
        AccessUnit::Word => MAX_WORDS,
        AccessUnit::Bit => MAX_BITS,
    };
    crate::client::check_count(&format!("{:?} access at {}", unit, address), count, max)?;
    device_code(address.class)?;
    if address.last_offset(count)? > MAX_DEVICE_NUMBER {
        return Err(LinkError::config(format!(
            "{} points at {} exceed device number {:#X}",
            count, address, MAX_DEVICE_NUMBER
        )));
    }
    Ok(())
}

#[inline]
fn le16(frame: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([frame[offset], frame[offset + 1]])
}

// ============================================================================
// Response
// ============================================================================

/// Validated response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MelsecResponse {
    pub serial: u16,
    pub end_code: u16,
    pub data: Vec<u8>,
}

/// Length of the response frame at the head of `buf`, once its header is in
pub fn response_len(buf: &[u8]) -> Option<usize> {
    (buf.len() >= BODY_OFFSET).then(|| BODY_OFFSET + le16(buf, LENGTH_OFFSET) as usize)
}

/// Validate a response against the request serial
///
/// `Ok(None)` while the frame is still incomplete. The serial is checked
/// before the end code.
pub fn parse_response(frame: &[u8], expected_serial: u16) -> Result<Option<MelsecResponse>> {
    if frame.len() < 2 {
        return Ok(None);
    }
    if frame[0..2] != RESPONSE_SUBHEADER {
        return Err(ValidationError::UnknownHeader(frame[0]).into());
    }
    if frame.len() < BODY_OFFSET {
        return Ok(None);
    }

    let body_len = le16(frame, LENGTH_OFFSET) as usize;
    let total = BODY_OFFSET + body_len;
    if frame.len() < total {
        return Ok(None);
    }
    if body_len < 2 {
        return Err(LinkError::malformed(format!(
            "data length {} leaves no room for the end code",
            body_len
        )));
    }

    let serial = le16(frame, 2);
    if serial != expected_serial {
        return Err(ValidationError::SerialMismatch {
            expected: expected_serial,
            actual: serial,
        }
        .into());
    }

    let end_code = le16(frame, BODY_OFFSET);
    if end_code != 0 {
        return Err(ValidationError::DeviceRejected { code: end_code }.into());
    }

    Ok(Some(MelsecResponse {
        serial,
        end_code,
        data: frame[RESPONSE_HEADER_LEN..total].to_vec(),
    }))
}

/// Build a response frame (used by device simulators and tests)
pub fn encode_response(serial: u16, route: Route, end_code: u16, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(RESPONSE_HEADER_LEN + data.len());
    frame.extend_from_slice(&RESPONSE_SUBHEADER);
    frame.extend_from_slice(&serial.to_le_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.push(route.network);
    frame.push(route.pc);
    frame.extend_from_slice(&route.io.to_le_bytes());
    frame.push(route.station);
    frame.extend_from_slice(&((2 + data.len()) as u16).to_le_bytes());
    frame.extend_from_slice(&end_code.to_le_bytes());
    frame.extend_from_slice(data);
    frame
}

pub fn decode_words(data: &[u8], count: usize) -> Result<Vec<u16>> {
    if data.len() < count * 2 {
        return Err(LinkError::malformed(format!(
            "expected {} words, got {} bytes",
            count,
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(2)
        .take(count)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn decode_bits(data: &[u8], count: usize) -> Result<Vec<bool>> {
    if data.len() < count.div_ceil(2) {
        return Err(LinkError::malformed(format!(
            "expected {} bits, got {} bytes",
            count,
            data.len()
        )));
    }
    Ok(unpack_nibble_bits(data, count))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use field_comlink::DeviceClass;

    fn d(offset: u32) -> DeviceAddress {
        DeviceAddress::new(DeviceClass::DataRegister, offset)
    }

    #[test]
    fn test_read_request_layout() {
        let req = MelsecRequest::read(0x1234, Route::default(), 4, d(100), AccessUnit::Word, 4)
            .unwrap();
        let frame = req.encode().unwrap();

        assert_eq!(
            frame,
            vec![
                0x54, 0x00, // subheader
                0x34, 0x12, // serial
                0x00, 0x00, // reserved
                0x00, 0xFF, 0xFF, 0x03, 0x00, // route
                0x0C, 0x00, // length: 12 bytes follow
                0x04, 0x00, // monitoring timer
                0x01, 0x04, // batch read
                0x00, 0x00, // word units
                0x64, 0x00, 0x00, 0xA8, // D100
                0x04, 0x00, // 4 points
            ]
        );
        assert_eq!(le16(&frame, LENGTH_OFFSET) as usize, frame.len() - BODY_OFFSET);
    }

    #[test]
    fn test_header_round_trip() {
        let route = Route {
            network: 1,
            pc: 2,
            io: 0x03FF,
            station: 5,
        };
        let requests = [
            MelsecRequest::read(7, route, 4, d(0x1000), AccessUnit::Word, 960).unwrap(),
            MelsecRequest::write_words(8, route, 2, d(10), &[1, 0xFFFF, 3]).unwrap(),
            MelsecRequest::write_bits(
                9,
                Route::default(),
                4,
                DeviceAddress::new(DeviceClass::InternalRelay, 100),
                &[true, false, true],
            )
            .unwrap(),
        ];
        for req in requests {
            let decoded = MelsecRequest::decode(&req.encode().unwrap()).unwrap();
            assert_eq!(decoded, req);
        }
    }

    #[test]
    fn test_write_bits_are_nibble_packed() {
        let req = MelsecRequest::write_bits(
            1,
            Route::default(),
            4,
            DeviceAddress::new(DeviceClass::InternalRelay, 0),
            &[true, false, true],
        )
        .unwrap();
        assert_eq!(req.data, vec![0x10, 0x10]);
        assert_eq!(req.unit(), AccessUnit::Bit);
    }

    #[test]
    fn test_limits_checked_before_encoding() {
        assert!(MelsecRequest::read(1, Route::default(), 4, d(0), AccessUnit::Word, 961).is_err());
        assert!(MelsecRequest::read(1, Route::default(), 4, d(0), AccessUnit::Bit, 7168).is_ok());
        assert!(MelsecRequest::read(1, Route::default(), 4, d(0), AccessUnit::Bit, 7169).is_err());
        assert!(MelsecRequest::read(1, Route::default(), 4, d(0), AccessUnit::Word, 0).is_err());
        assert!(
            MelsecRequest::read(1, Route::default(), 4, d(0x0100_0000), AccessUnit::Word, 1)
                .is_err()
        );
        assert!(
            MelsecRequest::read(1, Route::default(), 4, d(0x00FF_FFFF), AccessUnit::Word, 2)
                .is_err()
        );
        assert!(matches!(
            MelsecRequest::read(1, Route::default(), 4, d(u32::MAX), AccessUnit::Word, 2),
            Err(LinkError::Config(_))
        ));
        let keep = DeviceAddress::new(DeviceClass::KeepRelay, 0);
        assert!(matches!(
            MelsecRequest::read(1, Route::default(), 4, keep, AccessUnit::Bit, 1),
            Err(LinkError::Config(_))
        ));
    }

    #[test]
    fn test_parse_response_ok() {
        let frame = encode_response(0x0042, Route::default(), 0, &[0x01, 0x00, 0x02, 0x00]);
        let resp = parse_response(&frame, 0x0042).unwrap().unwrap();
        assert_eq!(decode_words(&resp.data, 2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_response_len() {
        let frame = encode_response(1, Route::default(), 0, &[0x01, 0x00]);
        assert_eq!(response_len(&frame), Some(frame.len()));
        assert_eq!(response_len(&frame[..BODY_OFFSET - 1]), None);

        let mut two = frame.clone();
        two.extend_from_slice(&encode_response(2, Route::default(), 0, &[]));
        assert_eq!(response_len(&two), Some(frame.len()));
    }

    #[test]
    fn test_parse_response_incomplete() {
        let frame = encode_response(1, Route::default(), 0, &[0x01, 0x00]);
        for cut in [0, 1, 5, 12, frame.len() - 1] {
            assert!(parse_response(&frame[..cut], 1).unwrap().is_none());
        }
    }

    #[test]
    fn test_serial_checked_before_end_code() {
        let frame = encode_response(2, Route::default(), 0xC059, &[]);
        let err = parse_response(&frame, 1).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Validation(ValidationError::SerialMismatch {
                expected: 1,
                actual: 2
            })
        ));

        let err = parse_response(&frame, 2).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Validation(ValidationError::DeviceRejected { code: 0xC059 })
        ));
    }

    #[test]
    fn test_unknown_subheader() {
        let err = parse_response(&[0x50, 0x00, 0x00], 1).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Validation(ValidationError::UnknownHeader(0x50))
        ));
    }

    #[test]
    fn test_decode_bits_nibbles() {
        assert_eq!(
            decode_bits(&[0x10, 0x01, 0x10], 5).unwrap(),
            vec![true, false, false, true, true]
        );
        assert!(decode_bits(&[0x10], 3).is_err());
        assert!(decode_words(&[0x01], 1).is_err());
    }
}
