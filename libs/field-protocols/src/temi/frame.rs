//! Temi controller frames
//!
//! ```text
//! request:  STX addr(2) RSD|WSD ,count(2) ,start(4) [,value(4)]... cs(2) CR LF
//! response: STX addr(2) cmd(3) ,OK [,value(4)]... cs(2) CR LF
//!           STX addr(2) cmd(3) ,NG code(2) cs(2) CR LF
//! ```
//!
//! Address, values and checksum are hex; count and start are decimal. The
//! checksum is the byte sum of everything between STX and the checksum.

use field_comlink::bytes::{
    bcc_chars, parse_hex, push_dec, push_hex, sum8, verify_bcc, CR, LF, STX,
};
use field_comlink::{DeviceAddress, DeviceClass, LinkError, Result, ValidationError};

pub const MAX_REGISTERS: usize = 32;
pub const MAX_REGISTER_ADDRESS: u32 = 9999;

/// STX + address + command
pub const ECHO_LEN: usize = 6;
const STATUS_OFFSET: usize = 7;
const NG_CODE_OFFSET: usize = 9;
/// checksum + CR LF
const TRAILER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemiRequest {
    /// RSD: read consecutive registers
    Read { start: u32, count: usize },
    /// WSD: write consecutive registers
    Write { start: u32, values: Vec<u16> },
}

impl TemiRequest {
    pub fn command(&self) -> &'static [u8; 3] {
        match self {
            TemiRequest::Read { .. } => b"RSD",
            TemiRequest::Write { .. } => b"WSD",
        }
    }

    fn start(&self) -> u32 {
        match self {
            TemiRequest::Read { start, .. } | TemiRequest::Write { start, .. } => *start,
        }
    }

    fn count(&self) -> usize {
        match self {
            TemiRequest::Read { count, .. } => *count,
            TemiRequest::Write { values, .. } => values.len(),
        }
    }

    pub fn encode(&self, address: u8) -> Result<Vec<u8>> {
        let count = self.count();
        crate::client::check_count("Temi register access", count, MAX_REGISTERS)?;
        let in_range = self
            .start()
            .checked_add(count as u32 - 1)
            .is_some_and(|last| last <= MAX_REGISTER_ADDRESS);
        if !in_range {
            return Err(LinkError::config(format!(
                "{} registers from {} exceed {}",
                count,
                self.start(),
                MAX_REGISTER_ADDRESS
            )));
        }

        let mut frame = Vec::with_capacity(16 + count * 5);
        frame.push(STX);
        push_hex(&mut frame, u32::from(address), 2);
        frame.extend_from_slice(self.command());
        frame.push(b',');
        push_dec(&mut frame, count as u32, 2);
        frame.push(b',');
        push_dec(&mut frame, self.start(), 4);
        if let TemiRequest::Write { values, .. } = self {
            for value in values {
                frame.push(b',');
                push_hex(&mut frame, u32::from(*value), 4);
            }
        }
        let cs = sum8(&frame[1..]);
        frame.extend_from_slice(&bcc_chars(cs));
        frame.extend_from_slice(&[CR, LF]);
        Ok(frame)
    }
}

/// Register number of a data register address
pub fn register(address: DeviceAddress) -> Result<u32> {
    if address.class != DeviceClass::DataRegister {
        return Err(LinkError::config(format!(
            "Temi only addresses data registers, got {}",
            address
        )));
    }
    Ok(address.offset)
}

/// Validate a response against the request it answers
///
/// Checks run in order: frame complete, echo of the request prefix
/// (retriable), checksum, NG status.
pub fn parse_response(frame: &[u8], request: &[u8]) -> Result<Option<Vec<u16>>> {
    let Some(end) = frame.windows(2).position(|w| w == [CR, LF]) else {
        return Ok(None);
    };
    let frame = &frame[..end + 2];

    let echo = request.get(..ECHO_LEN).unwrap_or(request);
    if frame.len() < ECHO_LEN || frame[..ECHO_LEN] != *echo {
        return Err(ValidationError::EchoMismatch.into());
    }
    if frame.len() < STATUS_OFFSET + 2 + TRAILER_LEN {
        return Err(LinkError::malformed(format!(
            "response too short: {} bytes",
            frame.len()
        )));
    }

    let cs_at = frame.len() - TRAILER_LEN;
    verify_bcc(&frame[1..cs_at], &frame[cs_at..cs_at + 2])?;

    let body = &frame[ECHO_LEN..cs_at];
    match &frame[STATUS_OFFSET..STATUS_OFFSET + 2] {
        b"OK" => {},
        b"NG" => {
            let code = frame
                .get(NG_CODE_OFFSET..NG_CODE_OFFSET + 2)
                .filter(|_| NG_CODE_OFFSET + 2 <= cs_at)
                .ok_or_else(|| LinkError::malformed("NG without error code"))?;
            return Err(ValidationError::DeviceRejected {
                code: parse_hex(code)? as u16,
            }
            .into());
        },
        other => {
            return Err(LinkError::malformed(format!(
                "unknown status '{}'",
                String::from_utf8_lossy(other)
            )))
        },
    }

    // ",OK" then ",XXXX" per value
    let values = &body[3..];
    values
        .split(|b| *b == b',')
        .skip(1)
        .map(|field| {
            if field.len() != 4 {
                return Err(LinkError::malformed(format!(
                    "value field of {} chars",
                    field.len()
                )));
            }
            parse_hex(field).map(|v| v as u16)
        })
        .collect::<Result<Vec<u16>>>()
        .map(Some)
}

/// Build a response frame (used by device simulators and tests)
pub fn encode_response(address: u8, command: &[u8; 3], result: std::result::Result<&[u16], u8>) -> Vec<u8> {
    let mut frame = vec![STX];
    push_hex(&mut frame, u32::from(address), 2);
    frame.extend_from_slice(command);
    match result {
        Ok(values) => {
            frame.extend_from_slice(b",OK");
            for value in values {
                frame.push(b',');
                push_hex(&mut frame, u32::from(*value), 4);
            }
        },
        Err(code) => {
            frame.extend_from_slice(b",NG");
            push_hex(&mut frame, u32::from(code), 2);
        },
    }
    let cs = sum8(&frame[1..]);
    frame.extend_from_slice(&bcc_chars(cs));
    frame.extend_from_slice(&[CR, LF]);
    frame
}
