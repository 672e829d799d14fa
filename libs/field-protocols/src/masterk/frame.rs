//! Master-K ASCII frames
//!
//! ```text
//! request:  ENQ plc(2) cmd(1) SS|SB len(2) %<dev><X|W><addr(4)>[bit(1)] [count(2)] [value] EOT [bcc(2)]
//! response: ACK plc(2) cmd(1) SS|SB [blocks(2) (bytes(2) data)...] ETX [bcc(2)]
//!           NAK plc(2) cmd(1) SS|SB error(4) ETX [bcc(2)]
//! ```
//!
//! Numbers in brackets are character widths; plc, len, count, values and
//! data are uppercase hex, addresses decimal. With BCC enabled the command
//! letter is lowercase and the frame carries a trailing byte sum.

use field_comlink::bytes::{
    bcc_chars, parse_hex, push_dec, push_hex, sum8, verify_bcc, ACK, ENQ, EOT, ETX, NAK,
};
use field_comlink::{AccessUnit, DeviceAddress, DeviceClass, LinkError, Result, ValidationError};

/// Words per SB block
pub const MAX_BLOCK_WORDS: usize = 60;
/// Highest 4-digit word address
pub const MAX_WORD_ADDRESS: u32 = 9999;

/// ACK/NAK + station + command + type
const RESPONSE_HEADER_LEN: usize = 6;

/// Device letter of a class
pub fn device_letter(class: DeviceClass) -> Result<u8> {
    let letter = match class {
        DeviceClass::Input | DeviceClass::Output => b'P',
        DeviceClass::InternalRelay => b'M',
        DeviceClass::LinkRelay => b'L',
        DeviceClass::KeepRelay => b'K',
        DeviceClass::SpecialRelay => b'F',
        DeviceClass::TimerContact | DeviceClass::TimerValue => b'T',
        DeviceClass::CounterContact | DeviceClass::CounterValue => b'C',
        DeviceClass::DataRegister => b'D',
        DeviceClass::LatchRelay | DeviceClass::LinkRegister | DeviceClass::FileRegister => {
            return Err(LinkError::config(format!(
                "device class {} has no Master-K device letter",
                class.prefix()
            )))
        },
    };
    Ok(letter)
}

/// Variable name: `%` device, region, 4-digit word address, bit digit
///
/// Bit offsets are flat: offset 0x13 is word 1 bit 3.
pub fn variable_name(address: DeviceAddress, unit: AccessUnit) -> Result<Vec<u8>> {
    let letter = device_letter(address.class)?;
    let mut name = Vec::with_capacity(8);
    name.push(b'%');
    name.push(letter);
    match unit {
        AccessUnit::Bit => {
            let word = address.offset / 16;
            check_word_address(address, word)?;
            name.push(b'X');
            push_dec(&mut name, word, 4);
            push_hex(&mut name, address.offset % 16, 1);
        },
        AccessUnit::Word => {
            check_word_address(address, address.offset)?;
            name.push(b'W');
            push_dec(&mut name, address.offset, 4);
        },
    }
    Ok(name)
}

fn check_word_address(address: DeviceAddress, word: u32) -> Result<()> {
    if word > MAX_WORD_ADDRESS {
        return Err(LinkError::config(format!(
            "{} is beyond word address {}",
            address, MAX_WORD_ADDRESS
        )));
    }
    Ok(())
}

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterKRequest {
    /// SS read of one bit
    ReadBit { address: DeviceAddress },
    /// SB read of consecutive words
    ReadWords { address: DeviceAddress, count: usize },
    /// SS write of one bit
    WriteBit { address: DeviceAddress, value: bool },
    /// SB write of consecutive words
    WriteWords {
        address: DeviceAddress,
        values: Vec<u16>,
    },
}

impl MasterKRequest {
    fn is_write(&self) -> bool {
        matches!(
            self,
            MasterKRequest::WriteBit { .. } | MasterKRequest::WriteWords { .. }
        )
    }

    fn block_type(&self) -> &'static [u8; 2] {
        match self {
            MasterKRequest::ReadBit { .. } | MasterKRequest::WriteBit { .. } => b"SS",
            MasterKRequest::ReadWords { .. } | MasterKRequest::WriteWords { .. } => b"SB",
        }
    }

    /// Command letter as sent on the wire
    pub fn command(&self, bcc: bool) -> u8 {
        let letter = if self.is_write() { b'W' } else { b'R' };
        if bcc {
            letter.to_ascii_lowercase()
        } else {
            letter
        }
    }

    pub fn encode(&self, station: u8, bcc: bool) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(32);
        frame.push(ENQ);
        push_hex(&mut frame, u32::from(station), 2);
        frame.push(self.command(bcc));
        frame.extend_from_slice(self.block_type());

        match self {
            MasterKRequest::ReadBit { address } => {
                push_variable(&mut frame, &variable_name(*address, AccessUnit::Bit)?);
            },
            MasterKRequest::WriteBit { address, value } => {
                push_variable(&mut frame, &variable_name(*address, AccessUnit::Bit)?);
                push_hex(&mut frame, u32::from(*value), 2);
            },
            MasterKRequest::ReadWords { address, count } => {
                check_block(*address, *count)?;
                push_variable(&mut frame, &variable_name(*address, AccessUnit::Word)?);
                push_hex(&mut frame, *count as u32, 2);
            },
            MasterKRequest::WriteWords { address, values } => {
                check_block(*address, values.len())?;
                push_variable(&mut frame, &variable_name(*address, AccessUnit::Word)?);
                push_hex(&mut frame, values.len() as u32, 2);
                for value in values {
                    push_hex(&mut frame, u32::from(*value), 4);
                }
            },
        }

        frame.push(EOT);
        if bcc {
            let sum = sum8(&frame);
            frame.extend_from_slice(&bcc_chars(sum));
        }
        Ok(frame)
    }
}

fn push_variable(frame: &mut Vec<u8>, name: &[u8]) {
    push_hex(frame, name.len() as u32, 2);
    frame.extend_from_slice(name);
}

fn check_block(address: DeviceAddress, count: usize) -> Result<()> {
    crate::client::check_count("SB block", count, MAX_BLOCK_WORDS)?;
    let last = address.last_offset(count)?;
    check_word_address(address, last)
}

// ============================================================================
// Response
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterKResponse {
    pub station: u8,
    pub command: u8,
    /// ASCII payload between the header and ETX
    pub body: Vec<u8>,
}

/// Validate a response
///
/// `Ok(None)` until ETX (and the BCC characters) arrived. Every failure is
/// terminal: unknown header, checksum mismatch, NAK.
pub fn parse_response(frame: &[u8], bcc: bool) -> Result<Option<MasterKResponse>> {
    let Some(&head) = frame.first() else {
        return Ok(None);
    };
    if head != ACK && head != NAK {
        return Err(ValidationError::UnknownHeader(head).into());
    }

    let Some(etx) = frame.iter().position(|&b| b == ETX) else {
        return Ok(None);
    };
    let end = if bcc { etx + 3 } else { etx + 1 };
    if frame.len() < end {
        return Ok(None);
    }
    let frame = &frame[..end];

    if bcc {
        verify_bcc(&frame[..end - 2], &frame[end - 2..])?;
    }
    if etx < RESPONSE_HEADER_LEN {
        return Err(LinkError::malformed(format!(
            "response header truncated at {} bytes",
            etx
        )));
    }

    let station = parse_hex(&frame[1..3])? as u8;
    let command = frame[3];
    let body = &frame[RESPONSE_HEADER_LEN..etx];

    if head == NAK {
        if body.len() < 4 {
            return Err(LinkError::malformed("NAK without error code"));
        }
        let code = parse_hex(&body[..4])? as u16;
        return Err(ValidationError::DeviceRejected { code }.into());
    }

    Ok(Some(MasterKResponse {
        station,
        command,
        body: body.to_vec(),
    }))
}

/// Decode read data: block count, then per block a byte count and the bytes
pub fn read_payload(body: &[u8]) -> Result<Vec<u8>> {
    let blocks = parse_hex(field(body, 0, 2)?)? as usize;
    let mut pos = 2;
    let mut data = Vec::new();
    for _ in 0..blocks {
        let bytes = parse_hex(field(body, pos, 2)?)? as usize;
        pos += 2;
        for _ in 0..bytes {
            data.push(parse_hex(field(body, pos, 2)?)? as u8);
            pos += 2;
        }
    }
    Ok(data)
}

fn field(body: &[u8], start: usize, width: usize) -> Result<&[u8]> {
    body.get(start..start + width).ok_or_else(|| {
        LinkError::malformed(format!(
            "read data truncated: need {} chars, have {}",
            start + width,
            body.len()
        ))
    })
}

/// Big-endian word pairs of an SB read
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
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Build a response frame (used by device simulators and tests)
pub fn encode_response(station: u8, command: u8, block_type: &[u8; 2], body: &[u8], bcc: bool) -> Vec<u8> {
    let mut frame = vec![ACK];
    push_hex(&mut frame, u32::from(station), 2);
    frame.push(command);
    frame.extend_from_slice(block_type);
    frame.extend_from_slice(body);
    frame.push(ETX);
    if bcc {
        let sum = sum8(&frame);
        frame.extend_from_slice(&bcc_chars(sum));
    }
    frame
}

/// Read data body for one block of bytes
pub fn encode_read_body(data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + data.len() * 2);
    push_hex(&mut body, 1, 2);
    push_hex(&mut body, data.len() as u32, 2);
    for byte in data {
        push_hex(&mut body, u32::from(*byte), 2);
    }
    body
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn addr(text: &str) -> DeviceAddress {
        text.parse().unwrap()
    }

    #[test]
    fn test_variable_names() {
        assert_eq!(variable_name(addr("D100"), AccessUnit::Word).unwrap(), b"%DW0100");
        assert_eq!(variable_name(addr("M19"), AccessUnit::Bit).unwrap(), b"%MX00013");
        assert_eq!(variable_name(addr("K0"), AccessUnit::Bit).unwrap(), b"%KX00000");
        assert!(matches!(
            variable_name(addr("D10000"), AccessUnit::Word),
            Err(LinkError::Config(_))
        ));
        assert!(matches!(
            variable_name(addr("ZR0"), AccessUnit::Word),
            Err(LinkError::Config(_))
        ));
    }

    #[test]
    fn test_read_words_request() {
        let req = MasterKRequest::ReadWords {
            address: addr("D100"),
            count: 4,
        };
        let frame = req.encode(0x20, false).unwrap();
        let mut expected = vec![ENQ];
        expected.extend_from_slice(b"20RSB07%DW010004");
        expected.push(EOT);
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_bcc_request_lowercase_and_sum() {
        let req = MasterKRequest::WriteBit {
            address: addr("M19"),
            value: true,
        };
        let frame = req.encode(1, true).unwrap();
        assert_eq!(frame[3], b'w');
        let eot = frame.iter().position(|&b| b == EOT).unwrap();
        assert_eq!(&frame[4..eot], b"SS08%MX0001301");
        assert_eq!(frame.len(), eot + 3);
        assert_eq!(bcc_chars(sum8(&frame[..=eot])), [frame[eot + 1], frame[eot + 2]]);
    }

    #[test]
    fn test_block_limits() {
        let too_many = MasterKRequest::ReadWords {
            address: addr("D0"),
            count: 61,
        };
        assert!(matches!(too_many.encode(0, false), Err(LinkError::Config(_))));

        let past_end = MasterKRequest::WriteWords {
            address: addr("D9999"),
            values: vec![1, 2],
        };
        assert!(matches!(past_end.encode(0, false), Err(LinkError::Config(_))));

        let wraps = MasterKRequest::ReadWords {
            address: addr("D4294967295"),
            count: 2,
        };
        assert!(matches!(wraps.encode(0, false), Err(LinkError::Config(_))));
    }

    #[test]
    fn test_parse_read_response() {
        let body = encode_read_body(&[0x12, 0x34, 0x00, 0x05]);
        let frame = encode_response(0x20, b'r', b"SB", &body, true);

        let response = parse_response(&frame, true).unwrap().unwrap();
        assert_eq!(response.station, 0x20);
        assert_eq!(response.command, b'r');
        let data = read_payload(&response.body).unwrap();
        assert_eq!(decode_words(&data, 2).unwrap(), vec![0x1234, 0x0005]);
    }

    #[test]
    fn test_incomplete_until_bcc() {
        let frame = encode_response(1, b'r', b"SS", &encode_read_body(&[1]), true);
        for cut in [0, 3, frame.len() - 3, frame.len() - 1] {
            assert!(parse_response(&frame[..cut], true).unwrap().is_none());
        }
        assert!(parse_response(&frame, true).unwrap().is_some());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut frame = encode_response(1, b'r', b"SB", &encode_read_body(&[0xAB, 0xCD]), true);
        frame[8] = b'7';
        assert!(matches!(
            parse_response(&frame, true),
            Err(LinkError::Validation(ValidationError::Checksum { .. }))
        ));
    }

    #[test]
    fn test_nak_and_unknown_header() {
        let mut frame = vec![NAK];
        frame.extend_from_slice(b"01RSS1132");
        frame.push(ETX);
        assert!(matches!(
            parse_response(&frame, false),
            Err(LinkError::Validation(ValidationError::DeviceRejected { code: 0x1132 }))
        ));

        assert!(matches!(
            parse_response(b"X01", false),
            Err(LinkError::Validation(ValidationError::UnknownHeader(b'X')))
        ));
    }

    #[test]
    fn test_truncated_read_payload() {
        assert!(read_payload(b"0102AB").is_err());
        assert_eq!(read_payload(b"0101AB").unwrap(), vec![0xAB]);
    }
}
