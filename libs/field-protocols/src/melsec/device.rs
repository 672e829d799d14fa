//! Melsec device codes
//!
//! Binary device codes of the MC protocol for each device class.

use field_comlink::{DeviceClass, LinkError, Result};

/// Device code carried in the top byte of the head device field
pub fn device_code(class: DeviceClass) -> Result<u8> {
    let code = match class {
        DeviceClass::Input => 0x9C,
        DeviceClass::Output => 0x9D,
        DeviceClass::InternalRelay => 0x90,
        DeviceClass::SpecialRelay => 0x91,
        DeviceClass::LatchRelay => 0x92,
        DeviceClass::LinkRelay => 0xA0,
        DeviceClass::DataRegister => 0xA8,
        DeviceClass::LinkRegister => 0xB4,
        DeviceClass::FileRegister => 0xB0,
        DeviceClass::TimerContact => 0xC1,
        DeviceClass::TimerValue => 0xC2,
        DeviceClass::CounterContact => 0xC4,
        DeviceClass::CounterValue => 0xC5,
        DeviceClass::KeepRelay => {
            return Err(LinkError::config(
                "device class keep_relay is not addressable over MC frames",
            ))
        },
    };
    Ok(code)
}

/// Reverse lookup used when decoding captured requests
pub fn device_class(code: u8) -> Option<DeviceClass> {
    let class = match code {
        0x9C => DeviceClass::Input,
        0x9D => DeviceClass::Output,
        0x90 => DeviceClass::InternalRelay,
        0x91 => DeviceClass::SpecialRelay,
        0x92 => DeviceClass::LatchRelay,
        0xA0 => DeviceClass::LinkRelay,
        0xA8 => DeviceClass::DataRegister,
        0xB4 => DeviceClass::LinkRegister,
        0xAF | 0xB0 => DeviceClass::FileRegister,
        0xC1 => DeviceClass::TimerContact,
        0xC2 => DeviceClass::TimerValue,
        0xC4 => DeviceClass::CounterContact,
        0xC5 => DeviceClass::CounterValue,
        _ => return None,
    };
    Some(class)
}
