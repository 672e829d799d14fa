//! Melsec MC protocol (4E binary frames)
//!
//! ```text
//! melsec
//!     ├── device  (device class -> binary device code)
//!     ├── frame   (request encode/decode, response validation)
//!     └── client  (MelsecClient: DeviceClient over TransportManager)
//! ```
//!
//! Responses are correlated by serial. A serial mismatch keeps the request
//! outstanding and waits for another frame; a nonzero end code aborts.

mod client;
mod device;
mod frame;

pub use client::{MelsecClient, MelsecOptions};
pub use device::{device_class, device_code};
pub use frame::{
    decode_bits, decode_words, encode_response, parse_response, MelsecRequest, MelsecResponse,
    Route, CMD_BATCH_READ, CMD_BATCH_WRITE, MAX_BITS, MAX_WORDS, SUB_BIT, SUB_WORD,
};
