//! LG Master-K ASCII protocol
//!
//! Single (SS) and block (SB) reads and writes over `%<dev><X|W>` variable
//! names. Every response failure is terminal: there is no correlation id to
//! wait for.

mod client;
mod frame;

pub use client::{MasterKClient, MasterKOptions};
pub use frame::{
    decode_words, device_letter, encode_read_body, encode_response, parse_response, read_payload,
    variable_name, MasterKRequest, MasterKResponse, MAX_BLOCK_WORDS, MAX_WORD_ADDRESS,
};
