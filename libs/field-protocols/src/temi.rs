//! Temi temperature/humidity controller protocol
//!
//! RSD/WSD access to consecutive data registers. A response that does not
//! echo the request prefix is answered by sending the request again.

mod client;
mod frame;

pub use client::{TemiClient, TemiOptions};
pub use frame::{
    encode_response, parse_response, register, TemiRequest, ECHO_LEN, MAX_REGISTERS,
    MAX_REGISTER_ADDRESS,
};
