//! Binary data processing utilities
//!
//! Provides bit packing and ASCII framing helpers shared by the field
//! protocols (Melsec binary frames, Master-K and Temi ASCII frames).
//!
//! # Design Principles
//!
//! - **Protocol-agnostic**: no frame layouts in here, only building blocks
//! - **Zero-copy**: direct byte slice operations where possible

pub mod ascii;
pub mod bit_ops;

pub use ascii::*;
pub use bit_ops::*;
