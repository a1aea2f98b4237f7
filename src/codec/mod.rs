//! # CAN Codec Module
//!
//! Value types and wire layouts shared by every endpoint.
//!
//! ## Key Types
//!
//! - [`Frame`] - classic CAN frame with id, flags, payload and optional timestamp
//! - [`CanFilter`] - kernel receive filter (`id`, `mask`)
//! - [`decode_signal`] / [`encode_signal`] - bit-level signal packing
//!
//! ## Example
//!
//! ```ignore
//! use canbridge::codec::Frame;
//!
//! let frame = Frame::new(0x123, &[0x01, 0x02])?;
//! let bytes = frame.to_bytes(); // struct can_frame
//! ```

pub mod filter;
pub mod frame;
pub mod signal;

pub use filter::{CAN_INV_FILTER, CAN_RAW_FILTER_MAX, CanFilter};
pub use frame::*;
pub use signal::{SignalError, decode_signal, encode_signal};

mod tests;
