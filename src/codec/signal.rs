//! Bit-level packing of signals inside a frame payload.
//!
//! Little endian signals count payload bits LSB-first within each byte
//! (bit `n` is `data[n / 8] >> (n % 8)`), and signal bit `i` sits at payload bit
//! `bit_offset + i`. Big endian signals read the payload MSB-first
//! (bit `n` is `data[n / 8] >> (7 - n % 8)`) and take `bit_length` bits from
//! `bit_offset`, most significant first. Byte-aligned signals therefore read
//! like plain `u16::from_le_bytes` / `u16::from_be_bytes` at `bit_offset / 8`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("signal length {0} must be between 1 and 64 bits")]
    InvalidLength(u32),
    #[error("signal at bit {bit_offset} with {bit_length} bits exceeds {payload_bits}-bit payload")]
    OutOfRange {
        bit_offset: u32,
        bit_length: u32,
        payload_bits: usize,
    },
}

fn check_bounds(data_len: usize, bit_offset: u32, bit_length: u32) -> Result<(), SignalError> {
    if bit_length == 0 || bit_length > 64 {
        return Err(SignalError::InvalidLength(bit_length));
    }
    let payload_bits = data_len * 8;
    if bit_offset as u64 + bit_length as u64 > payload_bits as u64 {
        return Err(SignalError::OutOfRange {
            bit_offset,
            bit_length,
            payload_bits,
        });
    }
    Ok(())
}

#[inline]
fn locate(bit: u32, little_endian: bool) -> (usize, u32) {
    let shift = if little_endian { bit % 8 } else { 7 - bit % 8 };
    ((bit / 8) as usize, shift)
}

fn mask(bit_length: u32) -> u64 {
    if bit_length >= 64 { u64::MAX } else { (1u64 << bit_length) - 1 }
}

/// Extracts a raw signal value, sign-extended when `signed`.
pub fn decode_signal(
    data: &[u8],
    bit_offset: u32,
    bit_length: u32,
    little_endian: bool,
    signed: bool,
) -> Result<i64, SignalError> {
    check_bounds(data.len(), bit_offset, bit_length)?;

    let mut raw: u64 = 0;
    for i in 0..bit_length {
        if little_endian {
            let (byte, shift) = locate(bit_offset + i, true);
            raw |= (((data[byte] >> shift) & 1) as u64) << i;
        } else {
            let (byte, shift) = locate(bit_offset + i, false);
            raw = (raw << 1) | ((data[byte] >> shift) & 1) as u64;
        }
    }

    if signed && bit_length < 64 && raw & (1u64 << (bit_length - 1)) != 0 {
        raw |= !mask(bit_length);
    }
    Ok(raw as i64)
}

/// Writes `value` truncated to `bit_length` bits. Bits outside the signal are
/// left untouched.
pub fn encode_signal(
    data: &mut [u8],
    bit_offset: u32,
    bit_length: u32,
    little_endian: bool,
    value: i64,
) -> Result<(), SignalError> {
    check_bounds(data.len(), bit_offset, bit_length)?;

    let raw = (value as u64) & mask(bit_length);
    for i in 0..bit_length {
        let bit = if little_endian {
            (raw >> i) & 1
        } else {
            (raw >> (bit_length - 1 - i)) & 1
        };
        let (byte, shift) = locate(bit_offset + i, little_endian);
        if bit == 1 {
            data[byte] |= 1 << shift;
        } else {
            data[byte] &= !(1 << shift);
        }
    }
    Ok(())
}
