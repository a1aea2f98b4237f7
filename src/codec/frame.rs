use std::convert::TryInto;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Size of the kernel `struct can_frame`.
pub const CAN_MTU: usize = 16;
/// Maximum payload of a classic CAN frame.
pub const CAN_MAX_DLEN: usize = 8;

/// Extended frame format (29 bit identifier).
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request.
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// Error message frame.
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;

pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
pub const CAN_ERR_MASK: u32 = 0x1FFF_FFFF;

/// Receive time reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp {
    pub seconds: u64,
    pub micros: u32,
}

impl Timestamp {
    pub fn new(seconds: u64, micros: u32) -> Self {
        Timestamp { seconds, micros }
    }

    pub fn now() -> Self {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            seconds: since_epoch.as_secs(),
            micros: since_epoch.subsec_micros(),
        }
    }
}

/// A classic CAN frame.
///
/// Frames are plain values: they are copied from the receiver thread to the
/// owning context and never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame {
    id: u32,
    extended: bool,
    rtr: bool,
    error: bool,
    len: u8,
    data: [u8; CAN_MAX_DLEN],
    timestamp: Option<Timestamp>,
}

impl Frame {
    /// Builds a frame from its boundary representation, validating the id
    /// range and payload length.
    pub fn from_parts(id: u32, extended: bool, rtr: bool, error_frame: bool, data: &[u8]) -> Result<Self> {
        if data.len() > CAN_MAX_DLEN {
            return Err(Error::InvalidFrame(format!(
                "payload of {} bytes exceeds {}",
                data.len(),
                CAN_MAX_DLEN
            )));
        }
        let limit = if extended || error_frame { CAN_EFF_MASK } else { CAN_SFF_MASK };
        if id > limit {
            return Err(Error::InvalidFrame(format!(
                "id 0x{:X} out of range for {} frame",
                id,
                if extended { "extended" } else { "standard" }
            )));
        }

        let mut buf = [0u8; CAN_MAX_DLEN];
        buf[..data.len()].copy_from_slice(data);
        Ok(Frame {
            id,
            extended,
            rtr,
            error: error_frame,
            len: data.len() as u8,
            data: buf,
            timestamp: None,
        })
    }

    /// Standard (11 bit) data frame.
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        Self::from_parts(id, false, false, false, data)
    }

    /// Extended (29 bit) data frame.
    pub fn new_extended(id: u32, data: &[u8]) -> Result<Self> {
        Self::from_parts(id, true, false, false, data)
    }

    /// Remote transmission request asking for `dlc` bytes.
    pub fn remote(id: u32, extended: bool, dlc: u8) -> Result<Self> {
        if dlc as usize > CAN_MAX_DLEN {
            return Err(Error::InvalidFrame(format!("RTR length {} exceeds {}", dlc, CAN_MAX_DLEN)));
        }
        let mut frame = Self::from_parts(id, extended, true, false, &[])?;
        frame.len = dlc;
        Ok(frame)
    }

    /// Error frame with the given error class bits.
    pub fn error(class: u32, data: &[u8]) -> Result<Self> {
        Self::from_parts(class, false, false, true, data)
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn is_rtr(&self) -> bool {
        self.rtr
    }

    pub fn is_error_frame(&self) -> bool {
        self.error
    }

    /// Payload bytes. Empty for remote frames.
    pub fn data(&self) -> &[u8] {
        if self.rtr { &[] } else { &self.data[..self.len as usize] }
    }

    /// Data length code. For remote frames this is the requested length.
    pub fn dlc(&self) -> u8 {
        self.len
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    /// Identifier with the flag bits as the kernel sees them in `can_id`.
    pub fn raw_id(&self) -> u32 {
        let mut raw = self.id;
        if self.extended {
            raw |= CAN_EFF_FLAG;
        }
        if self.rtr {
            raw |= CAN_RTR_FLAG;
        }
        if self.error {
            raw |= CAN_ERR_FLAG;
        }
        raw
    }

    /// Kernel `struct can_frame` layout:
    /// `[can_id:4 native-endian][len:1][pad:1][res0:1][len8_dlc:1][data:8]`
    pub fn to_bytes(&self) -> [u8; CAN_MTU] {
        let mut buffer = [0u8; CAN_MTU];
        buffer[0..4].copy_from_slice(&self.raw_id().to_ne_bytes());
        buffer[4] = self.len;
        if !self.rtr {
            buffer[8..8 + self.len as usize].copy_from_slice(&self.data[..self.len as usize]);
        }
        buffer
    }

    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < CAN_MTU {
            return Err(Error::InvalidFrame(format!(
                "buffer of {} bytes too small for can_frame",
                buffer.len()
            )));
        }

        let can_id = u32::from_ne_bytes(buffer[0..4].try_into().map_err(|_| {
            Error::InvalidFrame("truncated can_id".to_string())
        })?);
        let len = buffer[4] as usize;
        if len > CAN_MAX_DLEN {
            return Err(Error::InvalidFrame(format!("length {} exceeds {}", len, CAN_MAX_DLEN)));
        }

        let extended = can_id & CAN_EFF_FLAG != 0;
        let rtr = can_id & CAN_RTR_FLAG != 0;
        let error = can_id & CAN_ERR_FLAG != 0;
        let id = if extended || error { can_id & CAN_EFF_MASK } else { can_id & CAN_SFF_MASK };

        let mut data = [0u8; CAN_MAX_DLEN];
        if !rtr {
            data[..len].copy_from_slice(&buffer[8..8 + len]);
        }
        Ok(Frame {
            id,
            extended,
            rtr,
            error,
            len: len as u8,
            data,
            timestamp: None,
        })
    }
}

/// `cansend` notation: `123#DEADBEEF`, `1F334455#11`, `123#R`, `123#R4`.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error {
            write!(f, "{:08X}#", self.id | CAN_ERR_FLAG)?;
        } else if self.extended {
            write!(f, "{:08X}#", self.id)?;
        } else {
            write!(f, "{:03X}#", self.id)?;
        }
        if self.rtr {
            write!(f, "R")?;
            if self.len > 0 {
                write!(f, "{}", self.len)?;
            }
            return Ok(());
        }
        for byte in self.data() {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

fn hex_byte(pair: &[u8]) -> Option<u8> {
    let hi = (pair[0] as char).to_digit(16)?;
    let lo = (pair[1] as char).to_digit(16)?;
    Some((hi << 4 | lo) as u8)
}

impl FromStr for Frame {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidFrame(format!("{}: '{}'", why, s));

        let (id_part, data_part) = s.trim().split_once('#').ok_or_else(|| invalid("missing '#'"))?;
        let extended = match id_part.len() {
            3 => false,
            8 => true,
            _ => return Err(invalid("id must have 3 or 8 hex digits")),
        };
        if !id_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid("bad id"));
        }
        let id = u32::from_str_radix(id_part, 16).map_err(|_| invalid("bad id"))?;
        // Error frames carry CAN_ERR_FLAG in their 8 digit id.
        let error_frame = extended && id & CAN_ERR_FLAG != 0;

        if let Some(dlc) = data_part.strip_prefix(['R', 'r']) {
            if error_frame {
                return Err(invalid("error frame cannot be a remote request"));
            }
            let dlc = if dlc.is_empty() {
                0
            } else {
                dlc.parse::<u8>().map_err(|_| invalid("bad RTR length"))?
            };
            return Frame::remote(id, extended, dlc);
        }

        let digits: Vec<u8> = data_part.bytes().filter(|b| *b != b'.').collect();
        if digits.len() % 2 != 0 {
            return Err(invalid("odd number of data digits"));
        }
        let data = digits
            .chunks(2)
            .map(hex_byte)
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| invalid("bad data byte"))?;

        if error_frame {
            return Frame::error(id & CAN_ERR_MASK, &data);
        }
        Frame::from_parts(id, extended, false, false, &data)
    }
}
