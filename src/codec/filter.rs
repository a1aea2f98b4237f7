use super::frame::{CAN_EFF_FLAG, CAN_EFF_MASK, CAN_RTR_FLAG, CAN_SFF_MASK, Frame};
use crate::error::{Error, Result};

/// Inverts the sense of a filter when set in its id.
pub const CAN_INV_FILTER: u32 = 0x2000_0000;
/// Kernel limit on the number of filters per socket.
pub const CAN_RAW_FILTER_MAX: usize = 512;

/// Receive filter, laid out as the kernel `struct can_filter`.
///
/// A frame passes when `frame.raw_id() & mask == id & mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C)]
pub struct CanFilter {
    id: u32,
    mask: u32,
}

impl CanFilter {
    pub const fn new(id: u32, mask: u32) -> Self {
        CanFilter { id, mask }
    }

    /// Single rule matching every frame. This is what a freshly bound socket has.
    pub const fn accept_all() -> Self {
        CanFilter { id: 0, mask: 0 }
    }

    /// Matches exactly one data frame id in the given format.
    pub fn exact(id: u32, extended: bool) -> Self {
        if extended {
            CanFilter {
                id: (id & CAN_EFF_MASK) | CAN_EFF_FLAG,
                mask: CAN_EFF_MASK | CAN_EFF_FLAG | CAN_RTR_FLAG,
            }
        } else {
            CanFilter {
                id: id & CAN_SFF_MASK,
                mask: CAN_SFF_MASK | CAN_EFF_FLAG | CAN_RTR_FLAG,
            }
        }
    }

    /// Same rule with its sense flipped.
    pub fn inverted(self) -> Self {
        CanFilter {
            id: self.id ^ CAN_INV_FILTER,
            mask: self.mask,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn is_inverted(&self) -> bool {
        self.id & CAN_INV_FILTER != 0
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        let id = self.id & !CAN_INV_FILTER;
        let hit = (frame.raw_id() & self.mask) == (id & self.mask);
        hit != self.is_inverted()
    }
}

/// A filter list passes a frame when any of its rules does. An empty list
/// passes nothing.
pub fn any_match(filters: &[CanFilter], frame: &Frame) -> bool {
    filters.iter().any(|f| f.matches(frame))
}

pub fn validate_filters(filters: &[CanFilter]) -> Result<()> {
    if filters.len() > CAN_RAW_FILTER_MAX {
        return Err(Error::InvalidFilter(format!(
            "{} filters exceed the kernel limit of {}",
            filters.len(),
            CAN_RAW_FILTER_MAX
        )));
    }
    Ok(())
}
