use crate::codec::{CanFilter, Frame};
use crate::error::Result;

/// Trait representing one CAN endpoint bound to one interface.
/// Object-safe and pluggable so a channel can run over the kernel socket or an
/// in-memory bus.
///
/// The receiver thread calls [`receive_blocking`](CanEndpoint::receive_blocking)
/// while the owning context calls everything else, so implementations must be
/// safe to use from both at once.
pub trait CanEndpoint: Send + Sync {
    /// Name of the interface this endpoint is bound to.
    fn interface(&self) -> &str;

    /// Replace the receive filters. An empty list disables reception.
    fn set_filters(&self, filters: &[CanFilter]) -> Result<()>;

    /// Transmit exactly one frame without queueing.
    /// A full transmit queue is reported as `Error::WouldBlock`.
    fn send(&self, frame: &Frame) -> Result<()>;

    /// Block until one frame arrives. Returns `Error::Closed` once
    /// [`close`](CanEndpoint::close) has been called, including when the call
    /// was already parked waiting for data.
    fn receive_blocking(&self) -> Result<Frame>;

    /// Idempotent. Unblocks any pending `receive_blocking`.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// Whether received frames carry timestamps.
    fn timestamps_enabled(&self) -> bool {
        false
    }
}
