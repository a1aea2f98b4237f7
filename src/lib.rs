pub mod codec;
pub mod database;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod transport;

pub use codec::{CanFilter, Frame, Timestamp};
pub use database::{CanAdapter, DatabaseError, DatabaseService, NetworkDescription};
pub use error::{Error, Result};
pub use runtime::*;
pub use transport::{CanEndpoint, LoopbackEndpoint, RawSocket, VirtualBus};
