//! # Channel Runtime
//!
//! Moves frames from a blocking receive on a background thread to listeners
//! running on the owning single-threaded context.
//!
//! ## Key Types
//!
//! - [`Channel`] - One CAN interface: listeners, start/stop, send, filters
//! - [`Notifier`] - Coalescing cross-thread wake-up for the owning context
//! - [`SystemConfig`] - JSON description of the channels an application opens
//!
//! ## Lifecycle
//!
//! 1. Open: `Channel::open("vcan0", false)` or `Channel::from_config(cfg)`
//! 2. Register listeners: `channel.add_listener(|event| ...)`
//! 3. Start: `channel.start()`, then await `channel.drain()` or pump
//!    `channel.dispatch_pending()`; inside a `LocalSet`, `channel.start_local()`
//!    does both
//! 4. Stop: `channel.stop()` (also on drop)
//!
//! ## Example
//!
//! ```ignore
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let channel = Channel::open("vcan0", false)?;
//!     channel.add_listener(|event| println!("{:?}", event));
//!     channel.start_local()?;
//!     tokio::signal::ctrl_c().await.ok();
//!     channel.stop()
//! }).await?;
//! ```

pub mod channel;
pub mod config;
pub mod notifier;
pub mod receiver;

pub use channel::{Channel, ChannelState, EndOfStream, Event, ListenerId, WeakChannel};
pub use config::{ChannelConfig, FilterConfig, SystemConfig};
pub use notifier::Notifier;
