pub mod traits;
pub mod raw;
pub mod loopback;

pub use traits::*;
pub use raw::*;
pub use loopback::*;
