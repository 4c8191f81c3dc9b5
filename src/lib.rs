//! ggateu - userspace GEOM Gate overlay
//!
//! Serves a kernel gate unit from two providers: an optional read-only lower
//! provider with the original contents, and a write-provider that receives
//! every write, obfuscated with an offset-keyed Salsa20 keystream. Blocks that
//! are all zero in the write-provider fall through to the lower provider.

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod gate;
pub mod platform;
pub mod provider;
pub mod session;

pub use config::GateConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::GateConfig;
    pub use crate::engine::{Dispatcher, Overlay};
    pub use crate::error::{Error, Result};
    pub use crate::gate::{GateChannel, GateDevice};
    pub use crate::session::GateSession;
}
