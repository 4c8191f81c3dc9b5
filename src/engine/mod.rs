//! Overlay block request engine
//!
//! - `overlay`: which provider answers a request, and the keystream on top
//! - `buffer`: the grow-only scratch buffer
//! - `dispatch`: the live loop against a gate channel
//! - `scan`: the same read path run once over the whole device

mod buffer;
mod dispatch;
mod overlay;
mod scan;

pub use buffer::WorkBuffer;
pub use dispatch::{DispatchStats, Dispatcher, Step};
pub use overlay::{is_zero, Overlay, ReadSource};
pub use scan::scan;
