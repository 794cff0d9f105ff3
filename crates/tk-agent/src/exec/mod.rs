//! Interactive exec streaming bridge

mod bridge;
mod inbound;
mod resize;
mod session;
mod stdin;

pub use bridge::ExecBridge;
pub use session::SessionPhase;
pub use stdin::{BatchState, StdinBatcher};
