//! The real-time routing engine: channels, feedback protection and the
//! fan-out router.

mod backend;
mod channel;
mod guard;
mod router;

pub use channel::{BlockWriter, Channel};
pub use guard::{LoopDetector, LoopStats, LoopVerdict};
pub use router::{RouterHandle, RouterState, StreamRouter};
