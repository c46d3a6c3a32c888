//! Persistent interpreter sessions.
//!
//! Provides:
//! - `Session` - Multiplexes queued commands over one long-running interpreter
//! - `OutputFramer` - Sentinel-delimited framing of chunked output
//! - `CommandQueue` - FIFO with single-in-flight bookkeeping
//! - `SessionManager` - One session per named target

pub mod framer;
pub mod manager;
pub mod queue;
pub mod session;

pub use framer::{FramerError, OutputFramer};
pub use manager::{ManagerError, SessionManager};
pub use queue::{CommandQueue, PendingCommand, ResultSink};
pub use session::{PendingResult, Session, wire_line};
