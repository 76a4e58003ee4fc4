//! Spawning and signalling the supervised server process.
//!
//! ## Module Structure
//!
//! - [`runner`]: The [`ProcessRunner`] seam and its `std::process` implementation
//! - [`control`]: Pid liveness checks and signal delivery
//! - [`format`]: Output formatting and platform quirks

mod control;
mod format;
mod runner;

pub use control::{KillSignal, OsProcessControl, ProcessControl, is_running, send_signal};
pub use format::{OutputFormatter, Platform};
pub use runner::{CommandRunner, ProcessRunner, RunOptions};
