// =============================================================================
// Lint Configuration
// =============================================================================

// Safety: no unsafe code anywhere in the supervisor
#![deny(unsafe_code)]
// Correctness: Must handle all fallible operations
#![deny(unused_must_use)]
// Quality: Pedantic but pragmatic
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![warn(unreachable_pub)]
#![allow(missing_debug_implementations)] // Types hold trait objects for external collaborators

// Allowed with documented reasons
#![allow(clippy::missing_errors_doc)] // Error returns self-documenting via type
#![allow(clippy::missing_panics_doc)] // Only static regexes can panic
#![allow(clippy::module_name_repetitions)] // e.g., relay::LogRelay is clearer
#![allow(clippy::doc_markdown)] // Too many false positives in code docs
#![allow(clippy::must_use_candidate)] // Not all returned values need annotation

//! Lifecycle supervision for game-server instances.
//!
//! `warden` starts, stops, restarts and migrates game-server processes on a
//! host that runs several of them on different ports, keeps the worker
//! threads of each instance alive, and relays RCON feedback from the server
//! log into a dedicated output channel.
//!
//! # Components
//!
//! - [`instance::Instance`] - start/stop state machine of one server
//! - [`registry::Registry`] - port-keyed instance map with eviction on collision
//! - [`watchdog::Watchdog`] - per-instance loop restarting dead worker threads
//! - [`relay::LogRelay`] - log discovery, tailing and RCON line classification
//! - [`host::Host`] - assembles all of the above from a [`config::HostConfig`]
//!
//! The RCON wire protocol, the health probe and the game's own configuration
//! files are external collaborators, see [`collab`].
//!
//! # Example
//!
//! ```
//! use warden::relay::{Classification, LineClassifier, RconBlockClassifier};
//!
//! let mut classifier = RconBlockClassifier::default();
//! assert_eq!(classifier.classify("[2024.05.01-18.22.03:114][ 12]LogRcon: << Info"), Classification::Drop);
//! assert_eq!(
//!     classifier.classify("Players: 3/40"),
//!     Classification::Forward("Players: 3/40".to_string())
//! );
//! ```

pub mod collab;
pub mod config;
pub mod constants;
pub mod error;
pub mod host;
pub mod instance;
pub mod logging;
pub mod process;
pub mod registry;
pub mod relay;
pub mod sink;
pub mod watchdog;
pub mod worker;

pub use error::{Error, Result};
pub use host::{Host, HostBuilder};
pub use instance::{Instance, LifecycleState, Status};
pub use registry::Registry;
pub use sink::OutputSink;
