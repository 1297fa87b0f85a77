//! Single instance coordination with argument forwarding.
//!
//! The first process to claim the application's named signal becomes the
//! primary instance and watches the signal. Every later launch signals it,
//! publishes its command line over a one-shot local handshake and exits,
//! leaving the primary to either raise its window or handle the arguments.

mod bridge;
mod config;
mod dbus;
mod error;
mod forwarder;
mod identity;
mod launch;
mod payload;
mod registry;
mod signal;
mod transport;
mod watcher;
pub use bridge::*;
pub use config::*;
pub use dbus::*;
pub use error::*;
pub use forwarder::*;
pub use identity::*;
pub use launch::*;
pub use payload::*;
pub use registry::*;
pub use signal::*;
pub use transport::*;
pub use watcher::*;
