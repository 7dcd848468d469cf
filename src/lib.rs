//! # Software AXI Bus Router
//!
//! A software emulation of an AXI-style SoC bus fabric: a central router
//! process that coordinates N client processes, each hosting IP blocks at
//! disjoint address ranges, and routes bus read/write transactions between
//! them until every master has terminated.

pub mod cli;
pub mod error;
pub mod registry;
pub mod router;
pub mod session;
pub mod wire;

pub use cli::{Args, RouterConfig};
pub use error::RouterError;
pub use router::Router;
pub use wire::Message;

/// The current version of the router
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
