//! Kiln — declarative single-host provisioning.
//!
//! A recipe declares resources (disk images, installer packages, shell
//! scripts, archives, git checkouts) with dependencies and guards. The
//! scheduler bakes each one at most once, dependencies first.

pub mod cli;
pub mod core;
pub mod error;
pub mod fetch;
pub mod resources;
pub mod transport;

pub use error::{Error, Result};
