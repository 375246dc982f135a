//! Core provisioning logic — types, settings, parsing, resolution, guards, scheduling.

pub mod config;
pub mod guard;
pub mod parser;
pub mod resolver;
pub mod scheduler;
pub mod types;
