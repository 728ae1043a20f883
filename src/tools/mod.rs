//! Common utilities used across the crate.

pub mod id_generator;
pub mod system;
pub mod watch;
