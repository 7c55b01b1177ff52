//! Command implementations.

pub mod cleanup;
pub mod common;
pub mod generate;
pub mod init;
pub mod scan;
pub mod stats;
