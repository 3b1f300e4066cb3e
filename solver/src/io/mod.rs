//! I/O helpers: subprocesses, files and generator backends.

pub mod config;
pub mod executor;
pub mod generator;
pub mod installer;
pub mod manifest;
pub mod process;
pub mod prompt;
pub mod reconcile;
