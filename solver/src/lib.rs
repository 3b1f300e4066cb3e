//! Verified task solving: generate code, reconcile its dependencies, run it,
//! and feed failures back to the generator.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (response parsing, requirement
//!   normalization, shared types). No I/O.
//! - **[`io`]**: Side-effecting operations (subprocesses, the dependency
//!   manifest, HTTP generators, config and prompt files).
//!
//! Orchestration modules ([`retry`], [`dispatch`]) coordinate the two for the
//! CLI and the upload server.

pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod retry;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
