//! Navo - Chef cookbook test suites in containers
//!
//! Builds or reuses an image, starts a container per suite, converges it
//! with chef-solo, and verifies it with busser. Many suites run in parallel
//! while expensive shared work (image builds, cookbook vendoring) happens
//! once, guarded by keyed locks and content fingerprints recorded in
//! persisted state.

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod orchestration;
pub mod runner;
pub mod state;
pub mod suite;
pub mod sync;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{NavoError, NavoResult};
