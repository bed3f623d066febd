//! Caches shared by every suite in a run
//!
//! Expensive work that does not depend on the suite is done once and reused:
//!
//! | Cache | Key | Lock |
//! |-------|-----|------|
//! | Image | Dockerfile fingerprint | per Dockerfile path |
//! | Dependencies | lockfile fingerprint | single global lock |
//!
//! Both record their keys in global state so later runs can skip the work
//! entirely.

pub mod dependencies;
pub mod image;

pub use dependencies::{Berkshelf, DependencyCache, DependencyResolver};
pub use image::ImageCache;
