//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-playback`). Host applications can
//! depend on `shelfsync-workspace` and enable the documented features without
//! wiring each crate individually.
//!
//! - `desktop-shims` (default): desktop bridge implementations for HTTP,
//!   filesystem and file transfers.
//! - `eager-resolution`: resolve missing book duration/size when a book is
//!   loaded for playback instead of waiting for an explicit request.

#[cfg(feature = "desktop-shims")]
pub use core_service as service;
