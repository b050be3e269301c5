//! Ensemble player - session orchestration over the core engine
//!
//! Reconciles loaded recordings with persisted per-recording state, exposes
//! the playback control surface, and persists every change asynchronously.
//! The headless binary in `main.rs` is a thin driver over this library.

pub mod session;
pub mod store;

pub use session::{Session, StemControl};
pub use store::{ConfigStore, SessionSnapshot, StoreError, YamlConfigStore};
