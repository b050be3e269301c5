//! Audio device context
//!
//! Owns the real-time output stream and hands the control thread its side
//! of the lock-free plumbing. The engine itself lives inside the stream
//! callback; see `cpal_backend`.

mod cpal_backend;
mod error;

pub use cpal_backend::{start_audio_system, AudioHandle, AudioSystemResult};
pub use error::{AudioError, AudioResult};
