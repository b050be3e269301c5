//! Path utilities for ensemble configuration files

use std::path::PathBuf;

/// Get the ensemble config directory
///
/// Returns: `~/.config/ensemble` (platform equivalent via `dirs`)
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("ensemble")
}

/// Get the directory holding per-recording session files
///
/// Returns: `~/.config/ensemble/sessions`
pub fn sessions_dir() -> PathBuf {
    config_dir().join("sessions")
}
