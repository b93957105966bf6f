//! Error types for constraint map loading.

use std::path::PathBuf;

/// Errors that can occur while loading a constraint mapping.
#[derive(Debug, thiserror::Error)]
pub enum RigError {
    /// Failed to read the constraint map file.
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the constraint map content.
    #[error("constraint map parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
