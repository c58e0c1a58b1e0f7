//! DPH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DephageError>;

/// Top-level error type for dephage.
#[derive(Debug, Error)]
pub enum DephageError {
    #[error("[DPH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DPH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DPH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DPH-2001] unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DPH-2002] unable to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DPH-2003] unable to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DPH-2101] unable to locate virus in {path}: missing {}", .missing.join(", "))]
    StructureNotFound {
        path: PathBuf,
        missing: Vec<&'static str>,
    },

    #[error("[DPH-2102] marker still present after cleaning {path}")]
    ValidationFailed { path: PathBuf },

    #[error("[DPH-2201] unable to check home folder: {details}")]
    HomeDirUnavailable { details: String },

    #[error("[DPH-3001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DPH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DPH-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DephageError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DPH-1001",
            Self::MissingConfig { .. } => "DPH-1002",
            Self::ConfigParse { .. } => "DPH-1003",
            Self::Read { .. } => "DPH-2001",
            Self::Rename { .. } => "DPH-2002",
            Self::Write { .. } => "DPH-2003",
            Self::StructureNotFound { .. } => "DPH-2101",
            Self::ValidationFailed { .. } => "DPH-2102",
            Self::HomeDirUnavailable { .. } => "DPH-2201",
            Self::Serialization { .. } => "DPH-3001",
            Self::Io { .. } => "DPH-3002",
            Self::Runtime { .. } => "DPH-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn read(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn write(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for DephageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DephageError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
