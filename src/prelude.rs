//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use dephage::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DephageError, Result};

// Scanner
pub use crate::scanner::disinfect::{CleanOutcome, StripReport, clean};
pub use crate::scanner::home::HomeScriptsCheck;
pub use crate::scanner::pipeline::{
    FileReport, FileStatus, RunOptions, ScanRunner, ScanSummary, process_file, process_home,
};
pub use crate::scanner::signature::{
    ContentClass, Detection, PrintableRatio, TextClassifier, Utf8Sniff, detect, detect_file,
};
pub use crate::scanner::walker::{SceneFileWalker, WalkerConfig};

// Logger
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
