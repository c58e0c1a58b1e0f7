#![forbid(unsafe_code)]

//! dephage: detects and cleans the ADSK-SA-2020-0003 Autodesk Maya scene virus.
//!
//! The worm hides two `createNode script` nodes in Maya scenes and drops
//! startup scripts into the user's Maya scripts folder. This crate provides:
//! 1. **Detection**: byte-signature search plus a text/binary classifier
//! 2. **Disinfection**: backup-then-rewrite removal of the injected nodes
//! 3. **Scanning**: a parallel scene-file walker feeding a bounded worker pool
//!
//! # Library usage
//!
//! ```rust,no_run
//! use dephage::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use dephage::core::config::Config;
//! use dephage::scanner::walker::{SceneFileWalker, WalkerConfig};
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod scanner;
