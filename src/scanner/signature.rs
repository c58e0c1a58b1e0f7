//! Signature detector: marker containment plus a pluggable text/binary sniff.
//!
//! Detection is raw byte containment of [`MARKER`]; it never decodes the
//! content and never looks at line structure, so a marker embedded in a
//! binary `.mb` scene is found exactly like one in an ASCII `.ma` scene.
//! The [`ContentClass`] produced alongside it only decides whether the
//! disinfector may rewrite the file.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use memchr::memmem;
use serde::{Deserialize, Serialize};

use crate::core::config::{ClassifierConfig, ClassifierKind};
use crate::core::errors::{DephageError, Result};

/// Byte signature whose presence defines "infected".
pub const MARKER: &[u8] = b"vaccine.phage()";

static MARKER_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(MARKER));

/// Longest UTF-8 encoding of one scalar value.
const UTF8_MAX: usize = 4;

/// Heuristic text/binary classification of a file's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    Text,
    Binary,
}

impl ContentClass {
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Self::Text)
    }
}

/// Result of one detection pass over a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub content: ContentClass,
    pub infected: bool,
}

/// Predicate deciding whether raw content is plausibly text.
pub trait TextClassifier: Send + Sync {
    fn is_text(&self, content: &[u8]) -> bool;

    fn classify(&self, content: &[u8]) -> ContentClass {
        if self.is_text(content) {
            ContentClass::Text
        } else {
            ContentClass::Binary
        }
    }
}

/// Encoding sniff over a leading window of the content.
///
/// Text means the window decodes as UTF-8 and holds no control characters
/// besides `\n`, `\r`, `\t` and `\f`. The final `UTF8_MAX - 1` bytes of the
/// window are not judged since a scalar may be cut off there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utf8Sniff {
    pub window_bytes: usize,
}

impl Default for Utf8Sniff {
    fn default() -> Self {
        Self {
            window_bytes: 1024,
        }
    }
}

impl TextClassifier for Utf8Sniff {
    fn is_text(&self, content: &[u8]) -> bool {
        let window = &content[..content.len().min(self.window_bytes.max(UTF8_MAX))];
        let mut offset = 0usize;

        for chunk in window.utf8_chunks() {
            for (i, c) in chunk.valid().char_indices() {
                if offset + i + UTF8_MAX > window.len() {
                    return true;
                }
                if c == char::REPLACEMENT_CHARACTER || is_disallowed_control(c) {
                    return false;
                }
            }
            offset += chunk.valid().len();

            if !chunk.invalid().is_empty() {
                // A broken sequence right at the window edge is a truncated scalar.
                return offset + UTF8_MAX > window.len();
            }
        }

        true
    }
}

fn is_disallowed_control(c: char) -> bool {
    c < ' ' && !matches!(c, '\n' | '\r' | '\t' | '\u{000C}')
}

/// Printable-byte ratio over a leading window.
///
/// Bytes at or above 0x80 count as printable so that non-ASCII scene names
/// do not tip a file into binary. Any NUL byte means binary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintableRatio {
    pub window_bytes: usize,
    pub min_ratio: f64,
}

impl Default for PrintableRatio {
    fn default() -> Self {
        Self {
            window_bytes: 1024,
            min_ratio: 0.95,
        }
    }
}

impl TextClassifier for PrintableRatio {
    #[allow(clippy::cast_precision_loss)]
    fn is_text(&self, content: &[u8]) -> bool {
        let window = &content[..content.len().min(self.window_bytes)];
        if window.is_empty() {
            return true;
        }
        if memchr::memchr(0, window).is_some() {
            return false;
        }
        let printable = window
            .iter()
            .filter(|&&b| matches!(b, 0x20..=0x7e | b'\n' | b'\r' | b'\t' | 0x0c | 0x80..=0xff))
            .count();
        printable as f64 / window.len() as f64 >= self.min_ratio
    }
}

/// Build the configured classifier.
#[must_use]
pub fn classifier_from_config(config: &ClassifierConfig) -> Arc<dyn TextClassifier> {
    match config.kind {
        ClassifierKind::Utf8Sniff => Arc::new(Utf8Sniff {
            window_bytes: config.sniff_window_bytes,
        }),
        ClassifierKind::PrintableRatio => Arc::new(PrintableRatio {
            window_bytes: config.sniff_window_bytes,
            min_ratio: config.min_printable_ratio,
        }),
    }
}

/// Whether the marker occurs anywhere in `content`.
#[must_use]
pub fn contains_marker(content: &[u8]) -> bool {
    MARKER_FINDER.find(content).is_some()
}

/// Classify and check one buffer. Pure function of its inputs.
#[must_use]
pub fn detect(content: &[u8], classifier: &dyn TextClassifier) -> Detection {
    Detection {
        content: classifier.classify(content),
        infected: contains_marker(content),
    }
}

/// Load `path` once and run [`detect`] on its bytes.
///
/// An unreadable file is an error, never a "not infected" result.
pub fn detect_file(path: &Path, classifier: &dyn TextClassifier) -> Result<Detection> {
    let content = fs::read(path).map_err(|source| DephageError::read(path, source))?;
    Ok(detect(&content, classifier))
}
