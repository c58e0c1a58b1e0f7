//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{DephageError, Result};
use crate::core::paths::{home_dir, maya_scripts_dir};

/// Full dephage configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub classifier: ClassifierConfig,
    pub home: HomeConfig,
    pub paths: PathsConfig,
}

/// Traversal and worker-pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Scene extensions without the dot, matched case-insensitively.
    pub extensions: Vec<String>,
    pub excluded_paths: Vec<PathBuf>,
    pub max_depth: usize,
    pub parallelism: usize,
    pub follow_symlinks: bool,
}

/// Which text/binary heuristic decides rewrite eligibility.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Utf8Sniff,
    PrintableRatio,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    pub sniff_window_bytes: usize,
    /// Only read by `printable_ratio`.
    pub min_printable_ratio: f64,
}

/// Per-user Maya startup-script check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HomeConfig {
    pub enabled: bool,
    /// Defaults to `$HOME/Documents/maya/scripts` when unset.
    pub scripts_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// JSONL audit trail; disabled when unset.
    pub activity_log: Option<PathBuf>,
    /// Used when the audit trail path cannot be opened or written.
    pub activity_log_fallback: Option<PathBuf>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["ma".to_string(), "mb".to_string()],
            excluded_paths: Vec::new(),
            max_depth: 64,
            parallelism: std::thread::available_parallelism().map_or(2, |n| n.get().min(8)),
            follow_symlinks: false,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Utf8Sniff,
            sniff_window_bytes: 1024,
            min_printable_ratio: 0.95,
        }
    }
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scripts_dir: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home_dir().unwrap_or_else(|| {
            eprintln!("[DPH-CONFIG] WARNING: HOME not set, falling back to /tmp for config path");
            PathBuf::from("/tmp")
        });
        Self {
            config_file: home.join(".config").join("dephage").join("config.toml"),
            activity_log: None,
            activity_log_fallback: None,
        }
    }
}

impl HomeConfig {
    /// Directory to check, honoring the override.
    pub fn resolved_scripts_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.scripts_dir {
            return Ok(dir.clone());
        }
        home_dir()
            .map(|home| maya_scripts_dir(&home))
            .ok_or_else(|| DephageError::HomeDirUnavailable {
                details: "neither HOME nor USERPROFILE is set".to_string(),
            })
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DephageError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(DephageError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // scanner
        if let Some(raw) = lookup("DEPHAGE_SCANNER_EXTENSIONS") {
            self.scanner.extensions = raw.split(',').map(str::to_string).collect();
        }
        set_usize(&mut lookup, "DEPHAGE_SCANNER_MAX_DEPTH", &mut self.scanner.max_depth)?;
        set_usize(
            &mut lookup,
            "DEPHAGE_SCANNER_PARALLELISM",
            &mut self.scanner.parallelism,
        )?;
        set_bool(
            &mut lookup,
            "DEPHAGE_SCANNER_FOLLOW_SYMLINKS",
            &mut self.scanner.follow_symlinks,
        )?;

        // classifier
        if let Some(raw) = lookup("DEPHAGE_CLASSIFIER_KIND") {
            self.classifier.kind = match raw.trim() {
                "utf8_sniff" => ClassifierKind::Utf8Sniff,
                "printable_ratio" => ClassifierKind::PrintableRatio,
                other => {
                    return Err(DephageError::ConfigParse {
                        context: "env",
                        details: format!(
                            "DEPHAGE_CLASSIFIER_KIND={other:?}: expected utf8_sniff or printable_ratio"
                        ),
                    });
                }
            };
        }
        set_usize(
            &mut lookup,
            "DEPHAGE_CLASSIFIER_SNIFF_WINDOW_BYTES",
            &mut self.classifier.sniff_window_bytes,
        )?;
        if let Some(raw) = lookup("DEPHAGE_CLASSIFIER_MIN_PRINTABLE_RATIO") {
            self.classifier.min_printable_ratio =
                parse_env("DEPHAGE_CLASSIFIER_MIN_PRINTABLE_RATIO", &raw)?;
        }

        // home
        set_bool(&mut lookup, "DEPHAGE_HOME_ENABLED", &mut self.home.enabled)?;
        if let Some(raw) = lookup("DEPHAGE_HOME_SCRIPTS_DIR") {
            self.home.scripts_dir = Some(PathBuf::from(raw));
        }

        // paths
        if let Some(raw) = lookup("DEPHAGE_ACTIVITY_LOG") {
            self.paths.activity_log = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("DEPHAGE_ACTIVITY_LOG_FALLBACK") {
            self.paths.activity_log_fallback = Some(PathBuf::from(raw));
        }

        Ok(())
    }

    /// Lower-case and dedupe extensions (first spelling wins), drop leading
    /// dots and trailing slashes.
    fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.scanner.extensions = self
            .scanner
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && seen.insert(ext.clone()))
            .collect();

        for path in &mut self.scanner.excluded_paths {
            let s = path.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                *path = PathBuf::from(stripped);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.scanner.extensions.is_empty() {
            return Err(DephageError::InvalidConfig {
                details: "scanner.extensions must name at least one extension".to_string(),
            });
        }
        if self.scanner.parallelism == 0 {
            return Err(DephageError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }
        if self.scanner.max_depth == 0 {
            return Err(DephageError::InvalidConfig {
                details: "scanner.max_depth must be >= 1".to_string(),
            });
        }
        if self.classifier.sniff_window_bytes < 4 {
            return Err(DephageError::InvalidConfig {
                details: format!(
                    "classifier.sniff_window_bytes must be >= 4, got {}",
                    self.classifier.sniff_window_bytes
                ),
            });
        }
        let ratio = self.classifier.min_printable_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(DephageError::InvalidConfig {
                details: format!("classifier.min_printable_ratio must be in [0,1], got {ratio}"),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_usize<F>(lookup: &mut F, name: &str, slot: &mut usize) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn set_bool<F>(lookup: &mut F, name: &str, slot: &mut bool) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| DephageError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
