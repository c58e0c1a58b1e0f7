//! Parallel directory walker that streams Maya scene files.
//!
//! Directories flow through a bounded work queue shared by all walker
//! threads; an in-flight counter tells idle threads when the tree is
//! exhausted. Scene paths stream out on an unbounded channel so the worker
//! pool can start on the first file while the walk is still running.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;

use crate::core::config::ScannerConfig;
use crate::core::errors::{DephageError, Result};
use crate::core::paths::has_scene_extension;

/// Walker configuration derived from `ScannerConfig`.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub root_paths: Vec<PathBuf>,
    pub max_depth: usize,
    pub follow_symlinks: bool,
    pub parallelism: usize,
    pub excluded_paths: HashSet<PathBuf>,
    /// Lower-case, dot-less.
    pub extensions: Vec<String>,
}

impl WalkerConfig {
    #[must_use]
    pub fn from_scanner(scanner: &ScannerConfig, root_paths: Vec<PathBuf>) -> Self {
        Self {
            root_paths,
            max_depth: scanner.max_depth,
            follow_symlinks: scanner.follow_symlinks,
            parallelism: scanner.parallelism,
            excluded_paths: scanner.excluded_paths.iter().cloned().collect(),
            extensions: scanner.extensions.clone(),
        }
    }
}

/// Item in the internal work queue: (directory_path, depth).
type WorkItem = (PathBuf, usize);

/// Streams every scene file under the configured roots.
///
/// Guarantees:
/// - Honors `follow_symlinks`; symlinks are skipped entirely when off.
/// - Excluded directories are never entered.
/// - Bounded by `max_depth`.
/// - No discovered directory is dropped when the work queue is full; the
///   discovering thread walks it itself.
pub struct SceneFileWalker {
    config: WalkerConfig,
}

impl SceneFileWalker {
    #[must_use]
    pub fn new(config: WalkerConfig) -> Self {
        Self { config }
    }

    /// Collect every scene path. Order is unspecified.
    pub fn walk(&self) -> Result<Vec<PathBuf>> {
        Ok(self.stream()?.into_iter().collect())
    }

    /// Stream scene paths as they are discovered.
    ///
    /// Roots are checked up front: a root that cannot be stat'ed is an error.
    /// A root that is itself a scene file is emitted directly.
    pub fn stream(&self) -> Result<channel::Receiver<PathBuf>> {
        let parallelism = self.config.parallelism.max(1);

        let (work_tx, work_rx) = channel::bounded::<WorkItem>(4096);
        let (result_tx, result_rx) = channel::unbounded::<PathBuf>();
        let in_flight = Arc::new(AtomicUsize::new(0));

        for root in &self.config.root_paths {
            let meta = metadata_for_path(root, self.config.follow_symlinks)
                .map_err(|source| DephageError::read(root, source))?;

            if meta.is_file() {
                if has_scene_extension(root, &self.config.extensions) {
                    let _ = result_tx.send(root.clone());
                }
                continue;
            }
            if !meta.is_dir() || self.config.excluded_paths.contains(root) {
                continue;
            }
            in_flight.fetch_add(1, Ordering::Release);
            if work_tx.try_send((root.clone(), 0)).is_err() {
                in_flight.fetch_sub(1, Ordering::Release);
                eprintln!(
                    "[DPH-WALK] work queue full, skipping root {}",
                    root.display()
                );
            }
        }

        for _ in 0..parallelism {
            let work_rx = work_rx.clone();
            let work_tx = work_tx.clone();
            let result_tx = result_tx.clone();
            let in_flight = Arc::clone(&in_flight);
            let config = self.config.clone();

            thread::spawn(move || {
                walker_thread(&work_rx, &work_tx, &result_tx, &in_flight, &config);
            });
        }

        Ok(result_rx)
    }
}

/// Pull directories off the shared queue until nothing is in flight.
fn walker_thread(
    work_rx: &channel::Receiver<WorkItem>,
    work_tx: &channel::Sender<WorkItem>,
    result_tx: &channel::Sender<PathBuf>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
) {
    let mut local = Vec::new();
    loop {
        match work_rx.recv_timeout(Duration::from_millis(20)) {
            Ok(item) => {
                local.push(item);
                while let Some((dir, depth)) = local.pop() {
                    process_directory(
                        &dir, depth, work_tx, result_tx, in_flight, config, &mut local,
                    );
                }
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Read one directory: emit scene files, hand off subdirectories.
///
/// Subdirectories go to the shared queue when it has room, otherwise onto
/// this thread's `local` stack.
fn process_directory(
    dir_path: &Path,
    depth: usize,
    work_tx: &channel::Sender<WorkItem>,
    result_tx: &channel::Sender<PathBuf>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
    local: &mut Vec<WorkItem>,
) {
    let entries = match fs::read_dir(dir_path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return,
        Err(err) => {
            eprintln!("[DPH-WALK] unable to list {}: {err}", dir_path.display());
            return;
        }
    };

    for entry_result in entries {
        let Ok(entry) = entry_result else {
            continue;
        };
        let Ok(ft) = entry.file_type() else {
            continue;
        };
        if !config.follow_symlinks && ft.is_symlink() {
            continue;
        }

        let child_path = entry.path();
        let (is_dir, is_file) = if ft.is_symlink() {
            match fs::metadata(&child_path) {
                Ok(meta) => (meta.is_dir(), meta.is_file()),
                Err(_) => continue,
            }
        } else {
            (ft.is_dir(), ft.is_file())
        };

        if is_file {
            if has_scene_extension(&child_path, &config.extensions) {
                let _ = result_tx.send(child_path);
            }
            continue;
        }

        if is_dir && depth < config.max_depth && !config.excluded_paths.contains(&child_path) {
            in_flight.fetch_add(1, Ordering::Release);
            if let Err(err) = work_tx.try_send((child_path, depth + 1)) {
                in_flight.fetch_sub(1, Ordering::Release);
                local.push(err.into_inner());
            }
        }
    }
}

fn metadata_for_path(path: &Path, follow_symlinks: bool) -> std::io::Result<fs::Metadata> {
    if follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
}
