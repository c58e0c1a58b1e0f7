//! Per-file detect → report/clean → validate sequence and the worker pool.
//!
//! Every file is an independent task: workers pull candidate paths off a
//! shared channel, run [`process_file`] with the same immutable
//! [`RunOptions`], and send back a [`FileReport`]. The calling thread drains
//! the reports, so printing and audit logging never run on a worker. Worker
//! threads are scoped: [`ScanRunner::run`] returns only after every one of
//! them has been joined.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{self as channel, Receiver};
use serde::{Serialize, Serializer};

use crate::core::errors::DephageError;
use crate::core::paths::backup_path;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::logger::jsonl::{BlocksRecord, ScanCountsRecord};
use crate::scanner::disinfect::{self, CleanOutcome, StripReport};
use crate::scanner::home::HomeScriptsCheck;
use crate::scanner::signature::{ContentClass, TextClassifier, detect_file};

// ──────────────────── options ────────────────────

/// Read-only settings shared by every task of a run.
#[derive(Clone)]
pub struct RunOptions {
    /// Clean infected files instead of only reporting them.
    pub clean: bool,
    pub classifier: Arc<dyn TextClassifier>,
}

// ──────────────────── reports ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    NotInfected,
    /// Infected, detect-only run.
    Infected,
    /// Text scene rewritten and validated.
    Cleaned,
    /// Binary scene moved to its backup path.
    Quarantined,
    CleanFailed,
    ReadError,
}

impl FileStatus {
    /// Whether the target carried the infection when the run found it.
    #[must_use]
    pub const fn was_infected(self) -> bool {
        matches!(
            self,
            Self::Infected | Self::Cleaned | Self::Quarantined | Self::CleanFailed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    SceneFile,
    HomeScripts,
}

/// Code and message of a failure, flattened for output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub code: &'static str,
    pub message: String,
}

impl From<&DephageError> for ErrorRecord {
    fn from(err: &DephageError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub target: TargetKind,
    #[serde(serialize_with = "lossy_path")]
    pub path: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentClass>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "lossy_opt_path"
    )]
    pub backup: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<StripReport>,
    /// Dropper files found in a scripts folder.
    #[serde(skip_serializing_if = "Vec::is_empty", serialize_with = "lossy_paths")]
    pub droppers: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl FileReport {
    fn new(target: TargetKind, path: &Path, status: FileStatus) -> Self {
        Self {
            target,
            path: path.to_path_buf(),
            status,
            content: None,
            backup: None,
            backup_sha256: None,
            blocks: None,
            droppers: Vec::new(),
            error: None,
        }
    }

    /// Report for a target that could not be read at all.
    #[must_use]
    pub fn unreadable(path: &Path, err: &DephageError) -> Self {
        Self::new(TargetKind::SceneFile, path, FileStatus::ReadError).with_error(err)
    }

    fn with_error(mut self, err: &DephageError) -> Self {
        self.error = Some(err.into());
        self
    }

    fn with_backup(mut self, backup: PathBuf) -> Self {
        self.backup_sha256 = backup_digest(&backup);
        self.backup = Some(backup);
        self
    }
}

fn lossy_path<S: Serializer>(path: &Path, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&path.to_string_lossy())
}

#[allow(clippy::ref_option)]
fn lossy_opt_path<S: Serializer>(path: &Option<PathBuf>, s: S) -> Result<S::Ok, S::Error> {
    match path {
        Some(p) => lossy_path(p, s),
        None => s.serialize_none(),
    }
}

fn lossy_paths<S: Serializer>(paths: &[PathBuf], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(paths.iter().map(|p| p.to_string_lossy()))
}

fn backup_digest(backup: &Path) -> Option<String> {
    match disinfect::file_sha256(backup) {
        Ok(digest) => Some(digest),
        Err(err) => {
            eprintln!("[DPH-SCAN] unable to hash {}: {err}", backup.display());
            None
        }
    }
}

// ──────────────────── per-task sequences ────────────────────

/// Detect one scene file and, in clean mode, disinfect and re-validate it.
///
/// Never panics and never returns early without a report: every failure
/// is local to this file and recorded in the report.
#[must_use]
pub fn process_file(path: &Path, options: &RunOptions) -> FileReport {
    let detection = match detect_file(path, options.classifier.as_ref()) {
        Ok(d) => d,
        Err(err) => return FileReport::unreadable(path, &err),
    };

    if !detection.infected {
        let mut report = FileReport::new(TargetKind::SceneFile, path, FileStatus::NotInfected);
        report.content = Some(detection.content);
        return report;
    }

    let mut report = if options.clean {
        clean_and_validate(path, detection.content, options)
    } else {
        FileReport::new(TargetKind::SceneFile, path, FileStatus::Infected)
    };
    report.content = Some(detection.content);
    report
}

fn clean_and_validate(path: &Path, content: ContentClass, options: &RunOptions) -> FileReport {
    let failed = |err: &DephageError| {
        let report = FileReport::new(TargetKind::SceneFile, path, FileStatus::CleanFailed)
            .with_error(err);
        let backup = backup_path(path);
        // A rename failure left any existing backup untouched and not ours.
        if matches!(err, DephageError::Rename { .. }) || !backup.exists() {
            report
        } else {
            report.with_backup(backup)
        }
    };

    match disinfect::clean(path, content) {
        Err(err) => failed(&err),
        Ok(CleanOutcome::Quarantined { backup }) => {
            FileReport::new(TargetKind::SceneFile, path, FileStatus::Quarantined)
                .with_backup(backup)
        }
        Ok(CleanOutcome::Disinfected { backup, report }) => {
            match detect_file(path, options.classifier.as_ref()) {
                Ok(after) if !after.infected => {
                    let mut out = FileReport::new(TargetKind::SceneFile, path, FileStatus::Cleaned)
                        .with_backup(backup);
                    out.blocks = Some(report);
                    out
                }
                Ok(_) => {
                    disinfect::discard_rewrite(path);
                    let mut out = failed(&DephageError::ValidationFailed {
                        path: path.to_path_buf(),
                    });
                    out.blocks = Some(report);
                    out
                }
                Err(err) => {
                    disinfect::discard_rewrite(path);
                    failed(&err)
                }
            }
        }
    }
}

/// Run the scripts-folder check through the same detect → clean → re-check
/// sequence as a scene file.
#[must_use]
pub fn process_home(check: &HomeScriptsCheck, clean: bool) -> FileReport {
    let dir = check.dir();
    let found = check.detect();
    if found.is_empty() {
        return FileReport::new(TargetKind::HomeScripts, dir, FileStatus::NotInfected);
    }
    if !clean {
        let mut report = FileReport::new(TargetKind::HomeScripts, dir, FileStatus::Infected);
        report.droppers = found;
        return report;
    }

    check.clean();
    let remaining = check.detect();
    let mut report = if remaining.is_empty() {
        FileReport::new(TargetKind::HomeScripts, dir, FileStatus::Cleaned)
    } else {
        FileReport::new(TargetKind::HomeScripts, dir, FileStatus::CleanFailed).with_error(
            &DephageError::ValidationFailed {
                path: dir.to_path_buf(),
            },
        )
    };
    report.droppers = found;
    report
}

// ──────────────────── audit events ────────────────────

/// Audit event for a report; uneventful outcomes produce none.
#[must_use]
pub fn activity_event(report: &FileReport) -> Option<ActivityEvent> {
    let path = report.path.to_string_lossy().into_owned();
    let backup = || {
        report
            .backup
            .as_ref()
            .map(|b| b.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let error = || {
        report
            .error
            .as_ref()
            .map(|e| (e.code.to_string(), e.message.clone()))
            .unwrap_or_default()
    };
    let droppers = || {
        report
            .droppers
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
    };

    let event = match (report.target, report.status) {
        (_, FileStatus::NotInfected) => return None,
        (TargetKind::HomeScripts, FileStatus::Infected) => ActivityEvent::HomeInfected {
            path,
            files: droppers(),
        },
        (TargetKind::HomeScripts, FileStatus::Cleaned) => ActivityEvent::HomeCleaned {
            path,
            files: droppers(),
        },
        (_, FileStatus::Infected) => ActivityEvent::FileInfected {
            path,
            content: report
                .content
                .map_or("unknown", |c| if c.is_text() { "text" } else { "binary" })
                .to_string(),
        },
        (_, FileStatus::Cleaned) => {
            let blocks = report.blocks.unwrap_or_default();
            ActivityEvent::FileCleaned {
                path,
                backup: backup(),
                backup_sha256: report.backup_sha256.clone(),
                blocks: BlocksRecord {
                    vaccine_gene: blocks.vaccine_blocks,
                    breed_gene: blocks.breed_blocks,
                    lines_removed: blocks.lines_removed,
                },
            }
        }
        (_, FileStatus::Quarantined) => ActivityEvent::FileQuarantined {
            path,
            backup: backup(),
            backup_sha256: report.backup_sha256.clone(),
        },
        (_, FileStatus::CleanFailed) => {
            let (code, message) = error();
            ActivityEvent::CleanFailed {
                path,
                code,
                message,
            }
        }
        (_, FileStatus::ReadError) => {
            let (code, message) = error();
            ActivityEvent::ReadFailed {
                path,
                code,
                message,
            }
        }
    };
    Some(event)
}

// ──────────────────── summary ────────────────────

/// Tallies over every report of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Scene files processed; the scripts folder is not counted here.
    pub scanned: usize,
    pub not_infected: usize,
    pub infected: usize,
    pub cleaned: usize,
    pub quarantined: usize,
    pub clean_failed: usize,
    pub read_errors: usize,
    pub duration_ms: u64,
}

impl ScanSummary {
    pub fn record(&mut self, report: &FileReport) {
        if report.target == TargetKind::SceneFile {
            self.scanned += 1;
        }
        if report.status.was_infected() {
            self.infected += 1;
        }
        match report.status {
            FileStatus::NotInfected => self.not_infected += 1,
            FileStatus::Infected => {}
            FileStatus::Cleaned => self.cleaned += 1,
            FileStatus::Quarantined => self.quarantined += 1,
            FileStatus::CleanFailed => self.clean_failed += 1,
            FileStatus::ReadError => self.read_errors += 1,
        }
    }

    #[must_use]
    pub const fn failed(&self) -> usize {
        self.clean_failed + self.read_errors
    }

    #[must_use]
    pub const fn counts(&self) -> ScanCountsRecord {
        ScanCountsRecord {
            scanned: self.scanned,
            infected: self.infected,
            cleaned: self.cleaned + self.quarantined,
            failed: self.failed(),
        }
    }
}

// ──────────────────── worker pool ────────────────────

/// Bounded pool of scan workers.
pub struct ScanRunner {
    parallelism: usize,
    logger: Option<ActivityLoggerHandle>,
}

impl ScanRunner {
    #[must_use]
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
            logger: None,
        }
    }

    /// Send an audit event for every eventful report.
    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Process every candidate until the channel closes.
    ///
    /// `sink` sees each report on the calling thread, in completion order.
    /// Returns once all workers are joined.
    pub fn run<F>(
        &self,
        candidates: &Receiver<PathBuf>,
        options: &RunOptions,
        mut sink: F,
    ) -> ScanSummary
    where
        F: FnMut(&FileReport),
    {
        let started = Instant::now();
        let mut summary = ScanSummary::default();

        thread::scope(|scope| {
            let (report_tx, report_rx) = channel::bounded::<FileReport>(self.parallelism * 4);

            for _ in 0..self.parallelism {
                let candidates = candidates.clone();
                let report_tx = report_tx.clone();
                scope.spawn(move || {
                    for path in &candidates {
                        if report_tx.send(process_file(&path, options)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(report_tx);

            for report in &report_rx {
                summary.record(&report);
                if let Some(logger) = &self.logger
                    && let Some(event) = activity_event(&report)
                {
                    logger.send(event);
                }
                sink(&report);
            }
        });

        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        summary
    }
}

// ──────────────────── tests ────────────────────
