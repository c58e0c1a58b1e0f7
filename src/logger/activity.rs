//! Activity logger: a dedicated thread owns the `JsonlWriter`.
//!
//! Scan workers send `ActivityEvent`s over a bounded crossbeam channel.
//! `try_send()` means a worker is never blocked on the audit trail; events
//! that do not fit are counted and the count is written as a warning line.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{DephageError, Result};
use crate::logger::jsonl::{
    BlocksRecord, EventType, JsonlConfig, JsonlWriter, LogEntry, ScanCountsRecord, Severity,
};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    ScanStarted {
        version: String,
        config_hash: String,
        root: String,
        clean: bool,
    },
    FileInfected {
        path: String,
        content: String,
    },
    FileCleaned {
        path: String,
        backup: String,
        backup_sha256: Option<String>,
        blocks: BlocksRecord,
    },
    FileQuarantined {
        path: String,
        backup: String,
        backup_sha256: Option<String>,
    },
    CleanFailed {
        path: String,
        code: String,
        message: String,
    },
    ReadFailed {
        path: String,
        code: String,
        message: String,
    },
    HomeInfected {
        path: String,
        files: Vec<String>,
    },
    HomeCleaned {
        path: String,
        files: Vec<String>,
    },
    ScanCompleted {
        counts: ScanCountsRecord,
        duration_ms: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

/// What travels over the logger channel.
enum LoggerMessage {
    Event(ActivityEvent),
    /// Flush and exit.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply-cloneable handle for sending log events from any thread.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<LoggerMessage>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking.
    ///
    /// If the channel is full the event is dropped and counted.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(LoggerMessage::Event(event)) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events dropped since the logger thread last reported them.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to finish. Join its handle to wait for the flush.
    pub fn shutdown(&self) {
        let _ = self.tx.send(LoggerMessage::Shutdown);
    }
}

// ──────────────────── configuration ────────────────────

pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    #[must_use]
    pub fn new(jsonl_config: JsonlConfig) -> Self {
        Self {
            jsonl_config,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle.
///
/// The thread runs until `handle.shutdown()` is called or every handle is
/// dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<LoggerMessage>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("dephage-logger".to_string())
        .spawn(move || {
            logger_thread_main(&rx, config.jsonl_config, &dropped_clone);
        })
        .map_err(|e| DephageError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(
    rx: &Receiver<LoggerMessage>,
    jsonl_config: JsonlConfig,
    dropped: &AtomicU64,
) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(LoggerMessage::Event(event)) = rx.recv() {
        report_dropped(&mut jsonl, dropped);
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    report_dropped(&mut jsonl, dropped);
    jsonl.fsync();
}

fn report_dropped(jsonl: &mut JsonlWriter, dropped: &AtomicU64) {
    let d = dropped.swap(0, Ordering::Relaxed);
    if d > 0 {
        let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
        warn.details = Some(format!("{d} log events dropped due to back-pressure"));
        jsonl.write_entry(&warn);
    }
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::ScanStarted {
            version,
            config_hash,
            root,
            clean,
        } => {
            let mut e = LogEntry::new(EventType::ScanStart, Severity::Info);
            e.path = Some(root.clone());
            e.details = Some(format!(
                "version={version} config_hash={config_hash} clean={clean}"
            ));
            e
        }
        ActivityEvent::FileInfected { path, content } => {
            let mut e = LogEntry::new(EventType::FileInfected, Severity::Warning);
            e.path = Some(path.clone());
            e.content = Some(content.clone());
            e
        }
        ActivityEvent::FileCleaned {
            path,
            backup,
            backup_sha256,
            blocks,
        } => {
            let mut e = LogEntry::new(EventType::FileCleaned, Severity::Info);
            e.path = Some(path.clone());
            e.content = Some("text".to_string());
            e.backup = Some(backup.clone());
            e.backup_sha256.clone_from(backup_sha256);
            e.blocks = Some(*blocks);
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileQuarantined {
            path,
            backup,
            backup_sha256,
        } => {
            let mut e = LogEntry::new(EventType::FileQuarantined, Severity::Warning);
            e.path = Some(path.clone());
            e.content = Some("binary".to_string());
            e.backup = Some(backup.clone());
            e.backup_sha256.clone_from(backup_sha256);
            e.ok = Some(true);
            e
        }
        ActivityEvent::CleanFailed {
            path,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::CleanFailed, Severity::Critical);
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::ReadFailed {
            path,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::ReadFailed, Severity::Warning);
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::HomeInfected { path, files } => {
            let mut e = LogEntry::new(EventType::HomeInfected, Severity::Warning);
            e.path = Some(path.clone());
            e.details = Some(files.join(","));
            e
        }
        ActivityEvent::HomeCleaned { path, files } => {
            let mut e = LogEntry::new(EventType::HomeCleaned, Severity::Info);
            e.path = Some(path.clone());
            e.details = Some(files.join(","));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ScanCompleted {
            counts,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::ScanComplete, Severity::Info);
            e.counts = Some(*counts);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(counts.failed == 0);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
    }
}

// ──────────────────── tests ────────────────────
