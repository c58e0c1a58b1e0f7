//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use dephage::core::config::Config;
use dephage::core::errors::DephageError;
use dephage::core::paths::resolve_absolute_path;
use dephage::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use dephage::logger::jsonl::JsonlConfig;
use dephage::scanner::home::HomeScriptsCheck;
use dephage::scanner::pipeline::{
    FileReport, FileStatus, RunOptions, ScanRunner, ScanSummary, TargetKind, activity_event,
    process_home,
};
use dephage::scanner::signature::{ContentClass, classifier_from_config};
use dephage::scanner::walker::{SceneFileWalker, WalkerConfig};

/// Detects and optionally cleans the ADSK-SA-2020-0003 Autodesk Maya virus.
///
/// Infected text scenes are cleaned and the original kept as `<file>.INFECTED`.
/// Infected binary scenes are only renamed to `<file>.INFECTED`.
#[derive(Debug, Parser)]
#[command(
    name = "dephage",
    author,
    version,
    about = "Detects and optionally cleans the ADSK-SA-2020-0003 Autodesk Maya virus",
    after_help = "Examples:\n  dephage documents/maya/file.ma\n  dephage documents/maya\n  dephage -c documents/maya",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Scene file or folder to scan (folders are scanned recursively).
    #[arg(value_name = "PATH", required_unless_present = "completions")]
    path: Option<PathBuf>,
    /// Detect and clean (default is detect only).
    #[arg(short, long)]
    clean: bool,
    /// Override config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long)]
    json: bool,
    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
    /// Skip the Maya user scripts folder check.
    #[arg(long)]
    skip_home: bool,
    /// Append audit events to this JSONL file.
    #[arg(long, value_name = "PATH")]
    activity_log: Option<PathBuf>,
    /// Print shell completions and exit.
    #[arg(long, value_name = "SHELL", exclusive = true)]
    completions: Option<CompletionShell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad arguments, config, or scan root.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

/// Run one scan. Per-file outcomes never fail the run.
#[allow(clippy::too_many_lines)]
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color || !io::stdout().is_terminal() {
        control::set_override(false);
    }

    if let Some(shell) = cli.completions {
        let mut command = Cli::command();
        let binary_name = command.get_name().to_string();
        generate(shell, &mut command, binary_name, &mut io::stdout());
        return Ok(());
    }

    let Some(path_arg) = cli.path.as_deref() else {
        return Err(CliError::User("missing <PATH> argument".to_string()));
    };

    let config = Config::load(cli.config.as_deref()).map_err(|e| CliError::User(e.to_string()))?;
    let mode = output_mode(cli);

    if let Err(source) = std::fs::metadata(path_arg) {
        let err = DephageError::read(path_arg, source);
        emit_report(mode, &FileReport::unreadable(path_arg, &err))?;
        return Err(CliError::User(err.to_string()));
    }
    let root = resolve_absolute_path(path_arg);

    let logger = start_logger(cli, &config)?;
    if let Some((handle, _)) = &logger {
        handle.send(ActivityEvent::ScanStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: config.stable_hash().unwrap_or_default(),
            root: root.to_string_lossy().into_owned(),
            clean: cli.clean,
        });
    }
    let handle = logger.as_ref().map(|(h, _)| h.clone());

    let home = if cli.skip_home || !config.home.enabled {
        None
    } else {
        match config.home.resolved_scripts_dir() {
            Ok(dir) => Some(HomeScriptsCheck::new(dir)),
            Err(err) => {
                eprintln!("[DPH-HOME] {err}");
                if mode == OutputMode::Human {
                    println!("Unable to check home folder");
                }
                if let Some(h) = &handle {
                    h.send(ActivityEvent::Error {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
                None
            }
        }
    };

    if mode == OutputMode::Human {
        println!("Processing:             {}", root.display());
        if let Some(check) = &home {
            println!("Processing maya folder: {}", check.dir().display());
        }
        println!();
    }

    let mut home_report = None;
    if let Some(check) = &home {
        let report = process_home(check, cli.clean);
        if let (Some(h), Some(event)) = (&handle, activity_event(&report)) {
            h.send(event);
        }
        emit_report(mode, &report)?;
        home_report = Some(report);
    }

    let walker = SceneFileWalker::new(WalkerConfig::from_scanner(
        &config.scanner,
        vec![root.clone()],
    ));
    let candidates = walker
        .stream()
        .map_err(|e| CliError::User(e.to_string()))?;

    let options = RunOptions {
        clean: cli.clean,
        classifier: classifier_from_config(&config.classifier),
    };
    let mut runner = ScanRunner::new(config.scanner.parallelism);
    if let Some(h) = &handle {
        runner = runner.with_logger(h.clone());
    }

    let mut output_error = None;
    let mut summary = runner.run(&candidates, &options, |report| {
        if output_error.is_none()
            && let Err(err) = emit_report(mode, report)
        {
            output_error = Some(err);
        }
    });
    if let Some(report) = &home_report {
        summary.record(report);
    }

    if let Some((handle, join)) = logger {
        handle.send(ActivityEvent::ScanCompleted {
            counts: summary.counts(),
            duration_ms: summary.duration_ms,
        });
        handle.shutdown();
        drop(handle);
        if join.join().is_err() {
            eprintln!("[DPH-LOG] logger thread panicked; activity log may be incomplete");
        }
    }

    if let Some(err) = output_error {
        return Err(err);
    }
    emit_summary(mode, &summary)
}

fn start_logger(
    cli: &Cli,
    config: &Config,
) -> Result<Option<(ActivityLoggerHandle, std::thread::JoinHandle<()>)>, CliError> {
    let Some(path) = cli
        .activity_log
        .clone()
        .or_else(|| config.paths.activity_log.clone())
    else {
        return Ok(None);
    };
    let mut jsonl = JsonlConfig::new(path);
    jsonl
        .fallback_path
        .clone_from(&config.paths.activity_log_fallback);
    let logger = spawn_logger(ActivityLoggerConfig::new(jsonl))
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    Ok(Some(logger))
}

// ──────────────────── rendering ────────────────────

fn emit_report(mode: OutputMode, report: &FileReport) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            let mut stdout = io::stdout().lock();
            for line in human_lines(report) {
                writeln!(stdout, "{}", paint(report.status, &line))?;
            }
            Ok(())
        }
        OutputMode::Json => write_json_line(&serde_json::to_value(report)?),
    }
}

#[allow(clippy::cast_precision_loss)]
fn emit_summary(mode: OutputMode, summary: &ScanSummary) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            println!();
            println!(
                "Scanned {} files in {:.1}s: {} infected, {} cleaned, {} quarantined, {} failed",
                summary.scanned,
                summary.duration_ms as f64 / 1000.0,
                summary.infected,
                summary.cleaned,
                summary.quarantined,
                summary.failed(),
            );
            Ok(())
        }
        OutputMode::Json => write_json_line(&json!({ "summary": summary })),
    }
}

/// Status lines for one report, uncolored.
fn human_lines(report: &FileReport) -> Vec<String> {
    let path = report.path.display();
    let quoted = format!("{:?}", report.path);
    let error = report
        .error
        .as_ref()
        .map_or_else(String::new, |e| e.message.clone());

    if report.target == TargetKind::HomeScripts {
        return match report.status {
            FileStatus::NotInfected | FileStatus::ReadError => Vec::new(),
            FileStatus::Infected => vec!["INFECTED: home folder".to_string()],
            FileStatus::Cleaned | FileStatus::Quarantined => {
                vec!["INFECTED and CLEANING: home folder".to_string()]
            }
            FileStatus::CleanFailed => vec![
                "INFECTED and CLEANING: home folder".to_string(),
                "INFECTED unable to clean: home folder".to_string(),
            ],
        };
    }

    let announce = match report.content {
        Some(ContentClass::Binary) => format!("INFECTED and RENAMING: {path}"),
        _ => format!("INFECTED and CLEANING: {path}"),
    };
    match report.status {
        FileStatus::NotInfected => Vec::new(),
        FileStatus::Infected => vec![format!("INFECTED: {path}")],
        FileStatus::Cleaned | FileStatus::Quarantined => vec![announce],
        FileStatus::CleanFailed => {
            let failure = if report.error.as_ref().is_some_and(|e| e.code == "DPH-2102") {
                format!("Validation failed: INFECTED unable to clean {quoted}")
            } else {
                format!("INFECTED unable to clean {quoted}: {error}")
            };
            vec![announce, failure]
        }
        FileStatus::ReadError => vec![format!("ERROR unable to read: {path}")],
    }
}

fn paint(status: FileStatus, line: &str) -> String {
    match status {
        FileStatus::Infected | FileStatus::CleanFailed => line.red().bold().to_string(),
        FileStatus::Cleaned | FileStatus::Quarantined => line.green().to_string(),
        FileStatus::ReadError => line.yellow().to_string(),
        FileStatus::NotInfected => line.to_string(),
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DEPHAGE_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

/// `--json` wins, then `DEPHAGE_OUTPUT_FORMAT`; status lines are the default.
fn resolve_output_mode(
    json_flag: bool,
    env_mode: Option<&str>,
    stdout_is_tty: bool,
) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("auto") if !stdout_is_tty => OutputMode::Json,
        _ => OutputMode::Human,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dephage::scanner::disinfect::StripReport;

    fn report(target: TargetKind, status: FileStatus) -> FileReport {
        FileReport {
            target,
            path: PathBuf::from("/proj/shot.ma"),
            status,
            content: Some(ContentClass::Text),
            backup: None,
            backup_sha256: None,
            blocks: None,
            droppers: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn parses_supported_invocations() {
        let cases = [
            vec!["dephage", "/proj"],
            vec!["dephage", "-c", "/proj"],
            vec!["dephage", "--clean", "--json", "/proj/shot.ma"],
            vec!["dephage", "--skip-home", "--no-color", "/proj"],
            vec!["dephage", "--config", "/etc/dephage.toml", "/proj"],
            vec!["dephage", "--activity-log", "/tmp/a.jsonl", "/proj"],
            vec!["dephage", "--completions", "bash"],
        ];
        for case in cases {
            assert!(Cli::try_parse_from(case.clone()).is_ok(), "failed to parse {case:?}");
        }
    }

    #[test]
    fn rejects_missing_path_and_mixed_completions() {
        assert!(Cli::try_parse_from(["dephage"]).is_err());
        assert!(Cli::try_parse_from(["dephage", "--clean"]).is_err());
        assert!(Cli::try_parse_from(["dephage", "--completions", "zsh", "/proj"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            assert!(Cli::try_parse_from(["dephage", "--completions", shell]).is_ok());
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("auto"), false), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("xml"), false), OutputMode::Human);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(CliError::User(String::new()).exit_code(), 1);
        assert_eq!(CliError::Runtime(String::new()).exit_code(), 2);
    }

    #[test]
    fn scene_status_lines() {
        assert!(human_lines(&report(TargetKind::SceneFile, FileStatus::NotInfected)).is_empty());
        assert_eq!(
            human_lines(&report(TargetKind::SceneFile, FileStatus::Infected)),
            vec!["INFECTED: /proj/shot.ma"]
        );

        let mut cleaned = report(TargetKind::SceneFile, FileStatus::Cleaned);
        cleaned.blocks = Some(StripReport::default());
        assert_eq!(human_lines(&cleaned), vec!["INFECTED and CLEANING: /proj/shot.ma"]);

        let mut renamed = report(TargetKind::SceneFile, FileStatus::Quarantined);
        renamed.content = Some(ContentClass::Binary);
        assert_eq!(human_lines(&renamed), vec!["INFECTED and RENAMING: /proj/shot.ma"]);

        assert_eq!(
            human_lines(&report(TargetKind::SceneFile, FileStatus::ReadError)),
            vec!["ERROR unable to read: /proj/shot.ma"]
        );
    }

    #[test]
    fn unreadable_root_line_and_record() {
        let err = DephageError::read(
            "/proj/missing",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        let unreadable = FileReport::unreadable(std::path::Path::new("/proj/missing"), &err);
        assert_eq!(
            human_lines(&unreadable),
            vec!["ERROR unable to read: /proj/missing"]
        );

        let json = serde_json::to_value(&unreadable).unwrap();
        assert_eq!(json["status"], "read_error");
        assert_eq!(json["path"], "/proj/missing");
        assert_eq!(json["error"]["code"], "DPH-2001");
    }

    #[test]
    fn clean_failure_lines() {
        let mut failed = report(TargetKind::SceneFile, FileStatus::CleanFailed);
        failed.error = Some(dephage::scanner::pipeline::ErrorRecord {
            code: "DPH-2101",
            message: "[DPH-2101] unable to locate virus".to_string(),
        });
        assert_eq!(
            human_lines(&failed),
            vec![
                "INFECTED and CLEANING: /proj/shot.ma".to_string(),
                "INFECTED unable to clean \"/proj/shot.ma\": [DPH-2101] unable to locate virus"
                    .to_string(),
            ]
        );

        failed.error = Some(dephage::scanner::pipeline::ErrorRecord {
            code: "DPH-2102",
            message: String::new(),
        });
        assert_eq!(
            human_lines(&failed)[1],
            "Validation failed: INFECTED unable to clean \"/proj/shot.ma\""
        );
    }

    #[test]
    fn home_folder_lines() {
        assert_eq!(
            human_lines(&report(TargetKind::HomeScripts, FileStatus::Infected)),
            vec!["INFECTED: home folder"]
        );
        assert_eq!(
            human_lines(&report(TargetKind::HomeScripts, FileStatus::CleanFailed)),
            vec![
                "INFECTED and CLEANING: home folder",
                "INFECTED unable to clean: home folder"
            ]
        );
    }
}
