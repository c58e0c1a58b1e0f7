#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_dephage") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "dephage.exe" } else { "dephage" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve dephage binary path for integration test"),
    }
}

/// Run the binary with `home` as the user's home directory.
///
/// Output format and config overrides from the caller's environment are
/// cleared so every case starts from defaults.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("dephage-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .env("RUST_BACKTRACE", "1");
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("DEPHAGE_") {
            command.env_remove(&key);
        }
    }
    let output = command.output().expect("execute dephage command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("home={}\n", home.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// ASCII scene carrying both injected script nodes.
pub fn infected_ascii_scene(name: &str) -> String {
    format!(
        "//Maya ASCII 2022 scene\n\
         //Name: {name}.ma\n\
         requires maya \"2022\";\n\
         createNode transform -n \"{name}_grp\";\n\
         createNode script -n \"vaccine_gene\";\n\
         \trename -uid \"7A1F\";\n\
         \taddAttr -ci true -sn \"nts\" -ln \"notes\" -dt \"string\";\n\
         \tsetAttr \".b\" -type \"string\" \"import vaccine\\ncmds.evalDeferred('leukocyte = vaccine.phage()')\";\n\
         \tsetAttr \".stp\" 1;\n\
         \tsetAttr \".nts\" -type \"string\" \"payload\";\n\
         \tsetAttr \".st\" 1;\n\
         \tsetAttr \".a\" -type \"string\" \"\";\n\
         createNode script -n \"breed_gene\";\n\
         \trename -uid \"7A20\";\n\
         \tsetAttr \".b\" -type \"string\" \"python(\\\"exec(...)\\\")\";\n\
         \tsetAttr \".stp\" 1;\n\
         \tsetAttr \".st\" 1;\n\
         select -ne :time1;\n\
         // End of {name}.ma\n"
    )
}

/// What [`infected_ascii_scene`] looks like after disinfection.
pub fn cleaned_ascii_scene(name: &str) -> String {
    format!(
        "//Maya ASCII 2022 scene\n\
         //Name: {name}.ma\n\
         requires maya \"2022\";\n\
         createNode transform -n \"{name}_grp\";\n\
         select -ne :time1;\n\
         // End of {name}.ma\n"
    )
}

/// Binary scene bytes with the marker embedded.
pub fn infected_binary_scene() -> Vec<u8> {
    let mut bytes = b"FOR8\0\0\0\0\0\0\x01\x20MAYA".to_vec();
    bytes.extend_from_slice(&[0, 0, 0, 7, 0xff, 0x10]);
    bytes.extend_from_slice(b"python(\"import vaccine; vaccine.phage()\")");
    bytes.extend_from_slice(&[0u8; 32]);
    bytes
}
