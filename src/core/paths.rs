//! Shared path helpers: absolute resolution, backup naming, home lookup.

use std::env;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Suffix appended to an infected file when it is moved aside.
pub const BACKUP_SUFFIX: &str = "INFECTED";

/// Resolve a path to an absolute, normalized path.
///
/// Uses `fs::canonicalize` when the path exists, otherwise joins it onto the
/// CWD and resolves `..`/`.` syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// `scene.ma` -> `scene.ma.INFECTED`, in the same directory.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Whether `path` has one of `extensions` (ASCII case-insensitive, no dot).
#[must_use]
pub fn has_scene_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension().is_some_and(|ext| {
        let ext = ext.to_string_lossy();
        extensions.iter().any(|want| ext.eq_ignore_ascii_case(want))
    })
}

/// The invoking user's home directory.
///
/// `HOME` first, then `USERPROFILE` for Windows shells.
pub fn home_dir() -> Option<PathBuf> {
    home_dir_from(|name| env::var_os(name))
}

fn home_dir_from<F>(mut lookup: F) -> Option<PathBuf>
where
    F: FnMut(&str) -> Option<OsString>,
{
    ["HOME", "USERPROFILE"]
        .into_iter()
        .filter_map(&mut lookup)
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Maya's per-user startup-script directory under `home`.
#[must_use]
pub fn maya_scripts_dir(home: &Path) -> PathBuf {
    home.join("Documents").join("maya").join("scripts")
}
