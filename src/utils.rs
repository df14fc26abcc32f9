//! Utility functions

use crate::error::{DriverError, DriverIoError, Result};
use cfg_if::cfg_if;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::Write,
    path::{Component, Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// The character used to join directory lists handed to compilers through
/// environment variables.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

/// Canonicalize the path, platform-agnostic.
///
/// On windows this will ensure the path only consists of `/` separators.
pub fn canonicalize(path: impl AsRef<Path>) -> std::result::Result<PathBuf, DriverIoError> {
    let path = path.as_ref();
    let res = dunce::canonicalize(path);
    #[cfg(windows)]
    let res = res.map(|p| {
        use path_slash::PathBufExt;
        PathBuf::from(p.to_slash_lossy().as_ref())
    });
    res.map_err(|err| DriverIoError::new(err, path))
}

/// Resolves `.` and `..` components lexically, without touching the
/// filesystem and without resolving symbolic links.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            component => normalized.push(component),
        }
    }
    normalized
}

/// Returns the key under which a path is registered for dependency lookups.
///
/// Lexical normalization only; case is folded on case-insensitive platforms
/// so that dep files using a different drive-letter or directory case still
/// hit the index.
pub fn canonical_key(path: &Path) -> PathBuf {
    let normalized = normalize_path(path);
    cfg_if! {
        if #[cfg(windows)] {
            use path_slash::PathBufExt;
            PathBuf::from(normalized.to_slash_lossy().to_lowercase())
        } else {
            normalized
        }
    }
}

/// Returns the modification time of `path`, or `None` if it cannot be read.
pub fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Renders a file timestamp as the stamp string persisted on the first
/// line of switches files and in unit-manifest dependency records.
/// Switches files compare stamps for equality only; the staleness oracle
/// parses manifest stamps back with [`parse_stamp`] to order them.
pub fn file_stamp(time: SystemTime) -> String {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => format!("{}.{:09}", d.as_secs(), d.subsec_nanos()),
        // pre-epoch timestamps still need a stable representation
        Err(err) => {
            let d = err.duration();
            format!("-{}.{:09}", d.as_secs(), d.subsec_nanos())
        }
    }
}

/// Parses a stamp produced by [`file_stamp`] back into a timestamp.
pub fn parse_stamp(stamp: &str) -> Option<SystemTime> {
    let (negative, rest) = match stamp.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, stamp),
    };
    let (secs, nanos) = rest.split_once('.')?;
    let secs: u64 = secs.parse().ok()?;
    let nanos: u32 = nanos.parse().ok()?;
    if nanos >= 1_000_000_000 {
        return None;
    }
    let offset = Duration::new(secs, nanos);
    if negative {
        UNIX_EPOCH.checked_sub(offset)
    } else {
        UNIX_EPOCH.checked_add(offset)
    }
}

/// Stamp of the file at `path`, or `None` if it is not readable.
pub fn stamp_of(path: &Path) -> Option<String> {
    mtime(path).map(file_stamp)
}

/// Reads the json file and deserialize it into the provided type.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let s = fs::read_to_string(path).map_err(|err| DriverError::io(err, path))?;
    serde_json::from_str(&s).map_err(Into::into)
}

/// Writes serializes the provided value to JSON and writes it to a file.
pub fn write_json_file<T: Serialize>(value: &T, path: &Path, capacity: usize) -> Result<()> {
    let file = fs::File::create(path).map_err(|err| DriverError::io(err, path))?;
    let mut writer = std::io::BufWriter::with_capacity(capacity, file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(|err| DriverError::io(err, path))
}

/// Creates the parent directory of the `file` and all its ancestors
pub fn create_parent_dir_all(file: impl AsRef<Path>) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            DriverError::msg(format!(
                "Failed to create artifact parent folder \"{}\": {}",
                parent.display(),
                err
            ))
        })?;
    }
    Ok(())
}

/// Locates an executable.
///
/// A name carrying a directory component is checked as-is; a bare name is
/// searched on `PATH`. On windows an `.exe` suffix is tried as well.
pub fn locate_executable(exe: &Path) -> Option<PathBuf> {
    if exe.components().count() > 1 {
        return exe.is_file().then(|| exe.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(exe);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let candidate = candidate.with_extension("exe");
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}
