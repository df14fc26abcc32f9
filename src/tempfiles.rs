//! Temporary-file bookkeeping for a compile phase.
//!
//! Every auxiliary file the driver generates (response files, mapping files,
//! config files, include-path files) is created through the [`TempRegistry`]
//! so it can be reclaimed when the phase ends. Environment variables set for
//! child compilers are recorded here too and reset on cleanup.

use crate::error::{DriverError, Result};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// Formats supported for compiler argument files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResponseFileFormat {
    /// One argument per line, verbatim.
    #[default]
    OnePerLine,
    /// `INPUT (` header, each argument double-quoted on its own line, `)`
    /// footer.
    Quoted,
}

/// Records temp paths and touched environment variables for end-of-phase
/// reclamation.
#[derive(Debug, Default)]
pub struct TempRegistry {
    files: Vec<PathBuf>,
    env_vars: Vec<String>,
    keep: bool,
}

impl TempRegistry {
    pub fn new(keep_temporary_files: bool) -> Self {
        Self { files: Vec::new(), env_vars: Vec::new(), keep: keep_temporary_files }
    }

    /// Creates a fresh temp file and registers it for reclamation. The file
    /// is closed before the path is returned.
    pub fn create_temp(
        &mut self,
        dir: Option<&Path>,
        prefix: &str,
        suffix: &str,
    ) -> Result<PathBuf> {
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&dir)
            .map_err(|err| DriverError::io(err, &dir))?;
        let (file, path) = file
            .keep()
            .map_err(|err| DriverError::io(err.error, err.file.path().to_path_buf()))?;
        drop(file);
        trace!("created temporary file \"{}\"", path.display());
        self.files.push(path.clone());
        Ok(path)
    }

    /// Registers an externally created path for reclamation.
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        self.files.push(path.into());
    }

    /// Sets an environment variable for subsequently spawned compilers and
    /// records it so cleanup can reset it.
    pub fn set_env(&mut self, var: &str, value: impl AsRef<std::ffi::OsStr>) {
        std::env::set_var(var, value);
        if !self.env_vars.iter().any(|v| v == var) {
            self.env_vars.push(var.to_string());
        }
    }

    pub fn keep_temps(&self) -> bool {
        self.keep
    }

    /// Deletes registered files (unless keep-temps is set) and resets touched
    /// environment variables.
    pub fn cleanup(&mut self) {
        if !self.keep {
            for path in self.files.drain(..) {
                if let Err(err) = fs::remove_file(&path) {
                    trace!("could not remove temporary file \"{}\": {}", path.display(), err);
                }
            }
        } else {
            self.files.clear();
        }
        for var in self.env_vars.drain(..) {
            std::env::set_var(&var, "");
        }
    }
}

impl Drop for TempRegistry {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Writes `args` to a fresh response file in the requested format and
/// registers the file with `registry`.
pub fn write_response_file(
    registry: &mut TempRegistry,
    format: ResponseFileFormat,
    args: &[String],
    dir: Option<&Path>,
) -> Result<PathBuf> {
    let path = registry.create_temp(dir, "response", ".rsp")?;
    let file = fs::File::create(&path).map_err(|err| DriverError::io(err, &path))?;
    let mut out = std::io::BufWriter::new(file);
    let result = match format {
        ResponseFileFormat::OnePerLine => args.iter().try_for_each(|arg| writeln!(out, "{arg}")),
        ResponseFileFormat::Quoted => {
            writeln!(out, "INPUT (")
                .and_then(|()| args.iter().try_for_each(|arg| writeln!(out, "\"{arg}\"")))
                .and_then(|()| writeln!(out, ")"))
        }
    };
    result
        .and_then(|()| out.flush())
        .map_err(|err| DriverError::io(err, &path))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_response_file() {
        let mut registry = TempRegistry::new(false);
        let args = vec!["-c".to_string(), "a b.c".to_string()];
        let path =
            write_response_file(&mut registry, ResponseFileFormat::OnePerLine, &args, None)
                .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "-c\na b.c\n");
        registry.cleanup();
        assert!(!path.exists());
    }

    #[test]
    fn quoted_response_file() {
        let mut registry = TempRegistry::new(false);
        let args = vec!["-O2".to_string(), "main.c".to_string()];
        let path =
            write_response_file(&mut registry, ResponseFileFormat::Quoted, &args, None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "INPUT (\n\"-O2\"\n\"main.c\"\n)\n");
    }

    #[test]
    fn keep_temps_leaves_files_behind() {
        let mut registry = TempRegistry::new(true);
        let path = registry.create_temp(None, "keep", ".tmp").unwrap();
        registry.cleanup();
        assert!(path.exists());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn cleanup_resets_env_vars() {
        let mut registry = TempRegistry::new(false);
        registry.set_env("POLYBUILD_TEST_VAR", "value");
        assert_eq!(std::env::var("POLYBUILD_TEST_VAR").unwrap(), "value");
        registry.cleanup();
        assert_eq!(std::env::var("POLYBUILD_TEST_VAR").unwrap(), "");
    }
}
