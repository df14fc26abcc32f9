use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

/// Various error types
#[derive(Debug, Error)]
pub enum DriverError {
    /// The configured compiler driver could not be located.
    #[error("compiler driver \"{0}\" not found for language \"{1}\"")]
    CompilerNotFound(PathBuf, String),
    /// The configured dependency extractor could not be located.
    #[error("dependency extractor \"{0}\" not found for language \"{1}\"")]
    ExtractorNotFound(PathBuf, String),
    /// Spawning a child process failed outright.
    #[error("could not spawn \"{0}\": {1}")]
    Spawn(PathBuf, io::Error),
    /// Writing a switches file failed; almost always a full disk.
    #[error("disk full, could not write \"{0}\"")]
    DiskFull(PathBuf),
    /// Two languages claim the same binding prefix.
    #[error("binding prefix \"{prefix}\" is used by both \"{first}\" and \"{second}\"")]
    DuplicateBindingPrefix { prefix: String, first: String, second: String },
    /// Filesystem IO error
    #[error(transparent)]
    Io(#[from] DriverIoError),
    /// Serialization error
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    /// General purpose message.
    #[error("{0}")]
    Message(String),
}

impl DriverError {
    pub(crate) fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        DriverIoError::new(err, path).into()
    }

    /// General purpose message.
    pub fn msg(msg: impl std::fmt::Display) -> Self {
        DriverError::Message(msg.to_string())
    }
}

macro_rules! _format_err {
    ($($tt:tt)*) => {
        $crate::error::DriverError::msg(format!($($tt)*))
    };
}
#[allow(unused)]
pub(crate) use _format_err as format_err;

macro_rules! _bail {
    ($($tt:tt)*) => { return Err($crate::error::format_err!($($tt)*)) };
}
#[allow(unused)]
pub(crate) use _bail as bail;

#[derive(Debug, Error)]
#[error("\"{}\": {io}", self.path.display())]
pub struct DriverIoError {
    io: io::Error,
    path: PathBuf,
}

impl DriverIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which the error occurred
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying `io::Error`
    pub fn source(&self) -> &io::Error {
        &self.io
    }
}

impl From<DriverIoError> for io::Error {
    fn from(err: DriverIoError) -> Self {
        err.io
    }
}
