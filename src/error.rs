use std::path::PathBuf;

/// Failures surfaced by module parsing, archive passes, and instrumentation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The module bytes are not a structurally valid class file. Archive passes
    /// isolate this to the single entry.
    #[error("malformed module: {reason}")]
    MalformedModule { reason: String },

    #[error("cannot read archive {}: {reason}", path.display())]
    ArchiveRead { path: PathBuf, reason: String },

    #[error("cannot write archive {}: {reason}", path.display())]
    ArchiveWrite { path: PathBuf, reason: String },

    #[error("shim module {name} is not available")]
    MissingShim { name: String },

    /// Two redirects need different shim methods with one name and descriptor.
    #[error("shim method {owner}.{name}{descriptor} is requested for more than one target")]
    ShimConflict {
        owner: String,
        name: String,
        descriptor: String,
    },

    #[error("invalid rule pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedModule {
            reason: reason.into(),
        }
    }

    pub(crate) fn archive_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ArchiveRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn archive_write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ArchiveWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
