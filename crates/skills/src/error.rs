use std::{
    error::Error as StdError,
    fmt,
    path::{Path, PathBuf},
};

/// Sub-classification of [`Error::NetworkFailure`], used for remediation
/// text. Callers branching on the error should match the variant, not this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailureKind {
    NotFound,
    AuthRequired,
    Connectivity,
    Other,
}

impl fmt::Display for NetworkFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not found",
            Self::AuthRequired => "authentication required",
            Self::Connectivity => "network/connection",
            Self::Other => "request failed",
        })
    }
}

/// Flat discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidSource,
    NetworkFailure,
    VersionNotFound,
    SubdirectoryNotFound,
    PathTraversal,
    SkillNotFound,
    HashMismatch,
    NoInstallTargets,
    NotFound,
    NotADirectory,
    UnsupportedArchive,
    Cancelled,
    Io,
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid source: {message}")]
    InvalidSource { message: String },

    #[error("{message}")]
    NetworkFailure {
        kind: NetworkFailureKind,
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    #[error("version '{version}' not found for {locator}")]
    VersionNotFound { locator: String, version: String },

    #[error("subdirectory '{subdirectory}' not found in downloaded content of skill '{skill}'")]
    SubdirectoryNotFound { skill: String, subdirectory: String },

    #[error("archive entry '{}' escapes the extraction directory", entry.display())]
    PathTraversal { entry: PathBuf },

    #[error("skill '{name}' not found in manifest")]
    SkillNotFound { name: String },

    #[error("digest mismatch at {}: expected {expected}, got {actual}", path.display())]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("no install targets configured; add one with `skillpm target add`")]
    NoInstallTargets,

    #[error("path does not exist: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("unsupported archive format at {url}: {reason}")]
    UnsupportedArchive { url: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    /// A batch operation failed on one skill.
    #[error("skill '{name}': {source}")]
    Skill {
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_source(message: impl Into<String>) -> Self {
        Self::InvalidSource {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn network(kind: NetworkFailureKind, message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            kind,
            message: message.into(),
            source: None,
        }
    }

    #[must_use]
    pub fn network_with_source<E>(
        kind: NetworkFailureKind,
        message: impl Into<String>,
        source: E,
    ) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::NetworkFailure {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    #[must_use]
    pub fn version_not_found(locator: impl Into<String>, version: impl Into<String>) -> Self {
        Self::VersionNotFound {
            locator: locator.into(),
            version: version.into(),
        }
    }

    #[must_use]
    pub fn not_found(path: &Path) -> Self {
        Self::NotFound {
            path: path.to_path_buf(),
        }
    }

    #[must_use]
    pub fn for_skill(name: impl Into<String>, source: Error) -> Self {
        Self::Skill {
            name: name.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSource { .. } => ErrorKind::InvalidSource,
            Self::NetworkFailure { .. } => ErrorKind::NetworkFailure,
            Self::VersionNotFound { .. } => ErrorKind::VersionNotFound,
            Self::SubdirectoryNotFound { .. } => ErrorKind::SubdirectoryNotFound,
            Self::PathTraversal { .. } => ErrorKind::PathTraversal,
            Self::SkillNotFound { .. } => ErrorKind::SkillNotFound,
            Self::HashMismatch { .. } => ErrorKind::HashMismatch,
            Self::NoInstallTargets => ErrorKind::NoInstallTargets,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotADirectory { .. } => ErrorKind::NotADirectory,
            Self::UnsupportedArchive { .. } => ErrorKind::UnsupportedArchive,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Skill { source, .. } => source.kind(),
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) | Self::Message { .. } | Self::External { .. } => ErrorKind::Other,
        }
    }

    /// Network sub-classification, if this is a network failure.
    pub fn network_kind(&self) -> Option<NetworkFailureKind> {
        match self {
            Self::NetworkFailure { kind, .. } => Some(*kind),
            Self::Skill { source, .. } => source.network_kind(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
