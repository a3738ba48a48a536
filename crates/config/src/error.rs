use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported config format: .{extension}")]
    UnsupportedFormat { extension: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    fn parse(path: &std::path::Path, source: impl std::fmt::Display) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
            message: source.to_string(),
        }
    }

    pub(crate) fn parse_toml(path: &std::path::Path, source: toml::de::Error) -> Self {
        Self::parse(path, source)
    }

    pub(crate) fn parse_yaml(path: &std::path::Path, source: serde_yaml::Error) -> Self {
        Self::parse(path, source)
    }

    pub(crate) fn parse_json(path: &std::path::Path, source: serde_json::Error) -> Self {
        Self::parse(path, source)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
