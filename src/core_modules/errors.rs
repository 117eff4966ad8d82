// THEORY:
// Every failure the generator or the TTV codec can hit is terminal for the current
// run, so the error types only need to carry enough context to tell the user what
// to fix: which file, which field, which tag. Nothing is retried.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading parameters and generating the configuration file.
#[derive(Debug, Error)]
pub enum PrecfgError {
    /// The file could not be opened, read or written.
    #[error("failed to access '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The YAML stream is malformed or could not be serialized.
    #[error("invalid YAML in '{path}'")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A document in the stream is a scalar or a sequence instead of a mapping.
    #[error("document {index} is not a key/value mapping")]
    NotAMapping { index: usize },

    /// The YAML stream contained no document to generate from.
    #[error("'{path}' does not contain any YAML document")]
    NoDocuments { path: PathBuf },

    /// A required preprocessing parameter is missing or out of range.
    #[error("Error: missing or invalid {field}: {message}, please check the preprocess file!")]
    InvalidParameter {
        field: &'static str,
        message: &'static str,
    },

    #[error(transparent)]
    Ttv(#[from] TtvError),
}

impl PrecfgError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn yaml(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        Self::Yaml {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by the TTV box codec.
#[derive(Debug, Error)]
pub enum TtvError {
    #[error("tag {0} has already been put into the box")]
    DuplicateTag(u8),

    /// Tags 0 and 255 are reserved for the start and end markers.
    #[error("tag {0} is out of range, it must lie in (0, 255)")]
    TagOutOfRange(i64),

    /// Start and end markers are only valid under their reserved tags.
    #[error("marker value cannot be stored under data tag {0}, use put_start_end_markers")]
    MisplacedMarker(u8),

    #[error("tag {0} is not found")]
    TagNotFound(u8),

    #[error("tag {tag} is found, but it holds {found} instead of {expected}")]
    TypeMismatch {
        tag: u8,
        expected: &'static str,
        found: &'static str,
    },

    #[error("unsupported data type '{0}'")]
    UnsupportedType(String),

    #[error("line {line}: cannot parse '{value}' as {type_name}")]
    InvalidValue {
        line: usize,
        type_name: String,
        value: String,
    },

    /// A text line does not have the `tag type value` shape.
    #[error("line {line}: expected `tag type value`, got '{content}'")]
    MalformedLine { line: usize, content: String },

    #[error("buffer truncated at offset {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("declared length {declared} does not match the {actual} bytes available")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("failed to access '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = PrecfgError> = std::result::Result<T, E>;
