use std::{io, path::PathBuf};

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = ListError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ListError {
    /// A directory could not be created, or a record could not be written or
    /// read back.
    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode entry {position}: {source}")]
    Encode {
        position: usize,
        #[source]
        source: BoxError,
    },
    /// The bytes of a spilled record did not decode, which includes truncated
    /// or otherwise corrupted files.
    #[error("failed to decode entry {position}: {source}")]
    Decode {
        position: usize,
        #[source]
        source: BoxError,
    },
    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

impl ListError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ListError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn encode(position: usize, source: anyhow::Error) -> Self {
        ListError::Encode {
            position,
            source: source.into(),
        }
    }

    pub(crate) fn decode(position: usize, source: anyhow::Error) -> Self {
        ListError::Decode {
            position,
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ListError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

#[test]
fn test_error_messages() {
    let err = ListError::io(
        "spill/3.json",
        io::Error::new(io::ErrorKind::NotFound, "no such file"),
    );
    assert!(err.is_not_found());
    assert_eq!("i/o error at spill/3.json: no such file", err.to_string());

    let err = ListError::decode(7, anyhow::anyhow!("unexpected end of input"));
    assert!(!err.is_not_found());
    assert_eq!(
        "failed to decode entry 7: unexpected end of input",
        err.to_string()
    );

    let err = ListError::IndexOutOfRange { index: 4, len: 4 };
    assert_eq!("index 4 out of range for list of length 4", err.to_string());
}
