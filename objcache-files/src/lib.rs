use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("The file's magic value does not match the expectation {magic}")]
    InvalidMagicValue { magic: u32 },

    #[error("Unsupported format version {version}, expected {expected}")]
    UnsupportedVersion { version: u32, expected: u32 },

    #[error("The file is violating the expected format, because: {reason}")]
    FormatError { reason: &'static str },

    /// A record claims a payload size that no sane writer produces; the rest of the file is not trusted.
    #[error("Bogus record size {size} for local id {local_id}")]
    BogusRecordSize { local_id: u32, size: u32 },

    /// Represents an empty source, e.g. a zero length cache file.
    #[error("Source contains no data")]
    EmptySource,

    /// Represents all other cases of `std::io::Error`.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

impl ParserError {
    /// True when the error is just the reader running into the end of its input.
    pub fn is_eof(&self) -> bool {
        matches!(self, ParserError::IOError(inner) if inner.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub mod common;
pub mod extras;
pub mod header;
pub mod objects;
pub mod update;
