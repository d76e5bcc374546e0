use std::io;

/// Errors surfaced by the storage engine.
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operating system refused a read, write, sync or rename.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Persistent data failed a checksum or could not be decoded.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The caller asked for something the database cannot do: a missing
    /// database without `create_if_missing`, a comparator mismatch, a bad
    /// option value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A previous WAL or flush failure put the database in a state where
    /// writes are refused.
    #[error("background error: {0}")]
    Background(String),
}

impl Error {
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// Produce an equivalent error for another waiter.
    ///
    /// `io::Error` is not `Clone`, so the kind and message are carried over
    /// into a fresh value. Used to hand one group-commit result to every
    /// writer in the group.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::Corruption(m) => Error::Corruption(m.clone()),
            Error::InvalidArgument(m) => Error::InvalidArgument(m.clone()),
            Error::Background(m) => Error::Background(m.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
