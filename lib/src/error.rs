use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy of the core. Program-invariant violations are not
/// represented here: an impossible branch is an `unreachable!`, because
/// continuing past one would corrupt the database.
#[derive(Debug, Error)]
pub enum Error {
    #[error("out of memory")]
    OutOfMemory,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("runtime failure: {0}")]
    Runtime(String),

    #[error("use before initialization")]
    UseBeforeInitialization,

    #[error("generic hash: {0}")]
    GenericHash(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt database: {0}")]
    Corrupt(String),
}

impl Error {
    /// Stable process exit code for the headless front-end.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::OutOfMemory => 2,
            Self::InvalidArgument(_) => 3,
            Self::NotImplemented(_) => 4,
            Self::Runtime(_) => 5,
            Self::UseBeforeInitialization => 6,
            Self::GenericHash(_) => 7,
            Self::Io(_) => 8,
            Self::Corrupt(_) => 9,
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let errs = [
            Error::OutOfMemory,
            Error::InvalidArgument(String::new()),
            Error::NotImplemented(""),
            Error::Runtime(String::new()),
            Error::UseBeforeInitialization,
            Error::GenericHash(String::new()),
            Error::Io(io::Error::new(io::ErrorKind::Other, "")),
            Error::Corrupt(String::new()),
        ];
        let mut codes: Vec<u8> = errs.iter().map(Error::exit_code).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
    }
}
