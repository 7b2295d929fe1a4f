use std::{fmt, io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by providers, pools and strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to map {size} bytes of {}: {source}", path.display())]
    MappingFailed {
        path: PathBuf,
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("{strategy} strategy cannot be built over {size} bytes: {reason}")]
    StrategyInitFailed {
        strategy: &'static str,
        size: usize,
        reason: String,
    },

    #[error("{kind} at 0x{addr:x}")]
    CallerMisuse { addr: usize, kind: Misuse },

    #[error("pool metadata is inconsistent: {0}")]
    Inconsistent(String),
}

impl Error {
    pub(crate) fn misuse(addr: usize, kind: Misuse) -> Self {
        Self::CallerMisuse { addr, kind }
    }
}

/// Kinds of invalid pointers handed to `free`, detected best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
    /// The block is already free.
    DoubleFree,
    /// The pointer lies outside the pool's mapped range.
    OutOfRange,
    /// The pointer cannot be the start of an allocation.
    Misaligned,
    /// No live block starts at the pointer.
    UnknownBlock,
}

impl fmt::Display for Misuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Misuse::DoubleFree => "double free",
            Misuse::OutOfRange => "free of a pointer outside the pool",
            Misuse::Misaligned => "free of a misaligned pointer",
            Misuse::UnknownBlock => "free of a pointer that was never allocated",
        };

        f.write_str(msg)
    }
}

/// Status reported when `init` succeeds.
pub const STATUS_OK: i32 = 0;

/// Failure of one `init` stage. Every variant maps to a distinct status code
/// through [`InitError::code`].
#[derive(Error, Debug)]
pub enum InitError {
    #[error("invalid memory provider parameters")]
    ProviderParams(#[source] Error),

    #[error("memory provider creation failed")]
    ProviderCreate(#[source] Error),

    #[error("invalid pool parameters")]
    PoolParams(#[source] Error),

    #[error("memory pool creation failed")]
    PoolCreate(#[source] Error),

    #[error("allocator is already initialized")]
    AlreadyInitialized,
}

impl InitError {
    /// Numeric status code for C-style callers.
    ///
    /// | code | stage                 |
    /// |------|-----------------------|
    /// | 1    | provider parameters   |
    /// | 2    | provider creation     |
    /// | 3    | pool parameters       |
    /// | 4    | pool creation         |
    /// | 5    | already initialized   |
    pub fn code(&self) -> i32 {
        match self {
            InitError::ProviderParams(_) => 1,
            InitError::ProviderCreate(_) => 2,
            InitError::PoolParams(_) => 3,
            InitError::PoolCreate(_) => 4,
            InitError::AlreadyInitialized => 5,
        }
    }

    /// The underlying error of the failing stage, if any.
    pub fn cause(&self) -> Option<&Error> {
        match self {
            InitError::ProviderParams(err)
            | InitError::ProviderCreate(err)
            | InitError::PoolParams(err)
            | InitError::PoolCreate(err) => Some(err),
            InitError::AlreadyInitialized => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_codes_are_distinct() {
        let errors = [
            InitError::ProviderParams(Error::InvalidArgument("path".into())),
            InitError::ProviderCreate(Error::InvalidArgument("map".into())),
            InitError::PoolParams(Error::InvalidArgument("kind".into())),
            InitError::PoolCreate(Error::InvalidArgument("pool".into())),
            InitError::AlreadyInitialized,
        ];

        let codes: Vec<i32> = errors.iter().map(InitError::code).collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5]);
        assert!(!codes.contains(&STATUS_OK));
    }

    #[test]
    fn misuse_message_names_address() {
        let err = Error::misuse(0x1000, Misuse::DoubleFree);
        assert_eq!(err.to_string(), "double free at 0x1000");
    }
}
