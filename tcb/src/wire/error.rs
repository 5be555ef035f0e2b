use core::fmt;

/// The error type for parsing segment headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An incoming segment could not be parsed because it was shorter than assumed.
    ///
    /// The buffer may be shorter than the fixed header or than the header length it claims. For
    /// options, the option length may reach beyond the end of the option area.
    Truncated,

    /// An incoming segment was recognized but was self-contradictory.
    ///
    /// Examples: a header length field smaller than the fixed header, a window scale option that
    /// is not exactly three bytes long.
    Malformed,

    /// An incoming segment could not be recognized and was dropped.
    Unrecognized,

    /// Handling depends on a feature that is not implemented.
    Unsupported,
}

/// The result type for header parsing.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated    => write!(f, "truncated segment"),
            Error::Malformed    => write!(f, "malformed segment"),
            Error::Unrecognized => write!(f, "unrecognized segment"),
            Error::Unsupported  => write!(f, "unsupported option"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
