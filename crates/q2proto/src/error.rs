// error.rs -- codec error vocabulary shared by every dialect

use thiserror::Error;

/// Errors and status conditions reported by the codec.
///
/// Positive [`code`](Error::code) values are informational: they mark a
/// normal end of input or a condition the caller resolves by flushing and
/// calling again. Negative codes are real failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("no more input")]
    NoMoreInput,
    #[error("not enough packet space")]
    NotEnoughPacketSpace,
    #[error("download complete")]
    DownloadComplete,
    #[error("message is already compressed")]
    AlreadyCompressed,
    #[error("not implemented")]
    NotImplemented,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("bad data")]
    BadData,
    #[error("unsupported command")]
    BadCommand,
    #[error("unsupported game type")]
    GametypeUnsupported,
    #[error("destination buffer too small")]
    BufferTooSmall,
    #[error("no acceptable protocol")]
    NoAcceptableProtocol,
    #[error("expected serverdata")]
    ExpectedServerdata,
    #[error("protocol not supported")]
    ProtocolNotSupported,
    #[error("deflate compression not supported")]
    DeflateNotSupported,
    #[error("not all deflated data was consumed")]
    MoreDataDeflated,
    #[error("inflate failed")]
    InflateFailed,
    #[error("deflate failed")]
    DeflateFailed,
    #[error("raw compressed download data not supported")]
    RawCompressNotSupported,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Numeric code, matching the values used by other q2proto implementations.
    pub fn code(self) -> i32 {
        match self {
            Error::NoMoreInput => 1,
            Error::NotEnoughPacketSpace => 2,
            Error::DownloadComplete => 3,
            Error::AlreadyCompressed => 4,
            Error::NotImplemented => -1,
            Error::InvalidArgument => -2,
            Error::BadData => -3,
            Error::BadCommand => -4,
            Error::GametypeUnsupported => -5,
            Error::BufferTooSmall => -6,
            Error::NoAcceptableProtocol => -100,
            Error::ExpectedServerdata => -200,
            Error::ProtocolNotSupported => -201,
            Error::DeflateNotSupported => -300,
            Error::MoreDataDeflated => -301,
            Error::InflateFailed => -302,
            Error::DeflateFailed => -303,
            Error::RawCompressNotSupported => -304,
        }
    }

    pub fn from_code(code: i32) -> Option<Error> {
        Some(match code {
            1 => Error::NoMoreInput,
            2 => Error::NotEnoughPacketSpace,
            3 => Error::DownloadComplete,
            4 => Error::AlreadyCompressed,
            -1 => Error::NotImplemented,
            -2 => Error::InvalidArgument,
            -3 => Error::BadData,
            -4 => Error::BadCommand,
            -5 => Error::GametypeUnsupported,
            -6 => Error::BufferTooSmall,
            -100 => Error::NoAcceptableProtocol,
            -200 => Error::ExpectedServerdata,
            -201 => Error::ProtocolNotSupported,
            -300 => Error::DeflateNotSupported,
            -301 => Error::MoreDataDeflated,
            -302 => Error::InflateFailed,
            -303 => Error::DeflateFailed,
            -304 => Error::RawCompressNotSupported,
            _ => return None,
        })
    }

    /// True for failures; false for end-of-input and retry conditions.
    pub fn is_fatal(self) -> bool {
        self.code() < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::NoMoreInput.code(), 1);
        assert_eq!(Error::BadData.code(), -3);
        assert_eq!(Error::NoAcceptableProtocol.code(), -100);
        assert_eq!(Error::RawCompressNotSupported.code(), -304);
    }

    #[test]
    fn test_from_code_inverts_code() {
        for code in [1, 2, 3, 4, -1, -2, -3, -4, -5, -6, -100, -200, -201, -300, -301, -302, -303, -304] {
            let err = Error::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
        assert_eq!(Error::from_code(0), None);
        assert_eq!(Error::from_code(-7), None);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!Error::NoMoreInput.is_fatal());
        assert!(!Error::NotEnoughPacketSpace.is_fatal());
        assert!(Error::BadData.is_fatal());
        assert!(Error::InflateFailed.is_fatal());
    }
}
