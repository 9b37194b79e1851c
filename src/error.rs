//! The error taxonomy of §7: not raw OS error codes, but the small set of
//! outcomes callers actually need to branch on. [`Error::as_errno`] maps back
//! onto the POSIX-style negative-errno convention at API boundaries that
//! still need one (see `crm_remote_tcp_connect_async`'s `-ENOTCONN`).

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("operation would block")]
    WouldBlock,

    #[error("operation interrupted")]
    Interrupted,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("peer disconnected")]
    Disconnected,

    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("message could not be parsed")]
    Parse,

    #[error("TLS configuration error ({role}/{kind}, priority='{priority}'): {reason}")]
    TlsConfig {
        role: &'static str,
        kind: &'static str,
        priority: String,
        reason: String,
    },

    #[error("TLS handshake error: {0}")]
    Handshake(String),

    #[error("name resolution failed for {0}")]
    NameResolution(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Negative-errno view of this error, for call sites bridging to the
    /// POSIX-style return convention described in §6.
    pub fn as_errno(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => -libc::EINVAL,
            Error::WouldBlock => -libc::EAGAIN,
            Error::Interrupted => -libc::EINTR,
            Error::Timeout(_) => -libc::ETIMEDOUT,
            Error::Disconnected => -libc::ENOTCONN,
            Error::InvalidFrame(_) => -libc::EPROTO,
            Error::Decompression(_) => -libc::EPROTO,
            Error::Parse => -libc::EPROTO,
            Error::TlsConfig { .. } => -libc::EINVAL,
            Error::Handshake(_) => -libc::ECONNABORTED,
            Error::NameResolution(_) => -libc::ENOTCONN,
            Error::Io(e) => e.raw_os_error().map(|c| -c).unwrap_or(-libc::EIO),
        }
    }
}
