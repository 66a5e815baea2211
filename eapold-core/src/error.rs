//! Error types for eapold

use thiserror::Error;

/// Result type alias for eapold operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for eapold
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Interface not found on the system
    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),

    /// Interface state or ioctl error
    #[error("interface '{iface}': {reason}")]
    Interface { iface: String, reason: String },

    /// Socket-level error carrying the OS error
    #[error("socket error, interface '{iface}': {source}")]
    Socket {
        iface: String,
        source: std::io::Error,
    },

    /// A send wrote fewer bytes than the frame length
    #[error("sent {sent} bytes (expected {expected}), interface '{iface}'")]
    ShortSend {
        iface: String,
        sent: usize,
        expected: usize,
    },

    /// Packet parsing error
    #[error("packet parsing error: {0}")]
    PacketParsing(String),

    /// Fatal proxy-level error
    #[error("proxy error: {0}")]
    Proxy(String),
}

impl Error {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create an interface error with a custom message
    pub fn interface<S: Into<String>, R: Into<String>>(iface: S, reason: R) -> Self {
        Error::Interface {
            iface: iface.into(),
            reason: reason.into(),
        }
    }

    /// Create a socket error from the calling thread's last OS error
    pub fn socket_errno<S: Into<String>>(iface: S) -> Self {
        Error::Socket {
            iface: iface.into(),
            source: std::io::Error::last_os_error(),
        }
    }

    /// Create a packet parsing error with a custom message
    pub fn parsing<S: Into<String>>(msg: S) -> Self {
        Error::PacketParsing(msg.into())
    }
}
