//! Error taxonomy reported by the acquisition unit's driver.
//!
//! Every failed driver call yields a [`DeviceError`] carrying the name of the
//! operation and the [`DeviceErrorCode`] the driver reported. The `Display`
//! form of a code is the human-readable translation that shows up in every
//! log line, so operators never have to look up raw numbers.

use std::fmt;
use thiserror::Error;

/// Result type alias for driver calls.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Error codes the driver can report for its last call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorCode {
    /// The call succeeded.
    NoError,
    /// No network socket object could be created.
    NoSocket,
    /// There is no connection with the unit.
    NoConnection,
    /// A session with the unit is already open.
    AlreadyConnected,
    /// The unit address could not be parsed.
    InvalidIpAddress,
    /// The command requires a master connection.
    RequiresMaster,
    /// Another master is already connected.
    MasterAlreadyConnected,
    /// Host name resolution failed.
    HostLookupFailure,
    /// The command handshake with the unit failed.
    HandshakeFailure,
    /// The command is not supported by the negotiated protocol.
    UnsupportedCommand,
    /// Sending the command failed.
    SendFailure,
    /// Receiving the command response failed.
    ReceiveFailure,
    /// The unit reported that the command failed.
    DeviceReportedFailure,
    /// The data page version is unknown.
    UnknownPageVersion,
    /// An extension record in the page has an unknown type.
    UnknownRecordType,
    /// The receive buffer is too small for the extension records.
    BufferTooSmall,
    /// An extension record header version is unknown.
    UnknownHeaderVersion,
    /// An extension record version is unknown.
    UnknownRecordVersion,
    /// Any code outside the documented taxonomy.
    Other(i32),
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "No Error"),
            Self::NoSocket => write!(f, "No Socket"),
            Self::NoConnection => write!(f, "No Connection"),
            Self::AlreadyConnected => write!(f, "Already Connected"),
            Self::InvalidIpAddress => write!(f, "Invalid IpAddr"),
            Self::RequiresMaster => write!(f, "Requires Master"),
            Self::MasterAlreadyConnected => write!(f, "Already Master Connected"),
            Self::HostLookupFailure => write!(f, "GetHostByName Error"),
            Self::HandshakeFailure => write!(f, "Command Handshake Error"),
            Self::UnsupportedCommand => write!(f, "Command Not Supported"),
            Self::SendFailure => write!(f, "Send Failure"),
            Self::ReceiveFailure => write!(f, "Receive Failure"),
            Self::DeviceReportedFailure => write!(f, "TPU Reports Failure"),
            Self::UnknownPageVersion => write!(f, "Unknown Data Page Version"),
            Self::UnknownRecordType => write!(f, "Unknown SDFX Type"),
            Self::BufferTooSmall => write!(f, "SDFX Receive Buffer Too Small"),
            Self::UnknownHeaderVersion => write!(f, "SDFX Header Version Unknown"),
            Self::UnknownRecordVersion => write!(f, "SDFX Record Version Unknown"),
            Self::Other(code) => write!(f, "Unknown Error Code: {}", code),
        }
    }
}

/// A failed driver call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {code}")]
pub struct DeviceError {
    /// Driver operation that failed (e.g. `"page_info"`).
    pub operation: &'static str,
    /// Code the driver reported for the failure.
    pub code: DeviceErrorCode,
}

impl DeviceError {
    /// Create an error for `operation` with the reported `code`.
    pub fn new(operation: &'static str, code: DeviceErrorCode) -> Self {
        Self { operation, code }
    }

    /// The unit occasionally terminates a page's extension region badly.
    /// Such a page can be skipped without tearing down the session.
    pub fn is_skippable(&self) -> bool {
        self.code == DeviceErrorCode::UnknownRecordType
    }

    /// Connect attempts ending with these codes leave a usable session.
    pub fn is_connected_ok(&self) -> bool {
        matches!(
            self.code,
            DeviceErrorCode::NoError | DeviceErrorCode::AlreadyConnected
        )
    }
}
