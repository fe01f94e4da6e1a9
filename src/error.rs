//! Core error types and result handling
//!
//! All fallible operations in the crate return [`ModbusResult`]. Frame-level
//! problems (bad CRC, short reads) are usually counted and dropped by the
//! serve loops rather than surfaced; the variants here cover everything that
//! does surface, including remote exception replies.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus exception codes carried by exception replies (function code with
/// the high bit set, followed by one of these).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// The function code is not supported by the server.
    IllegalFunction = 1,
    /// The data address is not available in the server.
    IllegalDataAddress = 2,
    /// A value in the request is outside the allowed range.
    IllegalDataValue = 3,
    /// The server failed while processing the request.
    ServerDeviceFailure = 4,
}

impl ExceptionCode {
    /// Parse an exception code byte. Unknown codes map to `None`.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::IllegalFunction),
            2 => Some(Self::IllegalDataAddress),
            3 => Some(Self::IllegalDataValue),
            4 => Some(Self::ServerDeviceFailure),
            _ => None,
        }
    }

    /// Wire representation.
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Errors produced by the protocol engine.
#[derive(Debug, Error)]
pub enum ModbusError {
    /// Transport-level failure; terminates serve loops.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A received frame failed CRC validation.
    #[error("CRC validation failed")]
    Crc,

    /// Function code unknown or not usable in this position.
    #[error("invalid function code: 0x{code:02X}")]
    InvalidFunction {
        /// The offending function code byte.
        code: u8,
    },

    /// Request or reply contents out of range.
    #[error("invalid data: {message}")]
    InvalidData {
        /// Human-readable description.
        message: String,
    },

    /// Structurally malformed PDU or frame.
    #[error("protocol error: {message}")]
    Protocol {
        /// Human-readable description.
        message: String,
    },

    /// The remote peer answered with an exception reply.
    #[error("server exception {code:?} for function 0x{function:02X}")]
    RemoteException {
        /// Function code of the request (without the exception bit).
        function: u8,
        /// Exception code from the reply.
        code: ExceptionCode,
    },

    /// A handler asked for a specific exception code to be returned.
    #[error("exception: {0:?}")]
    Exception(ExceptionCode),

    /// No matching reply arrived in time.
    #[error("transaction timed out after {0:?}")]
    Timeout(Duration),

    /// Bad constructor or configuration input.
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable description.
        message: String,
    },
}

impl ModbusError {
    /// Create an invalid-data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid-function error.
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Map this error to the exception code a server should reply with.
    ///
    /// A handler-supplied [`ModbusError::Exception`] takes precedence;
    /// validation errors map to their natural codes; anything else becomes
    /// server-device-failure.
    pub fn to_exception_code(&self) -> ExceptionCode {
        match self {
            Self::Exception(code) => *code,
            Self::RemoteException { code, .. } => *code,
            Self::InvalidFunction { .. } => ExceptionCode::IllegalFunction,
            Self::InvalidData { .. } => ExceptionCode::IllegalDataValue,
            _ => ExceptionCode::ServerDeviceFailure,
        }
    }
}
