//! Error types for DICOM Upper Layer operations
//!
//! This module defines all error types that can occur while framing PDUs,
//! negotiating associations, assembling DIMSE messages and moving bytes
//! across the network.

use thiserror::Error;

/// DICOM Upper Layer error types
///
/// All operations in this library return `Result<T, DulError>`. Errors that
/// break the protocol state of a connection are routed to the abort path of
/// that connection only; see [`DulError::is_fatal`].
#[derive(Error, Debug)]
pub enum DulError {
    /// Malformed PDU or PDU item
    ///
    /// This error occurs when:
    /// - A PDU or item length runs past the end of the buffer
    /// - A fixed-size field (AE title, reserved block) is truncated
    /// - A presentation context carries zero or several abstract syntaxes
    ///
    /// # Example
    /// ```no_run
    /// # use dicompot::error::DulError;
    /// let err = DulError::InvalidPdu("item length exceeds PDU".to_string());
    /// ```
    #[error("Invalid PDU: {0}")]
    InvalidPdu(String),

    /// PDU length field exceeds the accepted maximum
    ///
    /// Checked before the body is read so a hostile peer cannot make the
    /// reader allocate arbitrary amounts of memory.
    #[error("PDU too large: {size} bytes (max: {max})")]
    PduTooLarge {
        /// Length declared in the PDU header
        size: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// Association negotiation failed
    ///
    /// This error occurs when:
    /// - A response references a presentation context that was never proposed
    /// - A response context carries more than one transfer syntax
    /// - The peer requests an unsupported protocol version
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// No presentation context with the given id was negotiated
    #[error("Unknown presentation context id {0}")]
    UnknownContextId(u8),

    /// No presentation context exists for the given abstract syntax
    #[error("No presentation context for abstract syntax {0}")]
    UnknownAbstractSyntax(String),

    /// The presentation context exists but the peer refused it
    #[error("Presentation context {context_id} ({abstract_syntax}) rejected: {reason}")]
    ContextRejected {
        /// Context id as proposed
        context_id: u8,
        /// Abstract syntax UID of the context
        abstract_syntax: String,
        /// Reason stated by the peer
        reason: String,
    },

    /// Malformed DIMSE command set
    ///
    /// # Example
    /// ```no_run
    /// # use dicompot::error::DulError;
    /// let err = DulError::InvalidCommand("missing CommandField".to_string());
    /// ```
    #[error("Invalid DIMSE command: {0}")]
    InvalidCommand(String),

    /// Malformed data set element stream
    #[error("Invalid data set: {0}")]
    InvalidDataSet(String),

    /// Fragment sequence could not be reassembled
    ///
    /// This error occurs when:
    /// - Fragments of one message arrive under different context ids
    /// - A second terminal fragment arrives for the same stream
    /// - Data fragments arrive before the command is complete
    /// - Data fragments follow a command that declares no data set
    #[error("Reassembly failed: {0}")]
    Reassembly(String),

    /// The peer rejected the association
    #[error("Association rejected (result {result}, source {reject_source}, reason {reason})")]
    AssociationRejected {
        /// 1 = permanent, 2 = transient
        result: u8,
        /// Rejecting entity
        reject_source: u8,
        /// Reason code, interpreted relative to `reject_source`
        reason: u8,
    },

    /// The association was aborted
    #[error("Association aborted: {0}")]
    Aborted(String),

    /// Connection is gone or the engine stopped
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Every message id is held by an outstanding exchange
    #[error("No free message id (too many outstanding exchanges)")]
    MessageIdExhausted,

    /// A DIMSE operation completed with a failure status
    #[error("DIMSE operation failed with status {status:#06x}: {comment}")]
    OperationFailed {
        /// Status code from the final response
        status: u16,
        /// Error comment from the final response, if any
        comment: String,
    },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// Timed out waiting for the peer
    #[error("Operation timed out")]
    Timeout,

    /// I/O error from network operations
    ///
    /// Common causes include connection refused, reset by peer and broken
    /// pipe. All of them are fatal for the connection they occur on.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid UTF-8 in a text field
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl DulError {
    /// Whether the error breaks the protocol state of the connection
    ///
    /// Fatal errors abort the association. Non-fatal errors stay local to a
    /// single exchange and are reported to the peer as a DIMSE status.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DulError::UnknownAbstractSyntax(_)
                | DulError::ContextRejected { .. }
                | DulError::InvalidDataSet(_)
                | DulError::OperationFailed { .. }
                | DulError::MessageIdExhausted
                | DulError::Config(_)
        )
    }
}

/// Result type alias for DICOM Upper Layer operations
pub type Result<T> = std::result::Result<T, DulError>;
