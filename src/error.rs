//! Error types shared by every layer of the runtime.

use thiserror::Error;

/// Errors surfaced by calls, streams and the wire layer.
#[derive(Error, Debug)]
pub enum Error {
    /// No handler is registered for the requested service/method.
    #[error("unimplemented: no handler for the requested method")]
    Unimplemented,

    /// A data or control frame arrived for a call that already completed.
    #[error("call already completed")]
    Completed,

    /// A packet variant that is not valid in the current direction or state.
    #[error("unrecognized packet variant")]
    UnrecognizedPacket,

    /// A packet with no body, or a CallData carrying nothing at all.
    #[error("invalid empty packet")]
    EmptyPacket,

    /// CallStart with an empty service id.
    #[error("service id empty")]
    EmptyServiceId,

    /// CallStart with an empty method id.
    #[error("method id empty")]
    EmptyMethodId,

    /// CallData observed before the call was started.
    #[error("call data received before call start")]
    CallStartMissing,

    /// More than one CallStart on the same substream.
    #[error("call start received twice")]
    CallStartAlreadyReceived,

    /// A frame length prefix of zero.
    #[error("zero length frame")]
    ZeroLengthFrame,

    /// A frame larger than the configured limit.
    #[error("frame of {0} bytes exceeds limit of {1}")]
    FrameTooLarge(usize, usize),

    /// Payload bytes that do not decode as the expected message type.
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] prost::DecodeError),

    /// Packet serialization failed.
    #[error("encode failed: {0}")]
    Encode(#[from] prost::EncodeError),

    /// Opaque failure text reported by the peer in CallData.error.
    #[error("remote error: {0}")]
    Remote(String),

    /// The call context was cancelled, locally or by a CallCancel.
    #[error("call cancelled")]
    Cancelled,

    /// End of stream: the substream ended or the remote closed its side.
    #[error("stream closed")]
    StreamClosed,

    /// Transport-level read or write failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the two ways a stream stops yielding messages.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::StreamClosed | Error::Cancelled)
    }

    /// True when the call was cancelled rather than completed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True when the peer had no handler for the call.
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, Error::Unimplemented)
    }

    /// Wraps peer-supplied failure text.
    pub fn remote(text: impl Into<String>) -> Self {
        Error::Remote(text.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_texts() {
        assert!(Error::Unimplemented.to_string().contains("unimplemented"));
        assert_eq!(Error::Completed.to_string(), "call already completed");
        assert_eq!(
            Error::remote("boom").to_string(),
            "remote error: boom"
        );
        assert_eq!(
            Error::FrameTooLarge(11, 10).to_string(),
            "frame of 11 bytes exceeds limit of 10"
        );
    }

    #[test]
    fn predicates() {
        assert!(Error::StreamClosed.is_closed());
        assert!(Error::Cancelled.is_closed());
        assert!(!Error::Completed.is_closed());

        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::StreamClosed.is_cancelled());

        assert!(Error::Unimplemented.is_unimplemented());
        assert!(!Error::Remote("x".into()).is_unimplemented());
    }
}
