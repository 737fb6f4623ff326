//! Packet constructors and validation.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::proto::{pack_payload, packet::Body, CallData, CallStart, Packet};

/// Builds the CallStart packet that opens a call.
///
/// `first_msg` carries the initial request when present; an empty-but-present
/// message is flagged with `data_is_zero`.
pub fn call_start(
    service: impl Into<String>,
    method: impl Into<String>,
    first_msg: Option<Bytes>,
) -> Packet {
    let (data, data_is_zero) = pack_payload(first_msg);
    Packet {
        body: Some(Body::CallStart(CallStart {
            rpc_service: service.into(),
            rpc_method: method.into(),
            data,
            data_is_zero,
        })),
    }
}

/// Builds a CallData packet. A non-empty `error` forces `complete`.
pub fn call_data(payload: Option<Bytes>, complete: bool, error: Option<String>) -> Packet {
    let (data, data_is_zero) = pack_payload(payload);
    Packet {
        body: Some(Body::CallData(CallData {
            data,
            data_is_zero,
            complete: complete || error.is_some(),
            error: error.unwrap_or_default(),
        })),
    }
}

/// Builds a bare completion notice.
pub fn call_complete() -> Packet {
    call_data(None, true, None)
}

/// Builds a terminal error frame.
pub fn call_error(text: impl Into<String>) -> Packet {
    call_data(None, true, Some(text.into()))
}

/// Builds the one-shot cancel sentinel.
pub fn call_cancel() -> Packet {
    Packet {
        body: Some(Body::CallCancel(true)),
    }
}

/// Wire-level validity check, applied to every received packet.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

impl Validate for Packet {
    fn validate(&self) -> Result<()> {
        match &self.body {
            Some(Body::CallStart(start)) => start.validate(),
            Some(Body::CallData(data)) => data.validate(),
            Some(Body::CallCancel(_)) => Ok(()),
            None => Err(Error::EmptyPacket),
        }
    }
}

impl Validate for CallStart {
    fn validate(&self) -> Result<()> {
        if self.rpc_service.is_empty() {
            return Err(Error::EmptyServiceId);
        }
        if self.rpc_method.is_empty() {
            return Err(Error::EmptyMethodId);
        }
        Ok(())
    }
}

impl Validate for CallData {
    fn validate(&self) -> Result<()> {
        // Must carry something: data, a zero-byte message marker, a
        // completion notice, or an error.
        if self.data.is_empty() && !self.data_is_zero && !self.complete && self.error.is_empty() {
            return Err(Error::EmptyPacket);
        }
        Ok(())
    }
}

impl Packet {
    /// True for a CallData that ends the sender's side, or a cancel.
    pub fn is_terminal(&self) -> bool {
        match &self.body {
            Some(Body::CallData(d)) => d.complete || !d.error.is_empty(),
            Some(Body::CallCancel(v)) => *v,
            _ => false,
        }
    }

    /// Variant name, for diagnostics.
    pub fn variant(&self) -> &'static str {
        match &self.body {
            Some(Body::CallStart(_)) => "CallStart",
            Some(Body::CallData(_)) => "CallData",
            Some(Body::CallCancel(_)) => "CallCancel",
            None => "Empty",
        }
    }
}
