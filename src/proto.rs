//! Wire message types.
//!
//! Hand-written prost derives, byte-for-byte compatible with the packet
//! schema: a `Packet` envelope whose oneof body is `CallStart` (field 1),
//! `CallData` (field 2) or `call_cancel` (field 3).

use bytes::Bytes;

/// Envelope for every frame exchanged on a call substream.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Packet {
    #[prost(oneof = "packet::Body", tags = "1, 2, 3")]
    pub body: ::core::option::Option<packet::Body>,
}

/// Nested types for [`Packet`].
pub mod packet {
    /// Exactly one variant per packet.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        /// Begins a call. Sent only by the initiator, at most once.
        #[prost(message, tag = "1")]
        CallStart(super::CallStart),
        /// One data frame in a running call.
        #[prost(message, tag = "2")]
        CallData(super::CallData),
        /// One-shot abort signal. `true` cancels; `false` is a no-op.
        #[prost(bool, tag = "3")]
        CallCancel(bool),
    }
}

/// Opens a call against (service, method), optionally carrying the first
/// request message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallStart {
    #[prost(string, tag = "1")]
    pub rpc_service: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub rpc_method: ::prost::alloc::string::String,
    #[prost(bytes = "bytes", tag = "3")]
    pub data: Bytes,
    /// Set when a message is attached and its encoding is zero bytes,
    /// distinguishing empty-but-present from absent.
    #[prost(bool, tag = "4")]
    pub data_is_zero: bool,
}

/// One message frame, completion notice, or error for a running call.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallData {
    #[prost(bytes = "bytes", tag = "1")]
    pub data: Bytes,
    #[prost(bool, tag = "2")]
    pub data_is_zero: bool,
    /// No further data will be sent from the sender's side.
    #[prost(bool, tag = "3")]
    pub complete: bool,
    /// Non-empty conveys a failure and implies completion.
    #[prost(string, tag = "4")]
    pub error: ::prost::alloc::string::String,
}

/// Folds an optional payload into the (data, data_is_zero) wire convention.
pub fn pack_payload(payload: Option<Bytes>) -> (Bytes, bool) {
    match payload {
        Some(b) if b.is_empty() => (Bytes::new(), true),
        Some(b) => (b, false),
        None => (Bytes::new(), false),
    }
}

/// Inverse of [`pack_payload`]: `Some` when a message was attached, even a
/// zero-byte one.
pub fn unpack_payload(data: Bytes, data_is_zero: bool) -> Option<Bytes> {
    if !data.is_empty() || data_is_zero {
        Some(data)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn packet_roundtrip_call_start() {
        let pkt = Packet {
            body: Some(packet::Body::CallStart(CallStart {
                rpc_service: "demo.Service".into(),
                rpc_method: "Method".into(),
                data: Bytes::from_static(&[1, 2, 3]),
                data_is_zero: false,
            })),
        };
        let bytes = pkt.encode_to_vec();
        assert_eq!(Packet::decode(&bytes[..]).unwrap(), pkt);
    }

    #[test]
    fn packet_roundtrip_call_cancel() {
        let pkt = Packet {
            body: Some(packet::Body::CallCancel(true)),
        };
        let bytes = pkt.encode_to_vec();
        assert_eq!(Packet::decode(&bytes[..]).unwrap(), pkt);
    }

    #[test]
    fn unknown_fields_are_skipped() {
        // A packet from a newer peer may carry extra fields; decoding must
        // not fail on them. Field 15 here is unknown to this schema.
        let mut bytes = Packet {
            body: Some(packet::Body::CallCancel(true)),
        }
        .encode_to_vec();
        bytes.extend_from_slice(&[0x78, 0x01]); // field 15, varint 1
        let decoded = Packet::decode(&bytes[..]).unwrap();
        assert!(matches!(decoded.body, Some(packet::Body::CallCancel(true))));
    }

    #[test]
    fn pack_payload_variants() {
        assert_eq!(pack_payload(None), (Bytes::new(), false));
        assert_eq!(pack_payload(Some(Bytes::new())), (Bytes::new(), true));
        assert_eq!(
            pack_payload(Some(Bytes::from_static(b"x"))),
            (Bytes::from_static(b"x"), false)
        );
    }

    #[test]
    fn unpack_payload_variants() {
        assert_eq!(unpack_payload(Bytes::new(), false), None);
        assert_eq!(unpack_payload(Bytes::new(), true), Some(Bytes::new()));
        assert_eq!(
            unpack_payload(Bytes::from_static(b"x"), false),
            Some(Bytes::from_static(b"x"))
        );
    }
}
