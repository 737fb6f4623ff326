//! wirecall: streaming protobuf RPC over any bidirectional byte stream.
//!
//! One process exposes named services; another invokes them over any
//! transport that can provide a byte duplex per call. Four method shapes are
//! supported over a single wire format: unary, server streaming, client
//! streaming and bidirectional streaming. Concurrent calls multiplex over
//! the transport with per-call ordering, cancellation and error propagation.
//!
//! # Client
//!
//! ```rust,ignore
//! use wirecall::{Client, RpcClient, SingleStreamOpener};
//! use tokio::net::TcpStream;
//!
//! let conn = TcpStream::connect("127.0.0.1:9090").await?;
//! let client = RpcClient::new(SingleStreamOpener::new(conn));
//!
//! let reply: MyReply = client.exec_call("my.Service", "MyMethod", &request).await?;
//! ```
//!
//! # Server
//!
//! ```rust,ignore
//! use wirecall::{Mux, Server};
//! use std::sync::Arc;
//!
//! let mux = Arc::new(Mux::new());
//! mux.register(Arc::new(MyServiceHandler))?;
//!
//! let server = Server::with_arc(mux);
//! server.handle_stream(conn).await?;
//! ```
//!
//! # Wire format
//!
//! Every substream carries length-prefixed frames: a little-endian u32
//! length, then that many bytes of an encoded [`proto::Packet`], a oneof of
//! CallStart, CallData and CallCancel. Message payloads are opaque bytes;
//! the typed helpers in [`stream::MsgStreamExt`] encode and decode them with
//! prost.

pub mod bridge;
pub mod call;
pub mod client;
pub mod error;
pub mod framing;
pub mod handler;
pub mod invoker;
pub mod mux;
pub mod packet;
pub mod proto;
pub mod server;
pub mod stream;
pub mod testing;
pub mod transport;

pub use bridge::{serve_stream, stream_opener, ClientInvoker, StreamPacketSink};
pub use call::{ClientCall, ServerCall};
pub use client::{Client, RpcClient, SingleStreamOpener, StreamOpener};
pub use error::{Error, Result};
pub use framing::{FrameCodec, DEFAULT_MAX_FRAME_LEN};
pub use handler::{ArcHandler, Handler};
pub use invoker::{ArcInvoker, Invoker};
pub use mux::Mux;
pub use packet::Validate;
pub use server::{Server, ServerConfig};
pub use stream::{ArcMsgStream, BoxMsgStream, Context, MsgStream, MsgStreamExt};
pub use transport::{open_packet_pipe, ArcPacketSink, DuplexPacketSink, PacketReceiver, PacketSink};

// Service glue built on this crate needs these.
pub use async_trait::async_trait;
pub use prost::Message as ProstMessage;

/// One-stop imports for applications.
pub mod prelude {
    pub use crate::client::{Client, RpcClient, SingleStreamOpener, StreamOpener};
    pub use crate::error::{Error, Result};
    pub use crate::handler::Handler;
    pub use crate::invoker::Invoker;
    pub use crate::mux::Mux;
    pub use crate::server::Server;
    pub use crate::stream::{Context, MsgStream, MsgStreamExt};

    pub use async_trait::async_trait;
    pub use prost::Message as ProstMessage;
}
