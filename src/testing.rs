//! In-memory transports for exercising clients and servers without a
//! network.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::{duplex, DuplexStream};

use crate::client::{SingleStreamOpener, StreamOpener};
use crate::error::{Error, Result};
use crate::transport::{open_packet_pipe, ArcPacketSink, PacketReceiver};

/// Default buffer per direction for test pipes.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// Connected in-memory duplex pair.
pub fn pipe(capacity: usize) -> (DuplexStream, DuplexStream) {
    duplex(capacity)
}

/// [`pipe`] with the default capacity.
pub fn pipe_default() -> (DuplexStream, DuplexStream) {
    pipe(DEFAULT_PIPE_CAPACITY)
}

/// One client opener and the matching server-side duplex, ready to wire a
/// client to `Server::handle_stream`.
pub fn test_pair() -> (SingleStreamOpener<DuplexStream>, DuplexStream) {
    let (client_side, server_side) = pipe_default();
    (SingleStreamOpener::new(client_side), server_side)
}

/// Opener over a queue of pre-connected duplexes, for tests that make
/// several calls. Streams are handed out in push order.
pub struct PipeOpener {
    streams: Mutex<Vec<DuplexStream>>,
}

impl PipeOpener {
    pub fn new(streams: Vec<DuplexStream>) -> Self {
        Self {
            streams: Mutex::new(streams),
        }
    }

    pub fn push(&self, stream: DuplexStream) {
        self.streams.lock().unwrap().push(stream);
    }
}

#[async_trait]
impl StreamOpener for PipeOpener {
    async fn open_substream(&self) -> Result<(ArcPacketSink, PacketReceiver)> {
        let stream = {
            let mut streams = self.streams.lock().unwrap();
            if streams.is_empty() {
                return Err(Error::StreamClosed);
            }
            streams.remove(0)
        };
        let (reader, writer) = tokio::io::split(stream);
        Ok(open_packet_pipe(reader, writer))
    }
}
