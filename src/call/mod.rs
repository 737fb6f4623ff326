//! Per-call state machines.
//!
//! [`CallCore`] holds the state shared by both directions of a call; the
//! client and server specializations layer their CallStart handling on top.

mod client;
mod server;

pub use client::ClientCall;
pub use server::ServerCall;

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::packet::{call_cancel, call_data};
use crate::proto::{unpack_payload, CallData};
use crate::stream::Context;
use crate::transport::ArcPacketSink;

/// State shared by the client and server sides of a call.
///
/// Inbound frames accumulate in a FIFO; every state change pings a broadcast
/// so that all pending readers and waiters re-check. The locally-completed
/// flag lives outside the mutex so write paths can claim completion with a
/// single atomic operation.
pub struct CallCore {
    ctx: Context,
    sink: ArcPacketSink,
    completed: AtomicBool,
    changed: Notify,
    state: Mutex<Inbound>,
}

struct Inbound {
    /// Pending payloads. Zero-length entries are legal: they are
    /// empty-but-present messages and must reach the reader.
    queue: VecDeque<Bytes>,
    /// The remote sent complete/error/cancel, or the substream dropped.
    closed: bool,
    /// Failure text from the remote, if any.
    error: Option<String>,
    /// The call was torn down locally; readers see `Cancelled`.
    aborted: bool,
}

impl CallCore {
    pub fn new(ctx: Context, sink: ArcPacketSink) -> Self {
        Self {
            ctx,
            sink,
            completed: AtomicBool::new(false),
            changed: Notify::new(),
            state: Mutex::new(Inbound {
                queue: VecDeque::new(),
                closed: false,
                error: None,
                aborted: false,
            }),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn sink(&self) -> &ArcPacketSink {
        &self.sink
    }

    /// True once this side has sent complete, error or cancel.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Enqueues a payload without going through a CallData packet. Used for
    /// the first message embedded in CallStart.
    pub(crate) fn push_inbound(&self, payload: Bytes) {
        self.state.lock().unwrap().queue.push_back(payload);
        self.changed.notify_waiters();
    }

    /// Pops the next inbound payload, suspending until one arrives or the
    /// call terminates.
    ///
    /// Buffered payloads are drained before any termination is reported;
    /// after that a remote error wins over plain end-of-stream, and local
    /// cancellation shuts the call down before reporting `Cancelled`.
    pub async fn read_one(&self) -> Result<Bytes> {
        loop {
            // Register interest before checking state, otherwise a wakeup
            // between the check and the await is lost.
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let mut state = self.state.lock().unwrap();
                if let Some(payload) = state.queue.pop_front() {
                    return Ok(payload);
                }
                if state.closed {
                    return match &state.error {
                        Some(text) => Err(Error::Remote(text.clone())),
                        None if state.aborted => Err(Error::Cancelled),
                        None => Err(Error::StreamClosed),
                    };
                }
            }

            if self.ctx.is_cancelled() {
                self.abort().await;
                return Err(Error::Cancelled);
            }

            tokio::select! {
                _ = &mut changed => {}
                _ = self.ctx.cancelled() => {}
            }
        }
    }

    /// Suspends until the remote side terminates the call.
    pub async fn wait(&self) -> Result<()> {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let state = self.state.lock().unwrap();
                if let Some(text) = &state.error {
                    return Err(Error::Remote(text.clone()));
                }
                if state.closed {
                    if state.aborted {
                        return Err(Error::Cancelled);
                    }
                    return Ok(());
                }
            }

            if self.ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }

            tokio::select! {
                _ = &mut changed => {}
                _ = self.ctx.cancelled() => {}
            }
        }
    }

    /// Sends one CallData frame.
    ///
    /// Completing frames claim the locally-completed flag first, so nothing
    /// can follow them out. A bare completion notice repeated after
    /// completion is tolerated as a no-op so close-send stays idempotent.
    pub async fn write_call_data(
        &self,
        payload: Option<Bytes>,
        complete: bool,
        error: Option<String>,
    ) -> Result<()> {
        let completing = complete || error.is_some();
        if completing {
            if self
                .completed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                if complete && payload.is_none() && error.is_none() {
                    return Ok(());
                }
                return Err(Error::Completed);
            }
        } else if self.is_completed() {
            return Err(Error::Completed);
        }

        self.sink.send(call_data(payload, complete, error)).await
    }

    /// Sends the one-shot cancel sentinel. The atomic swap makes the second
    /// caller lose without touching the wire.
    pub async fn write_call_cancel(&self) -> Result<()> {
        if self.completed.swap(true, Ordering::SeqCst) {
            return Err(Error::Completed);
        }
        self.sink.send(call_cancel()).await
    }

    /// Folds one inbound CallData frame into the state.
    pub async fn handle_call_data(&self, frame: CallData) -> Result<()> {
        let payload = unpack_payload(frame.data, frame.data_is_zero);
        let terminal = frame.complete || !frame.error.is_empty();

        {
            let mut state = self.state.lock().unwrap();

            if state.closed {
                // Legacy peers may repeat a bare completion notice after the
                // call closed; only a frame that still carries content is a
                // protocol error.
                return if payload.is_none() && terminal {
                    Ok(())
                } else {
                    Err(Error::Completed)
                };
            }

            if let Some(data) = payload {
                state.queue.push_back(data);
            }
            if !frame.error.is_empty() {
                state.error = Some(frame.error);
                state.closed = true;
            } else if frame.complete {
                state.closed = true;
            }
        }

        self.changed.notify_waiters();
        Ok(())
    }

    /// Remote cancel: close with cancellation as the remote failure, then
    /// shut the writer.
    pub async fn handle_call_cancel(&self) -> Result<()> {
        self.shutdown(Some(Error::Cancelled.to_string())).await;
        Ok(())
    }

    /// Substream ended underneath the call.
    pub async fn handle_stream_close(&self, error: Option<String>) {
        self.shutdown(error).await;
    }

    /// Local abort: claim completion, close the queue as cancelled, and
    /// release everything.
    pub(crate) async fn abort(&self) {
        self.completed.store(true, Ordering::SeqCst);
        {
            let mut state = self.state.lock().unwrap();
            state.aborted = true;
            state.closed = true;
        }
        let _ = self.sink.shutdown().await;
        self.ctx.cancel();
        self.changed.notify_waiters();
    }

    /// Terminates the inbound side: records `error` unless one is already
    /// set, closes the queue, shuts the sink and trips the context.
    async fn shutdown(&self, error: Option<String>) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(text) = error {
                state.error.get_or_insert(text);
            }
            state.closed = true;
        }

        let _ = self.sink.shutdown().await;
        self.ctx.cancel();
        self.changed.notify_waiters();
    }
}
