//! One-directional generation channel: open, deliver, close.
//!
//! [`Channel::open`] spawns a single task that asks an [`EventSource`] for a
//! byte stream, announces [`Signal::Opened`], then runs the
//! [reader](crate::stream::reader::run_reader) until the stream ends, a
//! terminal event arrives, or the channel is closed. No reconnection is
//! attempted here; recovery is the session controller's `retry`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::models::request::GenerationRequest;
use crate::models::session::GenerationToken;
use crate::stream::event::GenerationEvent;
use crate::stream::reader::run_reader;
use crate::Result;

/// Raw bytes of an opened push stream.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Future returned by [`EventSource::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<ByteStream>> + Send + 'a>>;

/// Something the session controller can consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The transport accepted the request and the stream is open.
    Opened,
    /// A decoded generation event.
    Event(GenerationEvent),
    /// The transport failed or closed before a terminal event.
    TransportError(String),
    /// The timeout monitor observed a full silence period ending at
    /// `fired_at`.
    Timeout {
        /// When the watchdog fired.
        fired_at: Instant,
    },
}

/// A [`Signal`] stamped with the attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Attempt the signal belongs to.
    pub token: GenerationToken,
    /// The signal itself.
    pub signal: Signal,
}

/// Sending half used by one producer of an attempt's signals.
///
/// [`fail`](Self::fail) consumes the sink, so a channel can report at most
/// one transport error.
#[derive(Debug)]
pub struct ChannelSink {
    token: GenerationToken,
    tx: mpsc::Sender<Inbound>,
}

impl ChannelSink {
    /// Create a sink stamping messages with `token`.
    #[must_use]
    pub fn new(token: GenerationToken, tx: mpsc::Sender<Inbound>) -> Self {
        Self { token, tx }
    }

    /// Token stamped on every message.
    #[must_use]
    pub fn token(&self) -> GenerationToken {
        self.token
    }

    /// Deliver `signal`; returns `false` once the receiver is gone.
    pub async fn deliver(&self, signal: Signal) -> bool {
        self.tx
            .send(Inbound {
                token: self.token,
                signal,
            })
            .await
            .is_ok()
    }

    /// Deliver a final [`Signal::TransportError`] and retire the sink.
    pub async fn fail(self, reason: impl Into<String>) {
        let token = self.token;
        if !self.deliver(Signal::TransportError(reason.into())).await {
            debug!(%token, "channel sink: inbox closed before transport error could be delivered");
        }
    }
}

/// Transport seam: produces the raw push stream for a request.
///
/// The production implementation is
/// [`HttpEventSource`](crate::stream::http::HttpEventSource).
pub trait EventSource: Send + Sync {
    /// Open the push stream for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) when the
    /// stream cannot be opened.
    fn connect<'a>(&'a self, request: &'a GenerationRequest) -> ConnectFuture<'a>;
}

/// Handle to one live channel.
///
/// Holds exactly one transport task. Closing is idempotent, and dropping
/// the handle closes the channel.
#[derive(Debug)]
pub struct Channel {
    token: GenerationToken,
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl Channel {
    /// Spawn the channel task for `request`, delivering through `sink`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn open(
        source: Arc<dyn EventSource>,
        request: GenerationRequest,
        sink: ChannelSink,
        max_frame_bytes: usize,
    ) -> Self {
        let token = sink.token();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let join_handle = tokio::spawn(
            async move {
                let connected = tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => {
                        debug!("channel closed while connecting");
                        return;
                    }
                    result = source.connect(&request) => result,
                };

                match connected {
                    Ok(stream) => {
                        if !sink.deliver(Signal::Opened).await {
                            return;
                        }
                        run_reader(stream, sink, task_cancel, max_frame_bytes).await;
                    }
                    Err(err) => {
                        warn!(%err, "failed to open generation channel");
                        sink.fail(format!("failed to open channel: {err}")).await;
                    }
                }
            }
            .instrument(info_span!("generation_channel", %token)),
        );

        Self {
            token,
            cancel,
            join_handle: Some(join_handle),
        }
    }

    /// Attempt this channel belongs to.
    #[must_use]
    pub fn token(&self) -> GenerationToken {
        self.token
    }

    /// Close the channel. Safe to call any number of times.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!(token = %self.token, "closing generation channel");
            self.cancel.cancel();
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close the channel and wait for its task to exit.
    pub async fn await_completion(mut self) {
        self.close();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
