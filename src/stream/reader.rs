//! Channel reader task.
//!
//! Reads SSE frames from a generation stream, decodes each into a
//! [`GenerationEvent`](crate::stream::event::GenerationEvent) and forwards it
//! through the channel's [`ChannelSink`].
//!
//! The reader is driven by [`FramedRead`] backed by [`SseCodec`], which
//! enforces the per-frame byte bound before any JSON parsing happens.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream::channel::{ChannelSink, Signal};
use crate::stream::codec::SseCodec;
use crate::stream::event::parse_frame;

/// Reader task: decode frames from `stream` and deliver events to `sink`.
///
/// Malformed or unrecognised frames are logged and skipped; they do **not**
/// end the reader.
///
/// The reader stops after delivering a terminal event (`complete` or
/// `error`). If the stream ends or fails before one, a single
/// `TransportError` is delivered instead.
///
/// # Cancellation
///
/// Respects `cancel`: when the token fires the reader exits without
/// delivering anything further.
pub async fn run_reader<R>(
    stream: R,
    sink: ChannelSink,
    cancel: CancellationToken,
    max_frame_bytes: usize,
) where
    R: AsyncRead + Unpin + Send,
{
    let token = sink.token();
    let mut framed = FramedRead::new(stream, SseCodec::with_max_frame_bytes(max_frame_bytes));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%token, "channel reader: cancellation received, stopping");
                return;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(%token, "channel reader: EOF before terminal event");
                        sink.fail("stream closed before generation finished").await;
                        return;
                    }

                    Some(Err(e)) => {
                        warn!(%token, error = %e, "channel reader: stream error, stopping");
                        sink.fail(format!("stream error: {e}")).await;
                        return;
                    }

                    Some(Ok(frame)) => match parse_frame(&frame) {
                        Ok(Some(event)) => {
                            let terminal = event.is_terminal();
                            if !sink.deliver(Signal::Event(event)).await {
                                debug!(%token, "channel reader: inbox closed, stopping");
                                return;
                            }
                            if terminal {
                                debug!(%token, "channel reader: terminal event delivered, stopping");
                                return;
                            }
                        }
                        Ok(None) => {
                            // Unknown event name: skipped.
                        }
                        Err(e) => {
                            warn!(
                                %token,
                                error = %e,
                                raw_data = %frame.data,
                                "channel reader: parse error, skipping frame"
                            );
                        }
                    },
                }
            }
        }
    }
}
