//! Event channel adapter.
//!
//! Opens a single server-to-client push stream per generation attempt and
//! turns its bytes into typed events, in arrival order, for one listener.
//!
//! Submodules:
//! - `codec`: SSE framing over [`AnyDelimiterCodec`](tokio_util::codec::AnyDelimiterCodec).
//! - `event`: the closed [`GenerationEvent`](event::GenerationEvent) enum and
//!   frame decoding.
//! - `reader`: the read task forwarding events into the controller's inbox.
//! - `channel`: the open/close handle and the [`EventSource`](channel::EventSource) seam.
//! - `http`: the `reqwest`-backed transport.

pub mod channel;
pub mod codec;
pub mod event;
pub mod http;
pub mod reader;
