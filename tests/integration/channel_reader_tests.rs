//! Integration tests for the channel task and the SSE reader.
//!
//! Covers open/close lifecycle, the single transport error guarantee,
//! stopping after terminal events, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use docgen_stream::models::session::GenerationToken;
use docgen_stream::stream::channel::{Channel, ChannelSink, EventSource, Inbound, Signal};
use docgen_stream::stream::event::GenerationEvent;
use docgen_stream::stream::reader::run_reader;

use super::test_helpers::{document_request, frame, send, ScriptedSource};

const MAX_FRAME: usize = 64 * 1024;

fn make_sink() -> (ChannelSink, mpsc::Receiver<Inbound>, GenerationToken) {
    let (tx, rx) = mpsc::channel(32);
    let token = GenerationToken::new();
    (ChannelSink::new(token, tx), rx, token)
}

/// Receive everything the producer delivers until it drops its sender.
async fn collect(mut rx: mpsc::Receiver<Inbound>) -> Vec<Signal> {
    let mut signals = Vec::new();
    while let Some(inbound) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("producer must finish")
    {
        signals.push(inbound.signal);
    }
    signals
}

// ── Reader ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reader_delivers_events_in_arrival_order() {
    let (sink, rx, token) = make_sink();
    let (mut writer, reader) = tokio::io::duplex(4096);

    let task = tokio::spawn(run_reader(reader, sink, CancellationToken::new(), MAX_FRAME));
    let stream = [
        frame("status", r#"{"status":"generating"}"#),
        frame("chunk", r#"{"section_id":"s1","content":"a"}"#),
        frame("complete", r#"{"artifact_id":"A1","version":1}"#),
    ]
    .concat();
    send(&mut writer, &stream).await;
    task.await.expect("reader task");

    let mut rx = rx;
    let first = rx.recv().await.expect("first");
    assert_eq!(first.token, token, "messages carry the sink's token");
    let mut signals = vec![first.signal];
    signals.extend(collect(rx).await);

    assert_eq!(signals.len(), 3);
    assert!(matches!(&signals[0], Signal::Event(GenerationEvent::Status { status }) if status == "generating"));
    assert!(matches!(&signals[1], Signal::Event(GenerationEvent::Chunk { delta, .. }) if delta == "a"));
    assert!(matches!(
        &signals[2],
        Signal::Event(GenerationEvent::Complete { .. })
    ));
}

/// Nothing after a terminal event is delivered, and no transport error follows.
#[tokio::test]
async fn reader_stops_after_terminal_event() {
    let (sink, rx, _) = make_sink();
    let (mut writer, reader) = tokio::io::duplex(4096);

    let task = tokio::spawn(run_reader(reader, sink, CancellationToken::new(), MAX_FRAME));
    let stream = [
        frame("error", r#"{"error":"boom"}"#),
        frame("chunk", r#"{"section_id":"s1","content":"late"}"#),
    ]
    .concat();
    send(&mut writer, &stream).await;
    task.await.expect("reader task");
    drop(writer);

    let signals = collect(rx).await;
    assert_eq!(
        signals,
        vec![Signal::Event(GenerationEvent::Error {
            message: "boom".to_owned()
        })]
    );
}

/// EOF before a terminal event yields exactly one transport error.
#[tokio::test]
async fn reader_reports_single_transport_error_on_eof() {
    let (sink, rx, _) = make_sink();
    let (mut writer, reader) = tokio::io::duplex(4096);

    let task = tokio::spawn(run_reader(reader, sink, CancellationToken::new(), MAX_FRAME));
    send(&mut writer, &frame("chunk", r#"{"section_id":"s1","content":"a"}"#)).await;
    drop(writer);
    task.await.expect("reader task");

    let signals = collect(rx).await;
    let errors = signals
        .iter()
        .filter(|s| matches!(s, Signal::TransportError(_)))
        .count();
    assert_eq!(errors, 1, "exactly one transport error, got {signals:?}");
    assert!(matches!(signals.last(), Some(Signal::TransportError(_))));
}

/// An oversize frame is dropped and the reader keeps going.
#[tokio::test]
async fn reader_skips_oversize_frame() {
    let (sink, rx, _) = make_sink();
    let (mut writer, reader) = tokio::io::duplex(16 * 1024);

    let task = tokio::spawn(run_reader(reader, sink, CancellationToken::new(), 256));
    let big = format!(r#"{{"section_id":"s1","content":"{}"}}"#, "x".repeat(1024));
    let stream = [
        frame("chunk", &big),
        frame("complete", r#"{"artifact_id":"A1","version":1}"#),
    ]
    .concat();
    send(&mut writer, &stream).await;
    task.await.expect("reader task");
    drop(writer);

    let signals = collect(rx).await;
    assert_eq!(signals.len(), 1, "oversize chunk must be dropped: {signals:?}");
    assert!(matches!(
        signals[0],
        Signal::Event(GenerationEvent::Complete { .. })
    ));
}

/// Cancellation stops the reader without any further delivery.
#[tokio::test]
async fn reader_exits_silently_on_cancel() {
    let (sink, rx, _) = make_sink();
    let (_writer, reader) = tokio::io::duplex(4096);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run_reader(reader, sink, cancel.clone(), MAX_FRAME));
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("reader must stop after cancel")
        .expect("reader task");

    assert!(collect(rx).await.is_empty());
}

// ── Channel ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn channel_announces_open_then_events() {
    let source = ScriptedSource::new();
    let mut writer = source.push_stream();
    let (sink, rx, token) = make_sink();

    let channel = Channel::open(
        Arc::clone(&source) as Arc<dyn EventSource>,
        document_request(),
        sink,
        MAX_FRAME,
    );
    assert_eq!(channel.token(), token);
    send(
        &mut writer,
        &frame("complete", r#"{"artifact_id":"A1","version":1}"#),
    )
    .await;

    let signals = collect(rx).await;
    channel.await_completion().await;
    assert_eq!(signals.first(), Some(&Signal::Opened));
    assert_eq!(signals.len(), 2);
    assert_eq!(source.connects(), 1);
}

#[tokio::test]
async fn channel_reports_connect_failure_once() {
    let source = ScriptedSource::new();
    source.push_failure("HTTP 503");
    let (sink, rx, _) = make_sink();

    let channel = Channel::open(
        Arc::clone(&source) as Arc<dyn EventSource>,
        document_request(),
        sink,
        MAX_FRAME,
    );
    let signals = collect(rx).await;
    drop(channel);

    assert_eq!(signals.len(), 1);
    assert!(
        matches!(&signals[0], Signal::TransportError(reason) if reason.contains("HTTP 503")),
        "got {signals:?}"
    );
}

/// `close` may be called repeatedly; nothing is delivered afterwards.
#[tokio::test]
async fn channel_close_is_idempotent() {
    let source = ScriptedSource::new();
    let mut writer = source.push_stream();
    let (sink, mut rx, _) = make_sink();

    let channel = Channel::open(
        Arc::clone(&source) as Arc<dyn EventSource>,
        document_request(),
        sink,
        MAX_FRAME,
    );
    let opened = rx.recv().await.expect("opened");
    assert_eq!(opened.signal, Signal::Opened);

    channel.close();
    channel.close();
    assert!(channel.is_closed());
    channel.await_completion().await;

    // Writes after close go nowhere.
    let _ = tokio::io::AsyncWriteExt::write_all(
        &mut writer,
        frame("complete", r#"{"artifact_id":"A1"}"#).as_bytes(),
    )
    .await;
    assert!(collect(rx).await.is_empty());
}

/// Dropping the handle closes the channel.
#[tokio::test]
async fn dropping_channel_closes_it() {
    let source = ScriptedSource::new();
    let _writer = source.push_stream();
    let (sink, mut rx, _) = make_sink();

    let channel = Channel::open(
        Arc::clone(&source) as Arc<dyn EventSource>,
        document_request(),
        sink,
        MAX_FRAME,
    );
    assert_eq!(rx.recv().await.expect("opened").signal, Signal::Opened);
    drop(channel);

    assert!(
        collect(rx).await.is_empty(),
        "a closed channel must not report a transport error"
    );
}
