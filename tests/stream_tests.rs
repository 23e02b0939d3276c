//! Tests for the SSE consumer: chunking, malformed frames, error frames,
//! terminator handling, transport failures and cancellation.

use std::io;
use std::task::Poll;
use std::time::Duration;

use chat_artifacts::sse::{Completion, DeltaStream};
use chat_artifacts::{CancellationToken, StreamError};
use futures_util::stream::{self, Stream, StreamExt};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Vec<u8>, io::Error>> {
    let items: Vec<Result<Vec<u8>, io::Error>> = parts.iter().map(|p| Ok(p.to_vec())).collect();
    stream::iter(items)
}

fn frame(text: &str) -> String {
    format!("data: {}\n\n", serde_json::json!({ "text": text }))
}

/// Drain a stream, returning deltas, the error (if any) and the completion.
async fn drain<S>(
    mut deltas: DeltaStream<S>,
) -> (Vec<String>, Option<StreamError>, Option<Completion>)
where
    S: Stream<Item = Result<Vec<u8>, io::Error>>,
{
    let mut out = Vec::new();
    let mut error = None;
    loop {
        match deltas.next_delta().await {
            Ok(Some(d)) => out.push(d),
            Ok(None) => break,
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    (out, error, deltas.completion())
}

const SCRIPT: &str = concat!(
    "event: message\n",
    "data: {\"text\":\"Sure, here:\\n```html\\n\"}\n\n",
    ": keep-alive\n\n",
    "data: {\"text\":\"<p>caf\u{e9} \u{1f680}</p>\"}\n\n",
    "data: {oops\n\n",
    "data: {\"text\":\"\\n```\"}\n\n",
    "data: [DONE]\n\n",
);

// ---------------------------------------------------------------------------
// Basic sequences
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_yields_deltas_in_order() {
    let body = format!("{}{}{}", frame("Hel"), frame("lo"), "data: [DONE]\n\n");
    let (deltas, err, completion) = drain(DeltaStream::new(chunks(&[body.as_bytes()]))).await;
    assert_eq!(deltas, vec!["Hel", "lo"]);
    assert!(err.is_none());
    assert_eq!(completion, Some(Completion::Terminator));
}

#[tokio::test]
async fn test_terminator_produces_no_extra_delta() {
    let body = format!("{}data: [DONE]\n\n", frame("only"));
    let mut deltas = DeltaStream::new(chunks(&[body.as_bytes()]));
    assert_eq!(deltas.next_delta().await.expect("ok").as_deref(), Some("only"));
    assert_eq!(deltas.next_delta().await.expect("ok"), None);
    assert_eq!(deltas.completion(), Some(Completion::Terminator));
    // Finished streams stay finished.
    assert_eq!(deltas.next_delta().await.expect("ok"), None);
}

#[tokio::test]
async fn test_terminator_stops_reading_source() {
    let after = frame("never");
    let source = chunks(&[b"data: [DONE]\n\n".as_slice()]).chain(stream::poll_fn(
        move |_| -> Poll<Option<Result<Vec<u8>, io::Error>>> {
            panic!("source polled after terminator: {after}")
        },
    ));
    let (deltas, err, completion) = drain(DeltaStream::new(source)).await;
    assert!(deltas.is_empty());
    assert!(err.is_none());
    assert_eq!(completion, Some(Completion::Terminator));
}

#[tokio::test]
async fn test_frames_after_terminator_in_same_chunk_are_dropped() {
    let body = format!("data: [DONE]\n\n{}", frame("late"));
    let (deltas, _, completion) = drain(DeltaStream::new(chunks(&[body.as_bytes()]))).await;
    assert!(deltas.is_empty());
    assert_eq!(completion, Some(Completion::Terminator));
}

#[tokio::test]
async fn test_source_end_without_terminator() {
    let body = format!("{}{}", frame("a"), frame("b"));
    let (deltas, err, completion) = drain(DeltaStream::new(chunks(&[body.as_bytes()]))).await;
    assert_eq!(deltas, vec!["a", "b"]);
    assert!(err.is_none());
    assert_eq!(completion, Some(Completion::SourceExhausted));
}

#[tokio::test]
async fn test_source_end_flushes_frame_missing_blank_line() {
    let (deltas, _, completion) =
        drain(DeltaStream::new(chunks(&[b"data: {\"text\":\"tail\"}".as_slice()]))).await;
    assert_eq!(deltas, vec!["tail"]);
    assert_eq!(completion, Some(Completion::SourceExhausted));
}

#[tokio::test]
async fn test_empty_source() {
    let (deltas, err, completion) = drain(DeltaStream::new(chunks(&[]))).await;
    assert!(deltas.is_empty());
    assert!(err.is_none());
    assert_eq!(completion, Some(Completion::SourceExhausted));
}

#[tokio::test]
async fn test_empty_text_is_not_a_delta() {
    let body = format!("{}data: {{\"text\":\"\"}}\n\ndata: [DONE]\n\n", frame("x"));
    let (deltas, _, _) = drain(DeltaStream::new(chunks(&[body.as_bytes()]))).await;
    assert_eq!(deltas, vec!["x"]);
}

// ---------------------------------------------------------------------------
// Malformed and error frames
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_malformed_frame_is_skipped() {
    let body = format!("{}data: {{not json\n\n{}", frame("before"), frame("after"));
    let (deltas, err, completion) = drain(DeltaStream::new(chunks(&[body.as_bytes()]))).await;
    assert_eq!(deltas, vec!["before", "after"]);
    assert!(err.is_none());
    assert_eq!(completion, Some(Completion::SourceExhausted));
}

#[tokio::test]
async fn test_error_frame_terminates_with_upstream_error() {
    let body = format!(
        "{}data: {{\"error\":\"model overloaded\"}}\n\n{}",
        frame("partial"),
        frame("unreachable")
    );
    let (deltas, err, completion) = drain(DeltaStream::new(chunks(&[body.as_bytes()]))).await;
    assert_eq!(deltas, vec!["partial"]);
    match err {
        Some(StreamError::Upstream(msg)) => assert_eq!(msg, "model overloaded"),
        other => panic!("expected upstream error, got {other:?}"),
    }
    // Errors are reported distinctly from normal completion.
    assert_eq!(completion, None);
}

#[tokio::test]
async fn test_transport_failure_is_terminal() {
    let items: Vec<Result<Vec<u8>, io::Error>> = vec![
        Ok(frame("one").into_bytes()),
        Err(io::Error::new(io::ErrorKind::ConnectionAborted, "connection dropped")),
        Ok(frame("two").into_bytes()),
    ];
    let mut deltas = DeltaStream::new(stream::iter(items));
    assert_eq!(deltas.next_delta().await.expect("ok").as_deref(), Some("one"));
    let err = deltas.next_delta().await.unwrap_err();
    assert!(matches!(err, StreamError::Transport(_)));
    assert!(err.to_string().contains("connection dropped"));
    assert!(deltas.is_finished());
    assert_eq!(deltas.next_delta().await.expect("ok"), None);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel_between_chunks_discards_buffer() {
    let token = CancellationToken::new();
    let body = format!("{}{}", frame("first"), frame("buffered"));
    let source = chunks(&[body.as_bytes()]).chain(stream::pending());
    let mut deltas = DeltaStream::new(source).with_cancellation(token.clone());

    assert_eq!(deltas.next_delta().await.expect("ok").as_deref(), Some("first"));
    token.cancel();
    assert_eq!(deltas.next_delta().await.expect("ok"), None);
    assert_eq!(deltas.completion(), Some(Completion::Cancelled));
}

#[tokio::test]
async fn test_cancel_while_waiting_for_chunk() {
    let token = CancellationToken::new();
    let source = chunks(&[frame("hi").as_bytes()]).chain(stream::pending());
    let mut deltas = DeltaStream::new(source).with_cancellation(token.clone());
    assert_eq!(deltas.next_delta().await.expect("ok").as_deref(), Some("hi"));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let next = tokio::time::timeout(Duration::from_secs(5), deltas.next_delta())
        .await
        .expect("cancel should wake the pending read");
    assert_eq!(next.expect("ok"), None);
    assert_eq!(deltas.completion(), Some(Completion::Cancelled));
}

#[tokio::test]
async fn test_cancelled_before_first_read() {
    let token = CancellationToken::new();
    token.cancel();
    let source = chunks(&[frame("never").as_bytes()]);
    let (deltas, error, completion) =
        drain(DeltaStream::new(source).with_cancellation(token)).await;
    assert!(deltas.is_empty());
    assert!(error.is_none());
    assert_eq!(completion, Some(Completion::Cancelled));
}

#[tokio::test]
async fn test_manual_cancel() {
    let mut deltas = DeltaStream::new(chunks(&[frame("x").as_bytes()]));
    deltas.cancel();
    assert_eq!(deltas.next_delta().await.expect("ok"), None);
    assert_eq!(deltas.completion(), Some(Completion::Cancelled));
}

#[tokio::test]
async fn test_uncancelled_token_lets_stream_finish() {
    let token = CancellationToken::new();
    let body = format!("{}data: [DONE]\n\n", frame("kept"));
    let source = chunks(&[body.as_bytes()]);
    let (deltas, _, completion) =
        drain(DeltaStream::new(source).with_cancellation(token.child_token())).await;
    assert_eq!(deltas, vec!["kept"]);
    assert_eq!(completion, Some(Completion::Terminator));
    assert!(!token.is_cancelled());
}

// ---------------------------------------------------------------------------
// Stream adapter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_into_stream_collects() {
    let body = format!("{}{}data: [DONE]\n\n", frame("a"), frame("b"));
    let items: Vec<Result<String, StreamError>> = DeltaStream::new(chunks(&[body.as_bytes()]))
        .into_stream()
        .collect()
        .await;
    let texts: Vec<String> = items.into_iter().map(|r| r.expect("ok")).collect();
    assert_eq!(texts, vec!["a", "b"]);
}

#[tokio::test]
async fn test_into_stream_error_is_last_item() {
    let body = format!("{}data: {{\"error\":\"nope\"}}\n\n", frame("a"));
    let items: Vec<Result<String, StreamError>> = DeltaStream::new(chunks(&[body.as_bytes()]))
        .into_stream()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert!(matches!(items[1], Err(StreamError::Upstream(_))));
}

// ---------------------------------------------------------------------------
// Chunk-boundary independence
// ---------------------------------------------------------------------------

fn split_at_points(bytes: &[u8], mut cuts: Vec<usize>) -> Vec<Vec<u8>> {
    cuts.sort_unstable();
    cuts.dedup();
    let mut parts = Vec::new();
    let mut prev = 0;
    for cut in cuts {
        parts.push(bytes[prev..cut].to_vec());
        prev = cut;
    }
    parts.push(bytes[prev..].to_vec());
    parts
}

fn run_split(parts: Vec<Vec<u8>>) -> (Vec<String>, Option<Completion>) {
    let items: Vec<Result<Vec<u8>, io::Error>> = parts.into_iter().map(Ok).collect();
    let (deltas, err, completion) =
        tokio_test::block_on(drain(DeltaStream::new(stream::iter(items))));
    assert!(err.is_none());
    (deltas, completion)
}

#[test]
fn test_every_single_split_point() {
    let bytes = SCRIPT.as_bytes();
    let whole = run_split(vec![bytes.to_vec()]);
    assert_eq!(whole.0.len(), 3);
    for cut in 0..=bytes.len() {
        assert_eq!(run_split(split_at_points(bytes, vec![cut])), whole, "cut at {cut}");
    }
}

#[test]
fn test_byte_at_a_time() {
    let bytes = SCRIPT.as_bytes();
    let parts: Vec<Vec<u8>> = bytes.iter().map(|b| vec![*b]).collect();
    assert_eq!(run_split(parts), run_split(vec![bytes.to_vec()]));
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_deltas(
        cuts in proptest::collection::vec(0usize..=SCRIPT.len(), 0..24),
    ) {
        let bytes = SCRIPT.as_bytes();
        let expected = run_split(vec![bytes.to_vec()]);
        prop_assert_eq!(run_split(split_at_points(bytes, cuts)), expected);
    }
}
