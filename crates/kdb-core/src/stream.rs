//! Chat response streaming.
//!
//! The backend answers a chat request with Server-Sent Events whose data is
//! `{"text": "<fragment>"}`, terminated by `data: [DONE]`. [`FragmentStream`]
//! turns any byte stream carrying that protocol into text fragments, and
//! [`StreamingMessage`] accumulates them and re-renders the whole message
//! after each one.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use eventsource_stream::{EventStream, Eventsource};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use crate::interrupt;
use crate::markdown;

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// The underlying byte stream failed.
    Transport,
    /// An event payload was not a text chunk.
    Parse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub message: String,
}

impl StreamError {
    pub fn new(kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StreamError {}

pub type StreamResult<T> = std::result::Result<T, StreamError>;

#[derive(Debug, Deserialize)]
struct TextChunk {
    text: String,
}

/// Decodes the chat SSE stream into text fragments, in arrival order.
pub struct FragmentStream<S> {
    inner: EventStream<S>,
    done: bool,
}

impl<S> FragmentStream<S> {
    pub fn new(stream: S) -> Self
    where
        S: Eventsource,
    {
        Self {
            inner: stream.eventsource(),
            done: false,
        }
    }

    /// Whether the `[DONE]` terminator has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn handle_event_data(&mut self, data: &str) -> StreamResult<Option<String>> {
        let trimmed = data.trim();
        if trimmed == DONE_MARKER {
            self.done = true;
            return Ok(None);
        }
        if trimmed.is_empty() {
            return Ok(None);
        }

        let chunk = serde_json::from_str::<TextChunk>(trimmed).map_err(|err| {
            StreamError::new(
                StreamErrorKind::Parse,
                format!("Failed to parse chat chunk: {err}"),
            )
        })?;
        Ok(Some(chunk.text))
    }
}

impl<S, E> Stream for FragmentStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = StreamResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }

            let inner = Pin::new(&mut self.inner);
            match inner.poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => match self.handle_event_data(&event.data) {
                    Ok(Some(fragment)) => return Poll::Ready(Some(Ok(fragment))),
                    Ok(None) => {}
                    Err(err) => return Poll::Ready(Some(Err(err))),
                },
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(StreamError::new(
                        StreamErrorKind::Transport,
                        format!("SSE stream error: {e}"),
                    ))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// How a streamed message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The server sent `[DONE]`.
    Completed,
    /// The byte stream ended without `[DONE]`.
    Truncated,
    /// Consumption stopped on request.
    Interrupted,
}

/// The buffer of one in-progress assistant message.
#[derive(Debug, Clone, Default)]
pub struct StreamingMessage {
    buffer: String,
    fragments: usize,
}

impl StreamingMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment and returns the re-rendered message.
    pub fn push(&mut self, fragment: &str) -> String {
        self.buffer.push_str(fragment);
        self.fragments += 1;
        self.html()
    }

    pub fn html(&self) -> String {
        markdown::render(&self.buffer)
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Consumes `stream` until it ends or Ctrl+C is pressed.
    ///
    /// An interrupt pending before the call stops the stream at once. The
    /// interrupt that stops a stream is consumed: the flag is cleared before
    /// returning [`StreamOutcome::Interrupted`], so the next call starts clean.
    pub async fn drive<S, F>(
        &mut self,
        stream: &mut FragmentStream<S>,
        on_update: F,
    ) -> StreamResult<StreamOutcome>
    where
        FragmentStream<S>: Stream<Item = StreamResult<String>> + Unpin,
        F: FnMut(&str),
    {
        let outcome = self
            .drive_until(stream, interrupt::wait_for_interrupt(), on_update)
            .await;
        if matches!(outcome, Ok(StreamOutcome::Interrupted)) {
            interrupt::reset();
        }
        outcome
    }

    /// Consumes `stream`, calling `on_update` with the full render after each
    /// fragment, until the stream ends, an error arrives, or `cancel` resolves.
    ///
    /// Fragments received before an error or cancellation stay in the buffer.
    pub async fn drive_until<S, C, F>(
        &mut self,
        stream: &mut FragmentStream<S>,
        cancel: C,
        mut on_update: F,
    ) -> StreamResult<StreamOutcome>
    where
        FragmentStream<S>: Stream<Item = StreamResult<String>> + Unpin,
        C: Future<Output = ()>,
        F: FnMut(&str),
    {
        tokio::pin!(cancel);

        loop {
            let next = tokio::select! {
                biased;
                () = &mut cancel => {
                    tracing::debug!(fragments = self.fragments, "stream interrupted");
                    return Ok(StreamOutcome::Interrupted);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    let html = self.push(&fragment);
                    on_update(&html);
                }
                Some(Err(err)) => {
                    tracing::warn!(kind = ?err.kind, "stream failed: {err}");
                    return Err(err);
                }
                None => {
                    let outcome = if stream.is_done() {
                        StreamOutcome::Completed
                    } else {
                        StreamOutcome::Truncated
                    };
                    tracing::debug!(fragments = self.fragments, ?outcome, "stream ended");
                    return Ok(outcome);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::future;

    use bytes::Bytes;
    use futures_util::stream;

    use super::*;

    fn sse(body: &str) -> impl Stream<Item = Result<Bytes, Infallible>> + Unpin {
        stream::iter(vec![Ok(Bytes::from(body.to_string()))])
    }

    fn chunked(parts: &[&str]) -> impl Stream<Item = Result<Bytes, Infallible>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from((*p).to_string())))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect<S>(mut stream: FragmentStream<S>) -> Vec<StreamResult<String>>
    where
        FragmentStream<S>: Stream<Item = StreamResult<String>> + Unpin,
    {
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_fragments_in_order_until_done() {
        let body = "data: {\"text\": \"# おすすめ\"}\n\n\
                    data: {\"text\": \"科目\\n\"}\n\n\
                    data: [DONE]\n\n\
                    data: {\"text\": \"ignored\"}\n\n";
        let mut fragments = FragmentStream::new(sse(body));
        let mut got = Vec::new();
        while let Some(item) = fragments.next().await {
            got.push(item.unwrap());
        }

        assert_eq!(got, vec!["# おすすめ".to_string(), "科目\n".to_string()]);
        assert!(fragments.is_done());
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let stream = FragmentStream::new(chunked(&[
            "data: {\"te",
            "xt\": \"a\"}\n",
            "\ndata: {\"text\": \"b\"}\n\ndata: [DO",
            "NE]\n\n",
        ]));
        let got: Vec<_> = collect(stream)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(got, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_parse_error() {
        let items = collect(FragmentStream::new(sse("data: {\"nope\": 1}\n\n"))).await;
        assert_eq!(items.len(), 1);
        let err = items[0].clone().unwrap_err();
        assert_eq!(err.kind, StreamErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_missing_done_ends_cleanly() {
        let mut stream = FragmentStream::new(sse("data: {\"text\": \"partial\"}\n\n"));
        assert_eq!(stream.next().await.unwrap().unwrap(), "partial");
        assert!(stream.next().await.is_none());
        assert!(!stream.is_done());
    }

    #[test]
    fn test_push_rerenders_whole_buffer() {
        let mut message = StreamingMessage::new();
        assert!(message.is_empty());

        assert_eq!(message.push("#"), "#");
        assert_eq!(message.push(" Ti"), "<h2>Ti</h2>");
        assert_eq!(message.push("tle\n**b"), "<h2>Title</h2><br>**b");
        assert_eq!(message.push("**"), "<h2>Title</h2><br><strong>b</strong>");

        assert_eq!(message.text(), "# Title\n**b**");
        assert_eq!(message.fragment_count(), 4);
    }

    #[tokio::test]
    async fn test_drive_until_completed() {
        let body = "data: {\"text\": \"- a\\n\"}\n\ndata: {\"text\": \"- b\"}\n\ndata: [DONE]\n\n";
        let mut fragments = FragmentStream::new(sse(body));
        let mut message = StreamingMessage::new();
        let mut renders = Vec::new();

        let outcome = message
            .drive_until(&mut fragments, future::pending(), |html| {
                renders.push(html.to_string());
            })
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(
            renders,
            vec![
                "<li>a</li><br>".to_string(),
                "<li>a</li><br><li>b</li>".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_drive_until_truncated() {
        let mut fragments = FragmentStream::new(sse("data: {\"text\": \"<details>\\nx\"}\n\n"));
        let mut message = StreamingMessage::new();

        let outcome = message
            .drive_until(&mut fragments, future::pending(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Truncated);
        assert_eq!(message.html(), "<details><br>x");
    }

    #[tokio::test]
    async fn test_drive_until_cancelled_before_first_fragment() {
        let mut fragments = FragmentStream::new(sse("data: {\"text\": \"a\"}\n\n"));
        let mut message = StreamingMessage::new();

        let outcome = message
            .drive_until(&mut fragments, future::ready(()), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Interrupted);
        assert!(message.is_empty());
    }

    #[tokio::test]
    async fn test_drive_until_keeps_fragments_before_error() {
        let body = "data: {\"text\": \"ok\"}\n\ndata: not json\n\n";
        let mut fragments = FragmentStream::new(sse(body));
        let mut message = StreamingMessage::new();

        let err = message
            .drive_until(&mut fragments, future::pending(), |_| {})
            .await
            .unwrap_err();

        assert_eq!(err.kind, StreamErrorKind::Parse);
        assert_eq!(message.text(), "ok");
    }

    #[derive(Debug)]
    struct ConnectionReset;

    impl fmt::Display for ConnectionReset {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "connection reset")
        }
    }

    impl std::error::Error for ConnectionReset {}

    #[tokio::test]
    async fn test_transport_error_keeps_earlier_fragments() {
        let parts: Vec<Result<Bytes, ConnectionReset>> = vec![
            Ok(Bytes::from_static(b"data: {\"text\": \"a\"}\n\n")),
            Err(ConnectionReset),
        ];
        let mut fragments = FragmentStream::new(stream::iter(parts));
        let mut message = StreamingMessage::new();

        let err = message
            .drive_until(&mut fragments, future::pending(), |_| {})
            .await
            .unwrap_err();

        assert_eq!(err.kind, StreamErrorKind::Transport);
        assert!(err.message.contains("connection reset"));
        assert_eq!(message.text(), "a");
    }

    #[tokio::test]
    async fn test_empty_payload_is_skipped() {
        let body = "data:\n\ndata: {\"text\": \"a\"}\n\ndata: [DONE]\n\n";
        let got: Vec<_> = collect(FragmentStream::new(sse(body)))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(got, vec!["a"]);
    }

    #[tokio::test]
    async fn test_drive_stops_on_pending_interrupt_and_clears_it() {
        let _guard = interrupt::TEST_LOCK.lock().await;
        let body = "data: {\"text\": \"a\"}\n\ndata: [DONE]\n\n";
        let mut fragments = FragmentStream::new(sse(body));
        let mut message = StreamingMessage::new();

        interrupt::trigger();
        let outcome = message.drive(&mut fragments, |_| {}).await.unwrap();

        assert_eq!(outcome, StreamOutcome::Interrupted);
        assert!(message.is_empty());
        assert!(!interrupt::is_interrupted());

        let outcome = message.drive(&mut fragments, |_| {}).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(message.text(), "a");
        interrupt::reset();
    }
}
