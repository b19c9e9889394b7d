//! Background report generation: the fetch+parse loop in its own task.
//!
//! [`start_report`] spawns a dedicated tokio task that issues the
//! streaming completion request through the resilient client, feeds the
//! response body through the [`SseParser`], and forwards
//! [`StreamEvent`]s over a channel. [`ReportStream`] is the consumer end:
//! a `futures::Stream` that always terminates with `Done` or `Error`.
//! If the task dies without sending a terminal event, the stream
//! synthesizes one `Error` rather than truncating silently.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::ApiClient;
use crate::net::sse::{SseParser, StreamEvent};
use crate::net::tracker::generate_request_id;
use crate::net::{FetchError, ResilientClient};
use crate::prompt::{ReportSubject, report_prompt};

/// Channel depth between the generation task and the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Start generating a report for `subject`.
///
/// The returned stream yields `Delta` events as content arrives, then
/// exactly one terminal `Done` or `Error`. Dropping the stream without
/// cancelling leaves the task running until its next send fails.
pub fn start_report(
    client: ResilientClient,
    api: ApiClient,
    subject: ReportSubject,
) -> Result<ReportStream, FetchError> {
    let prompt = report_prompt(&subject);
    let (url, options) = api
        .completion_request(&prompt)
        .map_err(FetchError::Transport)?;

    let request_id = generate_request_id();
    let tracker = client.tracker().clone();
    tracker.register(&url, options, Some(request_id.clone()));
    // Token clone outlives the tracker entry: success deregisters the
    // entry while the body is still streaming, and cancellation must
    // still reach the read loop.
    let cancel = tracker
        .cancel_token(&request_id)
        .unwrap_or_default();

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let task_cancel = cancel.clone();
    let task_id = request_id.clone();
    tokio::spawn(async move {
        run_generation(client, task_id, task_cancel, tx).await;
    });

    Ok(ReportStream {
        rx,
        request_id,
        cancel,
        tracker,
        terminated: false,
    })
}

/// The fetch+parse loop. Sends events until a terminal one; sends nothing
/// further after cancellation.
async fn run_generation(
    client: ResilientClient,
    request_id: String,
    cancel: crate::net::CancelToken,
    tx: mpsc::Sender<StreamEvent>,
) {
    debug!("report task {request_id} starting");

    let mut response = match client.execute_registered(&request_id).await {
        Ok(response) => response,
        Err(FetchError::Cancelled) => {
            info!("report task {request_id} cancelled before response");
            return;
        }
        Err(e) => {
            error!("report task {request_id} failed: {e}");
            let _ = tx.send(StreamEvent::Error(e.to_string())).await;
            return;
        }
    };

    let mut parser = SseParser::new();
    loop {
        // Race the body read against cancellation so a stalled stream
        // cannot pin a cancelled task.
        let chunk = tokio::select! {
            chunk = response.chunk() => chunk,
            _ = cancel.cancelled() => {
                info!("report task {request_id} cancelled mid-stream");
                return;
            }
        };
        match chunk {
            Ok(Some(chunk)) => {
                for event in parser.feed(&chunk) {
                    if tx.send(event).await.is_err() {
                        // Consumer went away; nothing left to do.
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                if !cancel.is_cancelled() {
                    let _ = tx
                        .send(StreamEvent::Error(format!("stream read failed: {e}")))
                        .await;
                }
                return;
            }
        }
    }

    for event in parser.finish() {
        if tx.send(event).await.is_err() {
            return;
        }
    }
    debug!("report task {request_id} complete");
    let _ = tx.send(StreamEvent::Done).await;
}

/// Consumer end of a running report generation.
///
/// Yields `Delta` events then one terminal `Done`/`Error` and ends.
pub struct ReportStream {
    rx: mpsc::Receiver<StreamEvent>,
    request_id: String,
    cancel: crate::net::CancelToken,
    tracker: crate::net::RequestTracker,
    terminated: bool,
}

impl ReportStream {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Abort the in-flight network operation and deregister the request.
    /// No further events are delivered, and no later resume signal can
    /// re-execute the request.
    pub fn cancel(&self) {
        info!("cancelling report request {}", self.request_id);
        self.cancel.cancel();
        self.tracker.deregister(&self.request_id);
    }
}

impl Stream for ReportStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if matches!(event, StreamEvent::Done | StreamEvent::Error(_)) {
                    self.terminated = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                if self.cancel.is_cancelled() {
                    // Cancellation produces no further events.
                    return Poll::Ready(None);
                }
                // The task ended without a terminal event: a fault in the
                // generation task. Surface it instead of truncating.
                self.terminated = true;
                Poll::Ready(Some(StreamEvent::Error(
                    "report task terminated unexpectedly".to_string(),
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn stream_with_channel() -> (mpsc::Sender<StreamEvent>, ReportStream) {
        let (tx, rx) = mpsc::channel(8);
        let stream = ReportStream {
            rx,
            request_id: "req-test".into(),
            cancel: crate::net::CancelToken::new(),
            tracker: crate::net::RequestTracker::new(),
            terminated: false,
        };
        (tx, stream)
    }

    #[tokio::test]
    async fn deltas_then_done_then_end() {
        let (tx, mut stream) = stream_with_channel();
        tx.send(StreamEvent::Delta("a".into())).await.unwrap();
        tx.send(StreamEvent::Done).await.unwrap();
        drop(tx);

        assert_eq!(stream.next().await, Some(StreamEvent::Delta("a".into())));
        assert_eq!(stream.next().await, Some(StreamEvent::Done));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn task_fault_surfaces_as_error_not_truncation() {
        let (tx, mut stream) = stream_with_channel();
        tx.send(StreamEvent::Delta("partial".into())).await.unwrap();
        // Channel closes with no terminal event, as if the task panicked.
        drop(tx);

        assert_eq!(
            stream.next().await,
            Some(StreamEvent::Delta("partial".into()))
        );
        match stream.next().await {
            Some(StreamEvent::Error(msg)) => assert!(msg.contains("unexpectedly")),
            other => panic!("expected synthesized error, got {other:?}"),
        }
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn cancelled_stream_ends_without_synthetic_error() {
        let (tx, mut stream) = stream_with_channel();
        stream.cancel();
        drop(tx);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn events_arrive_in_send_order() {
        let (tx, mut stream) = stream_with_channel();
        for text in ["one", "two", "three"] {
            tx.send(StreamEvent::Delta(text.into())).await.unwrap();
        }
        tx.send(StreamEvent::Done).await.unwrap();

        let mut got = Vec::new();
        while let Some(event) = stream.next().await {
            got.push(event);
        }
        assert_eq!(
            got,
            vec![
                StreamEvent::Delta("one".into()),
                StreamEvent::Delta("two".into()),
                StreamEvent::Delta("three".into()),
                StreamEvent::Done,
            ]
        );
    }
}
