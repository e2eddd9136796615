use axum::http::header::CONNECTION;
use axum::response::sse::{ Event, Sse };
use axum::response::{ IntoResponse, Response };
use futures::stream::{ BoxStream, Stream, StreamExt };
use log::info;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{ Context, Poll };
use uuid::Uuid;

use crate::models::stream::{ SsePayload, StreamEvent };
use crate::session::{ AbortHandle, ConversionSession };

pub const DONE_SENTINEL: &str = "[DONE]";

/// The `data:` payload for an event, or `None` for an abort, which closes the
/// transport without writing anything.
pub fn encode_event(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::Delta(delta) => serde_json::to_string(&SsePayload::from(delta)).ok(),
        StreamEvent::Error(message) => serde_json::to_string(&SsePayload::failure(message.as_str())).ok(),
        StreamEvent::Done => Some(DONE_SENTINEL.to_string()),
        StreamEvent::Aborted => None,
    }
}

/// Serializes one session's events as SSE frames.
///
/// The body ends right after the first terminal frame. When the transport
/// drops the body before that, the encoder is dropped early and aborts the
/// session, which releases the upstream call.
pub struct SseEncoder {
    session_id: Uuid,
    events: BoxStream<'static, StreamEvent>,
    abort: AbortHandle,
    finished: bool,
}

impl SseEncoder {
    pub fn new(session: &ConversionSession) -> Self {
        Self {
            session_id: session.id(),
            events: session.subscribe(),
            abort: session.abort_handle(),
            finished: false,
        }
    }

    pub fn into_response(self) -> Response {
        ([(CONNECTION, "keep-alive")], Sse::new(self)).into_response()
    }
}

impl Stream for SseEncoder {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let event = match this.events.poll_next_unpin(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Some(event)) => event,
            Poll::Ready(None) => {
                this.finished = true;
                return Poll::Ready(None);
            }
        };

        if event.is_terminal() {
            this.finished = true;
            info!("Session {} finished with {:?}", this.session_id, event);
        }

        match encode_event(&event) {
            Some(data) => Poll::Ready(Some(Ok(Event::default().data(data)))),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for SseEncoder {
    fn drop(&mut self) {
        if !self.finished && self.abort.abort() {
            info!("Client disconnected from session {}, upstream cancelled", self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversion::ConversionRequest;
    use crate::models::stream::Delta;
    use crate::session::SessionState;
    use crate::testing::{ registry, ScriptedClient, Step };
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn started(client: &ScriptedClient) -> ConversionSession {
        let mut session = ConversionSession::new(ConversionRequest {
            source_role: "product-manager".into(),
            target_role: "developer".into(),
            content: "X".into(),
        });
        session.start(&registry(), client).unwrap();
        session
    }

    #[test]
    fn encodes_each_event_kind() {
        assert_eq!(
            encode_event(&StreamEvent::Delta(Delta::content("视角"))).as_deref(),
            Some(r#"{"content":"视角"}"#)
        );
        assert_eq!(
            encode_event(&StreamEvent::Delta(Delta::reasoning("r"))).as_deref(),
            Some(r#"{"reasoning_content":"r"}"#)
        );
        assert_eq!(encode_event(&StreamEvent::Error("boom".into())).as_deref(), Some(r#"{"error":"boom"}"#));
        assert_eq!(encode_event(&StreamEvent::Done).as_deref(), Some("[DONE]"));
        assert_eq!(encode_event(&StreamEvent::Aborted), None);
    }

    #[tokio::test]
    async fn yields_one_frame_per_event_then_ends() {
        let client = ScriptedClient::emitting(&["从", "技术", "视角", "来看"]);
        let session = started(&client);

        let frames: Vec<_> = SseEncoder::new(&session).collect().await;
        assert_eq!(frames.len(), 5);
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(client.cancels(), 0);
    }

    #[tokio::test]
    async fn dropping_mid_stream_cancels_upstream_exactly_once() {
        let gate = Arc::new(Notify::new());
        let client = ScriptedClient::new(vec![
            Step::Emit(Delta::content("从")),
            Step::Emit(Delta::content("技术")),
            Step::Wait(gate.clone()),
            Step::Emit(Delta::content("视角")),
            Step::Emit(Delta::content("来看")),
        ]);
        let session = started(&client);

        let mut encoder = SseEncoder::new(&session);
        assert!(encoder.next().await.is_some());
        assert!(encoder.next().await.is_some());
        drop(encoder);

        client.wait_for_cancels(1).await;
        assert_eq!(session.state(), SessionState::Aborted);
        // The explicit-cancel path converges on the same latch.
        assert!(!session.cancel());

        gate.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(client.cancels(), 1);
        assert_eq!(session.subscribe().count().await, 3);
    }

    #[tokio::test]
    async fn explicit_cancel_ends_body_without_a_frame() {
        let client = ScriptedClient::new(vec![Step::Emit(Delta::content("a")), Step::Hang]);
        let session = started(&client);

        let mut encoder = SseEncoder::new(&session);
        assert!(encoder.next().await.is_some());
        assert!(session.cancel());
        assert!(encoder.next().await.is_none());
        assert!(encoder.next().await.is_none());
        drop(encoder);

        client.wait_for_cancels(1).await;
        assert_eq!(client.cancels(), 1);
    }

    #[tokio::test]
    async fn dropping_after_terminal_does_not_abort() {
        let client = ScriptedClient::emitting(&["a"]);
        let session = started(&client);

        let mut encoder = SseEncoder::new(&session);
        while encoder.next().await.is_some() {}
        drop(encoder);

        assert_eq!(session.state(), SessionState::Completed);
    }
}
