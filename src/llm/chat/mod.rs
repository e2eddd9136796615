pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use futures::{ Future, Stream, StreamExt };
use serde::Deserialize;
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use super::{ LlmConfig, LlmType };
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use crate::models::chat::ChatMessage;
use crate::models::stream::Delta;
use crate::stream::lines::LineBuffer;
use log::{ debug, info };
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

pub type BoxError = Box<dyn StdError + Send + Sync>;

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta, BoxError>> + Send>>;

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

/// Single-fire cancellation latch for one upstream call.
///
/// Clones share the latch. Only the first `cancel` returns `true`; later calls,
/// including calls after the upstream finished, do nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// A started completion: the lazy delta sequence plus the handle that stops it.
///
/// Backend failures arrive as an `Err` item on `deltas`, never from `start`.
pub struct CompletionStream {
    pub deltas: DeltaStream,
    pub cancel: CancelHandle,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse, BoxError>;

    /// Opens a streaming completion. Must be called from within a Tokio runtime.
    fn start(&self, messages: Vec<ChatMessage>) -> CompletionStream;

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;
}

/// Runs `response_fn` on its own task, feeding a bounded channel.
///
/// Cancelling the returned handle drops the in-flight future, which closes the
/// upstream connection and ends the delta sequence.
pub fn create_streaming_response<F, Fut>(response_fn: F) -> CompletionStream
where
    F: FnOnce(mpsc::Sender<Result<Delta, BoxError>>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);
    let cancel = CancelHandle::new();
    let token = cancel.token.clone();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Upstream completion cancelled");
            }
            _ = response_fn(tx) => {}
        }
    });

    CompletionStream {
        deltas: Box::pin(ReceiverStream::new(rx)),
        cancel,
    }
}

/// What one line of a provider's streaming body means.
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedLine {
    Deltas(Vec<Delta>),
    Finished,
    Ignored,
}

pub type LineParser = fn(&str) -> Result<ParsedLine, BoxError>;

pub fn http_stream_deltas(request: reqwest::RequestBuilder, line_parser: LineParser) -> CompletionStream {
    create_streaming_response(move |tx| async move {
        let resp = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(Err(Box::new(e) as _)).await;
                return;
            }
        };

        if let Err(e) = resp.error_for_status_ref() {
            let _ = tx.send(Err(Box::new(e) as _)).await;
            return;
        }

        let mut lines = LineBuffer::new();
        let mut bytes = resp.bytes_stream();

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(buf) => {
                    for line in lines.push(&buf) {
                        if !forward_line(&line, line_parser, &tx).await {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(Box::new(e) as _)).await;
                    return;
                }
            }
        }

        if let Some(line) = lines.finish() {
            forward_line(&line, line_parser, &tx).await;
        }
    })
}

// Returns false once the sequence is over: finished, failed, or nobody listening.
async fn forward_line(
    line: &str,
    line_parser: LineParser,
    tx: &mpsc::Sender<Result<Delta, BoxError>>
) -> bool {
    match line_parser(line) {
        Ok(ParsedLine::Deltas(deltas)) => {
            for delta in deltas {
                if tx.send(Ok(delta)).await.is_err() {
                    return false;
                }
            }
            true
        }
        Ok(ParsedLine::Ignored) => true,
        Ok(ParsedLine::Finished) => false,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, BoxError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::OpenAI | LlmType::DeepSeek => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    info!(
        "Chat client configured: Type={}, Model={}, BaseURL={}",
        config.llm_type,
        client.get_model(),
        client.get_base_url().as_deref().unwrap_or("default")
    );
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_fires_once() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        assert!(clone.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn streaming_response_forwards_items_in_order() {
        let mut completion = create_streaming_response(|tx| async move {
            for text in ["a", "b", "c"] {
                let _ = tx.send(Ok(Delta::content(text))).await;
            }
        });

        let mut seen = Vec::new();
        while let Some(item) = completion.deltas.next().await {
            seen.push(item.unwrap().text);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cancel_ends_a_pending_sequence() {
        let mut completion = create_streaming_response(|tx| async move {
            let _ = tx.send(Ok(Delta::content("first"))).await;
            futures::future::pending::<()>().await;
        });

        let first = completion.deltas.next().await.unwrap().unwrap();
        assert_eq!(first.text, "first");

        assert!(completion.cancel.cancel());
        let end = tokio::time::timeout(Duration::from_secs(1), completion.deltas.next()).await;
        assert!(matches!(end, Ok(None)));
    }

    #[tokio::test]
    async fn http_failure_surfaces_on_the_sequence() {
        let request = reqwest::Client::new().post("http://127.0.0.1:1/unreachable");
        let mut completion = http_stream_deltas(request, |_| Ok(ParsedLine::Ignored));

        let item = completion.deltas.next().await.expect("an error item");
        assert!(item.is_err());
        assert!(completion.deltas.next().await.is_none());
    }
}
