pub mod message;

use futures::StreamExt;
use log::{ info, warn };
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::conversion::ConversionRequest;
use message::{ FoldProgress, Message, MessageRole, StreamFold };

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("content to convert must not be empty")]
    EmptyContent,
    #[error("source and target roles must differ")]
    SameRole,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },
    #[error("no assistant message with id {0}")]
    UnknownMessage(String),
}

/// Consumes the relay's perspective-conversion stream over HTTP.
#[derive(Clone)]
pub struct PerspectiveClient {
    http: reqwest::Client,
    base_url: String,
}

impl PerspectiveClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/llm/perspective-convert", self.base_url.trim_end_matches('/'))
    }

    /// Streams one conversion into `message`, calling `on_update` after every
    /// change. Firing `cancel` drops the response, which the server sees as a
    /// disconnect, and leaves the message in `abort` with its partial content.
    pub async fn stream_into<F>(
        &self,
        request: &ConversionRequest,
        message: &mut Message,
        cancel: &CancellationToken,
        mut on_update: F
    ) -> Result<(), ClientError>
        where F: FnMut(&Message)
    {
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                message.abort();
                on_update(message);
                return Ok(());
            }
            sent = self.http.post(self.endpoint()).json(request).send() => sent,
        };

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                message.fail();
                on_update(message);
                return Err(e.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Conversion rejected with {}: {}", status, body);
            message.fail();
            on_update(message);
            return Err(ClientError::Status { status: status.as_u16(), body });
        }

        let mut body = response.bytes_stream();
        let mut fold = StreamFold::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Conversion {} cancelled by user", message.id);
                    message.abort();
                    on_update(message);
                    return Ok(());
                }
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        let progress = fold.feed(message, &bytes);
                        on_update(message);
                        if progress == FoldProgress::Finished {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => {
                        message.fail();
                        on_update(message);
                        return Err(e.into());
                    }
                    None => {
                        fold.finish(message);
                        on_update(message);
                        return Ok(());
                    }
                },
            }
        }
    }
}

/// The ordered message list behind a conversion chat view.
pub struct Conversation {
    client: PerspectiveClient,
    role_names: HashMap<String, String>,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(client: PerspectiveClient, role_names: HashMap<String, String>) -> Self {
        Self { client, role_names, messages: Vec::new() }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn role_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.role_names.get(id).map(String::as_str).unwrap_or(id)
    }

    fn label(&self, source: &str, target: &str, content: &str) -> String {
        format!("[{} → {}] {}", self.role_name(source), self.role_name(target), content)
    }

    /// Appends the labelled user message and an assistant reply, then streams into the reply.
    pub async fn send<F>(
        &mut self,
        source: &str,
        target: &str,
        content: &str,
        cancel: &CancellationToken,
        on_update: F
    ) -> Result<&Message, ClientError>
        where F: FnMut(&Message)
    {
        if content.trim().is_empty() {
            return Err(ClientError::EmptyContent);
        }
        if source == target {
            return Err(ClientError::SameRole);
        }

        let request = ConversionRequest {
            source_role: source.to_string(),
            target_role: target.to_string(),
            content: content.to_string(),
        };
        let label = self.label(source, target, content);
        self.messages.push(Message::user(label));
        self.messages.push(Message::assistant());

        let index = self.messages.len() - 1;
        let reply = &mut self.messages[index];
        self.client.stream_into(&request, reply, cancel, on_update).await?;
        Ok(&self.messages[index])
    }

    /// Drops `assistant_id` and everything after it, then resends the user
    /// message that prompted it.
    pub async fn regenerate<F>(
        &mut self,
        assistant_id: &str,
        source: &str,
        target: &str,
        cancel: &CancellationToken,
        on_update: F
    ) -> Result<&Message, ClientError>
        where F: FnMut(&Message)
    {
        let index = self.messages
            .iter()
            .position(|m| m.id == assistant_id && m.role == MessageRole::Assistant)
            .filter(|index| *index > 0)
            .ok_or_else(|| ClientError::UnknownMessage(assistant_id.to_string()))?;

        let prompt = &self.messages[index - 1].content;
        let content = match prompt.split_once("] ") {
            Some((label, rest)) if label.starts_with('[') => rest.to_string(),
            _ => prompt.clone(),
        };

        self.messages.truncate(index - 1);
        self.send(source, target, &content, cancel, on_update).await
    }
}
