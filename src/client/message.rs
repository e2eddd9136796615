use chrono::{ DateTime, Utc };
use log::{ debug, warn };
use serde::{ Deserialize, Serialize };
use uuid::Uuid;

use crate::models::stream::SsePayload;
use crate::stream::lines::LineBuffer;
use crate::stream::sse::DONE_SENTINEL;

/// Shown in place of partial output when a conversion fails.
pub const FAILURE_TEXT: &str = "Conversion failed, please retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Loading,
    Updating,
    Success,
    Error,
    Abort,
}

impl MessageStatus {
    pub fn is_final(self) -> bool {
        matches!(self, MessageStatus::Success | MessageStatus::Error | MessageStatus::Abort)
    }
}

/// One entry of the conversation view, rebuilt incrementally from the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub reasoning_content: String,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: MessageRole, content: String, status: MessageStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            reasoning_content: String::new(),
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into(), MessageStatus::Success)
    }

    /// An empty assistant reply waiting for its first byte.
    pub fn assistant() -> Self {
        Self::new(MessageRole::Assistant, String::new(), MessageStatus::Loading)
    }

    pub fn begin_streaming(&mut self) {
        if self.status == MessageStatus::Loading {
            self.status = MessageStatus::Updating;
        }
    }

    pub fn complete(&mut self) {
        if !self.status.is_final() {
            self.status = MessageStatus::Success;
        }
    }

    pub fn fail(&mut self) {
        if !self.status.is_final() {
            self.content = FAILURE_TEXT.to_string();
            self.status = MessageStatus::Error;
        }
    }

    /// Keeps whatever content arrived before the abort.
    pub fn abort(&mut self) {
        if !self.status.is_final() {
            self.status = MessageStatus::Abort;
        }
    }

    fn apply(&mut self, payload: SsePayload) {
        if self.status.is_final() {
            return;
        }
        if let Some(reasoning) = payload.reasoning_content {
            self.reasoning_content.push_str(&reasoning);
        }
        if let Some(content) = payload.content {
            self.content.push_str(&content);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldProgress {
    Continue,
    Finished,
}

/// Folds raw SSE body chunks into an assistant [`Message`].
#[derive(Debug, Default)]
pub struct StreamFold {
    lines: LineBuffer,
    finished: bool,
}

impl StreamFold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, message: &mut Message, chunk: &[u8]) -> FoldProgress {
        if self.finished {
            return FoldProgress::Finished;
        }
        if !chunk.is_empty() {
            message.begin_streaming();
        }
        for line in self.lines.push(chunk) {
            self.apply_line(message, &line);
            if self.finished {
                return FoldProgress::Finished;
            }
        }
        FoldProgress::Continue
    }

    /// Called at end of body. A stream that closes before `[DONE]` or an
    /// error payload counts as a failure.
    pub fn finish(&mut self, message: &mut Message) {
        if !self.finished {
            if let Some(line) = self.lines.finish() {
                self.apply_line(message, &line);
            }
        }
        if !self.finished {
            warn!("Stream for message {} ended without a terminal event", message.id);
            message.fail();
            self.finished = true;
        }
    }

    fn apply_line(&mut self, message: &mut Message, line: &str) {
        let data = match line.trim().strip_prefix("data:") {
            Some(data) => data.trim(),
            None => return,
        };

        if data == DONE_SENTINEL {
            message.complete();
            self.finished = true;
            return;
        }

        match serde_json::from_str::<SsePayload>(data) {
            Ok(SsePayload { error: Some(error), .. }) => {
                warn!("Conversion failed: {}", error);
                message.fail();
                self.finished = true;
            }
            Ok(payload) => {
                debug!("Delta for message {}: {:?}", message.id, payload);
                message.apply(payload);
            }
            Err(e) => warn!("Skipping malformed stream payload '{}': {}", data, e),
        }
    }
}
