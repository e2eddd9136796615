use serde::{ Deserialize, Serialize };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    Content,
    Reasoning,
}

/// An incremental fragment of model output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta {
    pub text: String,
    pub kind: DeltaKind,
}

impl Delta {
    pub fn content(text: impl Into<String>) -> Self {
        Self { text: text.into(), kind: DeltaKind::Content }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self { text: text.into(), kind: DeltaKind::Reasoning }
    }
}

/// Events recorded in a session's replay log.
///
/// `Done`, `Error` and `Aborted` are terminal; a log holds at most one of them
/// and nothing after it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(Delta),
    Error(String),
    Done,
    Aborted,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Delta(_))
    }
}

/// JSON body of a `data:` line.
///
/// A delta sets exactly one of `content`/`reasoning_content`; a failure sets `error`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct SsePayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl From<&Delta> for SsePayload {
    fn from(delta: &Delta) -> Self {
        match delta.kind {
            DeltaKind::Content => SsePayload { content: Some(delta.text.clone()), ..Default::default() },
            DeltaKind::Reasoning =>
                SsePayload { reasoning_content: Some(delta.text.clone()), ..Default::default() },
        }
    }
}

impl SsePayload {
    pub fn failure(message: impl Into<String>) -> Self {
        SsePayload { error: Some(message.into()), ..Default::default() }
    }
}
