use futures::stream::{ self, BoxStream, StreamExt };
use log::{ info, warn };
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::config::roles::{ RoleConfig, RoleError, RoleRegistry };
use crate::llm::chat::ChatClient;
use crate::models::conversion::ConversionRequest;
use crate::models::stream::StreamEvent;
use crate::prompt::build_prompt;
use crate::stream::bridge::StreamBridge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Streaming,
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSide {
    Source,
    Target,
}

impl fmt::Display for RoleSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleSide::Source => write!(f, "source"),
            RoleSide::Target => write!(f, "target"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("role configuration not found")]
    ConfigurationMissing,
    #[error("{side} role \"{id}\" does not exist")]
    RoleNotFound {
        side: RoleSide,
        id: String,
    },
    #[error("session already started")]
    AlreadyStarted,
}

impl SessionError {
    fn from_role(err: RoleError, side: RoleSide) -> Self {
        match err {
            RoleError::ConfigurationMissing => SessionError::ConfigurationMissing,
            RoleError::NotFound(id) => SessionError::RoleNotFound { side, id },
        }
    }
}

/// Releases a session's upstream call. Safe to fire from any number of
/// places; only the first effective call does anything.
#[derive(Clone)]
pub struct AbortHandle {
    bridge: Option<StreamBridge>,
}

impl AbortHandle {
    pub fn abort(&self) -> bool {
        self.bridge.as_ref().map(StreamBridge::abort).unwrap_or(false)
    }
}

/// One perspective conversion, from request arrival to terminal state.
pub struct ConversionSession {
    id: Uuid,
    request: ConversionRequest,
    phase: SessionState,
    bridge: Option<StreamBridge>,
}

impl ConversionSession {
    pub fn new(request: ConversionRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            phase: SessionState::Created,
            bridge: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Resolves both roles, builds the prompt and opens the upstream stream.
    ///
    /// On failure no upstream call is made; the error is still recorded as the
    /// session's single terminal event so a subscriber reports it.
    pub fn start(
        &mut self,
        registry: &RoleRegistry,
        client: &dyn ChatClient
    ) -> Result<(), SessionError> {
        if self.phase != SessionState::Created {
            return Err(SessionError::AlreadyStarted);
        }

        match self.resolve_roles(registry) {
            Ok((source, target)) => {
                info!(
                    "Session {}: converting perspective from {} to {}",
                    self.id,
                    source.display_name,
                    target.display_name
                );
                let prompt = build_prompt(source, target, &self.request.content);
                let completion = client.start(prompt.into_messages());
                self.bridge = Some(StreamBridge::spawn(completion));
                self.phase = SessionState::Streaming;
                Ok(())
            }
            Err(e) => {
                warn!("Session {}: {}", self.id, e);
                self.bridge = Some(StreamBridge::closed_with(StreamEvent::Error(e.to_string())));
                self.phase = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn resolve_roles<'a>(
        &self,
        registry: &'a RoleRegistry
    ) -> Result<(&'a RoleConfig, &'a RoleConfig), SessionError> {
        let source = registry
            .resolve(&self.request.source_role)
            .map_err(|e| SessionError::from_role(e, RoleSide::Source))?;
        let target = registry
            .resolve(&self.request.target_role)
            .map_err(|e| SessionError::from_role(e, RoleSide::Target))?;
        Ok((source, target))
    }

    pub fn state(&self) -> SessionState {
        match self.bridge.as_ref().and_then(StreamBridge::terminal) {
            Some(StreamEvent::Done) => SessionState::Completed,
            Some(StreamEvent::Error(_)) => SessionState::Failed,
            Some(StreamEvent::Aborted) => SessionState::Aborted,
            _ => self.phase,
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle { bridge: self.bridge.clone() }
    }

    /// Explicit cancellation; converges with disconnect handling on the same latch.
    pub fn cancel(&self) -> bool {
        self.abort_handle().abort()
    }

    /// The session's event stream. Empty for a session that was never started.
    pub fn subscribe(&self) -> BoxStream<'static, StreamEvent> {
        match &self.bridge {
            Some(bridge) => bridge.subscribe(),
            None => stream::empty().boxed(),
        }
    }

    /// Waits for the terminal state. Returns `Created` for a session that was
    /// never started.
    pub async fn finished(&self) -> SessionState {
        if let Some(bridge) = &self.bridge {
            bridge.wait_terminal().await;
        }
        self.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::roles::RoleRegistry;
    use crate::models::chat::ChatRole;
    use crate::models::stream::Delta;
    use crate::testing::{ registry, ScriptedClient, Step };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn request(source: &str, target: &str, content: &str) -> ConversionRequest {
        ConversionRequest {
            source_role: source.to_string(),
            target_role: target.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn completes_after_upstream_done() {
        let client = ScriptedClient::emitting(&["从", "技术", "视角", "来看"]);
        let mut session = ConversionSession::new(request("product-manager", "developer", "X"));
        assert_eq!(session.state(), SessionState::Created);

        session.start(&registry(), &client).unwrap();
        assert_eq!(client.starts(), 1);

        let events: Vec<_> = session.subscribe().collect().await;
        assert_eq!(events.len(), 5);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(session.finished().await, SessionState::Completed);
    }

    #[tokio::test]
    async fn prompt_reaches_upstream_as_system_and_user() {
        let client = ScriptedClient::emitting(&[]);
        let mut session = ConversionSession::new(request("product-manager", "developer", "多行\n内容"));
        session.start(&registry(), &client).unwrap();

        let messages = client.last_messages().unwrap();
        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.contains("产品经理"));
        assert!(messages[0].content.contains("研发"));
        assert_eq!(messages[1].role, ChatRole::User);
        assert!(messages[1].content.contains("多行\n内容"));
    }

    #[tokio::test]
    async fn unknown_source_fails_without_upstream_call() {
        let client = ScriptedClient::emitting(&["never"]);
        let mut session = ConversionSession::new(request("invalid", "developer", "X"));

        let err = session.start(&registry(), &client).unwrap_err();
        assert_eq!(err, SessionError::RoleNotFound { side: RoleSide::Source, id: "invalid".into() });
        assert_eq!(err.to_string(), "source role \"invalid\" does not exist");
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(client.starts(), 0);
    }

    #[tokio::test]
    async fn unknown_target_names_the_target_side() {
        let client = ScriptedClient::emitting(&[]);
        let mut session = ConversionSession::new(request("developer", "nobody", "X"));
        let err = session.start(&registry(), &client).unwrap_err();
        assert_eq!(err, SessionError::RoleNotFound { side: RoleSide::Target, id: "nobody".into() });
    }

    #[tokio::test]
    async fn missing_configuration_becomes_terminal_error_event() {
        let client = ScriptedClient::emitting(&["never"]);
        let mut session = ConversionSession::new(request("developer", "manager", "X"));

        let err = session.start(&RoleRegistry::new(None), &client).unwrap_err();
        assert_eq!(err, SessionError::ConfigurationMissing);

        let events: Vec<_> = session.subscribe().collect().await;
        assert_eq!(events, vec![StreamEvent::Error("role configuration not found".into())]);
        assert_eq!(client.starts(), 0);
    }

    #[tokio::test]
    async fn upstream_error_fails_the_session() {
        let client = ScriptedClient::new(vec![Step::Fail("backend unavailable".into())]);
        let mut session = ConversionSession::new(request("developer", "manager", "X"));
        session.start(&registry(), &client).unwrap();

        assert_eq!(session.finished().await, SessionState::Failed);
    }

    #[tokio::test]
    async fn cancel_aborts_and_state_stays_final() {
        let gate = Arc::new(Notify::new());
        let client = ScriptedClient::new(vec![
            Step::Emit(Delta::content("a")),
            Step::Wait(gate.clone()),
            Step::Emit(Delta::content("b")),
        ]);
        let mut session = ConversionSession::new(request("developer", "manager", "X"));
        session.start(&registry(), &client).unwrap();
        assert_eq!(session.state(), SessionState::Streaming);

        assert!(session.cancel());
        assert!(!session.abort_handle().abort());
        assert_eq!(session.state(), SessionState::Aborted);

        gate.notify_one();
        client.wait_for_cancels(1).await;
        assert_eq!(session.finished().await, SessionState::Aborted);
        assert_eq!(client.cancels(), 1);
    }

    #[tokio::test]
    async fn cancel_after_completion_changes_nothing() {
        let client = ScriptedClient::emitting(&["a"]);
        let mut session = ConversionSession::new(request("developer", "developer", "X"));
        session.start(&registry(), &client).unwrap();

        assert_eq!(session.finished().await, SessionState::Completed);
        assert!(!session.cancel());
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn cannot_start_twice() {
        let client = ScriptedClient::emitting(&[]);
        let mut session = ConversionSession::new(request("developer", "manager", "X"));
        session.start(&registry(), &client).unwrap();
        assert_eq!(session.start(&registry(), &client), Err(SessionError::AlreadyStarted));
        assert_eq!(client.starts(), 1);
    }

    #[tokio::test]
    async fn unstarted_session_has_nothing_to_cancel() {
        let session = ConversionSession::new(request("developer", "manager", "X"));
        assert!(!session.cancel());
        assert_eq!(session.finished().await, SessionState::Created);
    }
}
