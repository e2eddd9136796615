//! Scripted completion backend for exercising the relay without a network.

use async_trait::async_trait;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio::sync::Notify;

use crate::config::roles::{ RoleRegistry, RoleSet };
use crate::llm::chat::{
    create_streaming_response,
    BoxError,
    ChatClient,
    CompletionResponse,
    CompletionStream,
};
use crate::models::chat::ChatMessage;
use crate::models::stream::Delta;

#[derive(Clone)]
pub enum Step {
    Emit(Delta),
    Fail(String),
    /// Blocks until the gate is notified.
    Wait(Arc<Notify>),
    /// Never completes; only cancellation ends the sequence.
    Hang,
}

pub struct ScriptedClient {
    steps: Vec<Step>,
    reply: Option<String>,
    starts: Arc<AtomicUsize>,
    cancels: Arc<AtomicUsize>,
    last_messages: Arc<Mutex<Option<Vec<ChatMessage>>>>,
}

impl ScriptedClient {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            reply: None,
            starts: Arc::new(AtomicUsize::new(0)),
            cancels: Arc::new(AtomicUsize::new(0)),
            last_messages: Arc::new(Mutex::new(None)),
        }
    }

    pub fn emitting(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Step::Emit(Delta::content(*t))).collect())
    }

    pub fn with_reply(mut self, reply: &str) -> Self {
        self.reply = Some(reply.to_string());
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.last_messages.lock().unwrap().clone()
    }

    pub async fn wait_for_cancels(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.cancels() < expected {
            assert!(tokio::time::Instant::now() < deadline, "upstream was never cancelled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse, BoxError> {
        *self.last_messages.lock().unwrap() = Some(messages.to_vec());
        match &self.reply {
            Some(reply) => Ok(CompletionResponse { response: reply.clone() }),
            None => Err("No response received from the model".into()),
        }
    }

    fn start(&self, messages: Vec<ChatMessage>) -> CompletionStream {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.last_messages.lock().unwrap() = Some(messages);

        let steps = self.steps.clone();
        let completion = create_streaming_response(move |tx| async move {
            for step in steps {
                match step {
                    Step::Emit(delta) => {
                        if tx.send(Ok(delta)).await.is_err() {
                            return;
                        }
                    }
                    Step::Fail(message) => {
                        let _ = tx.send(Err(message.into())).await;
                        return;
                    }
                    Step::Wait(gate) => gate.notified().await,
                    Step::Hang => futures::future::pending::<()>().await,
                }
            }
        });

        let cancels = self.cancels.clone();
        let handle = completion.cancel.clone();
        tokio::spawn(async move {
            handle.cancelled().await;
            cancels.fetch_add(1, Ordering::SeqCst);
        });

        completion
    }

    fn get_model(&self) -> String {
        "scripted".to_string()
    }

    fn get_base_url(&self) -> Option<String> {
        None
    }
}

pub const ROLES_JSON: &str = r###"{
    "roles": {
        "product-manager": { "name": "产品经理", "prompt": "## 产品经理视角\n关注用户需求和产品价值" },
        "developer": { "name": "研发", "prompt": "## 研发视角\n关注技术实现和代码质量" },
        "operations": { "name": "运营", "prompt": "## 运营视角\n关注用户增长和数据分析" },
        "manager": { "name": "管理者", "prompt": "## 管理者视角\n关注成本效益和团队协作" }
    }
}"###;

pub fn registry() -> RoleRegistry {
    RoleRegistry::new(Some(RoleSet::from_json(ROLES_JSON).unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_roles_keep_their_markdown_headings() {
        let registry = registry();
        assert_eq!(registry.ids(), vec!["developer", "manager", "operations", "product-manager"]);
        let pm = registry.resolve("product-manager").unwrap();
        assert_eq!(pm.display_name, "产品经理");
        assert_eq!(pm.perspective_text, "## 产品经理视角\n关注用户需求和产品价值");
    }
}
