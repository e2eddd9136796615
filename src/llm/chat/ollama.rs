use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use async_trait::async_trait;
use super::{ http_stream_deltas, BoxError, ChatClient, CompletionResponse, CompletionStream, ParsedLine };
use crate::llm::LlmConfig;
use crate::models::chat::ChatMessage;
use crate::models::stream::Delta;
use log::warn;

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize, Default)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Deserialize)]
struct StreamResponse {
    #[serde(default)]
    message: ResponseMessage,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>, temperature: f32) -> Self {
        let model = completion_model.unwrap_or_else(|| "qwen3:4b".to_string());
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".into());

        Self {
            http: HttpClient::new(),
            base_url: url,
            completion_model: model,
            temperature,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, BoxError> {
        if config.llm_type != crate::llm::LlmType::Ollama {
            return Err("Invalid config type for OllamaClient".into());
        }

        Ok(Self::new(config.base_url.clone(), config.completion_model.clone(), config.temperature))
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }
}

/// Parses one NDJSON line of an Ollama `/api/chat` stream.
pub fn parse_stream_line(line: &str) -> Result<ParsedLine, BoxError> {
    if line.trim().is_empty() {
        return Ok(ParsedLine::Ignored);
    }

    let resp = match serde_json::from_str::<StreamResponse>(line) {
        Ok(resp) => resp,
        Err(e) => {
            warn!("JSON parse error: {} for line: {}", e, line);
            return Ok(ParsedLine::Ignored);
        }
    };

    if let Some(error) = resp.error {
        return Err(error.into());
    }

    let mut deltas = Vec::new();
    if let Some(thinking) = resp.message.thinking.filter(|s| !s.is_empty()) {
        deltas.push(Delta::reasoning(thinking));
    }
    if !resp.message.content.is_empty() {
        deltas.push(Delta::content(resp.message.content));
    }

    match (deltas.is_empty(), resp.done) {
        (true, true) => Ok(ParsedLine::Finished),
        (true, false) => Ok(ParsedLine::Ignored),
        // A final line may still carry text; the channel closes right after it.
        (false, _) => Ok(ParsedLine::Deltas(deltas)),
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse, BoxError> {
        let req = ChatRequest {
            model: &self.completion_model,
            messages,
            stream: false,
            options: ChatOptions { temperature: self.temperature },
        };
        let resp = self.http.post(self.chat_url()).json(&req).send().await?.error_for_status()?;
        let data = resp.json::<ChatResponse>().await?;
        Ok(CompletionResponse { response: data.message.content })
    }

    fn start(&self, messages: Vec<ChatMessage>) -> CompletionStream {
        let req = ChatRequest {
            model: &self.completion_model,
            messages: &messages,
            stream: true,
            options: ChatOptions { temperature: self.temperature },
        };
        let request = self.http.post(self.chat_url()).json(&req);
        http_stream_deltas(request, parse_stream_line)
    }

    fn get_model(&self) -> String {
        self.completion_model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
