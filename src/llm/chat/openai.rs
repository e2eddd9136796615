use async_trait::async_trait;
use log::{ info, warn };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

use super::{
    http_stream_deltas,
    BoxError,
    ChatClient,
    CompletionResponse,
    CompletionStream,
    ParsedLine,
};
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::ChatMessage;
use crate::models::stream::Delta;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: Option<OpenAIDelta>,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIError {
    message: String,
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Self, BoxError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid API key format: {}", e))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as BoxError)?;

        info!("OpenAI-compatible client initialized with baseURL: {}", base_url);

        Ok(Self {
            http,
            model,
            base_url,
            max_tokens,
            temperature,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, BoxError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| format!("API key is required for {}", config.llm_type))?;

        let (default_url, default_model) = match config.llm_type {
            LlmType::DeepSeek => (DEEPSEEK_BASE_URL, "deepseek-chat"),
            _ => (OPENAI_BASE_URL, "gpt-3.5-turbo"),
        };

        Self::new(
            api_key,
            config.completion_model.clone().unwrap_or_else(|| default_model.to_string()),
            config.base_url.clone().unwrap_or_else(|| default_url.to_string()),
            config.max_tokens,
            config.temperature,
        )
    }

    fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        }
    }
}

/// Parses one line of an OpenAI-style SSE body.
pub fn parse_stream_line(line: &str) -> Result<ParsedLine, BoxError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(ParsedLine::Ignored);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(ParsedLine::Ignored);
    }
    if data == "[DONE]" {
        return Ok(ParsedLine::Finished);
    }

    let chunk = match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("JSON parse error: {} for data: {}", e, data);
            return Ok(ParsedLine::Ignored);
        }
    };

    if let Some(error) = chunk.error {
        return Err(error.message.into());
    }

    let mut deltas = Vec::new();
    if let Some(delta) = chunk.choices.into_iter().next().and_then(|c| c.delta) {
        if let Some(reasoning) = delta.reasoning_content.filter(|s| !s.is_empty()) {
            deltas.push(Delta::reasoning(reasoning));
        }
        if let Some(content) = delta.content.filter(|s| !s.is_empty()) {
            deltas.push(Delta::content(content));
        }
    }

    if deltas.is_empty() {
        Ok(ParsedLine::Ignored)
    } else {
        Ok(ParsedLine::Deltas(deltas))
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<CompletionResponse, BoxError> {
        let req = OpenAIChatRequest {
            model: &self.model,
            messages,
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            stream: None,
        };

        let resp = self.http.post(self.completions_url())
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<OpenAIResponse>()
            .await?;

        let content = resp.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| "No response received from the model".to_string())?;

        Ok(CompletionResponse { response: content })
    }

    fn start(&self, messages: Vec<ChatMessage>) -> CompletionStream {
        let req = OpenAIChatRequest {
            model: &self.model,
            messages: &messages,
            max_tokens: None,
            temperature: None,
            stream: Some(true),
        };
        let request = self.http.post(self.completions_url()).json(&req);
        http_stream_deltas(request, parse_stream_line)
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
