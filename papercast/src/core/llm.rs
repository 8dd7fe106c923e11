use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use crate::core::config::LlmConfig;

/// One chat-completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_mode: bool,
}

impl GenerationRequest {
    pub fn chat(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.1,
            max_tokens: 2048,
            json_mode: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    fn api_key(&self) -> Option<String> {
        self.config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }

    fn request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user }
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "top_p": 1,
            "frequency_penalty": 0,
            "presence_penalty": 0,
            "stream": false
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = self.request_body(request);

        // Assume api_url is like "https://api.openai.com/v1"
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));

        log::info!(
            "Sending LLM request to {} (temperature {}, max_tokens {})",
            url, request.temperature, request.max_tokens
        );
        log::debug!("LLM request body: {}", body);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = self.api_key() {
            builder = builder.bearer_auth(key);
        }

        let res = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Failed to connect to LLM at {}: {}", url, e);
                return Err(anyhow::anyhow!("LLM Connection Failed: {}", e));
            }
        };

        if !res.status().is_success() {
            let status = res.status();
            let error_text = res.text().await.unwrap_or_default();
            log::error!("LLM Error {}: {}", status, error_text);
            return Err(anyhow::anyhow!("LLM API Error {}: {}", status, error_text));
        }

        let response_json: serde_json::Value = res.json().await?;
        log::debug!("Received LLM response: {}", response_json);

        // OpenAI format: choices[-1].message.content
        let content = response_json["choices"]
            .as_array()
            .and_then(|choices| choices.last())
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| anyhow::anyhow!("Unexpected LLM response format: {}", response_json))?;

        Ok(strip_think(content))
    }
}

/// Drop a leading `<think>...</think>` block emitted by reasoning models.
pub fn strip_think(text: &str) -> String {
    match text.find("</think>") {
        Some(idx) => text[idx + "</think>".len()..].trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Cut the outermost JSON object out of a response that may be wrapped in
/// code fences or prose.
pub fn extract_json_object(response: &str) -> Option<&str> {
    let json_clean = response.trim().trim_matches('`').trim();
    let start = json_clean.find('{')?;
    let end = json_clean.rfind('}')?;
    if start <= end {
        Some(&json_clean[start..=end])
    } else {
        None
    }
}
