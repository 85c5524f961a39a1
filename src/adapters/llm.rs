use crate::utils::error::{EtlError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenAI 相容的聊天補全端點設定
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

pub struct ChatClient {
    client: Client,
    settings: ChatSettings,
    url: String,
}

impl ChatClient {
    pub fn new(settings: ChatSettings) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let url = format!("{}/chat/completions", settings.base_url.trim_end_matches('/'));

        Ok(Self {
            client: builder.build()?,
            settings,
            url,
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// 送出單一使用者訊息並回傳模型文字；不重試
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
            temperature: self.settings.temperature,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = self.settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        tracing::trace!("Chat request to {}", self.url);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EtlError::RemoteStatusError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| EtlError::transform("chat response has no message content"))?;

        // 部分代理服務以 200 回傳 "[error] ..." 字串
        if content.starts_with("[error]") {
            return Err(EtlError::transform(format!("model request failed: {}", content)));
        }

        Ok(content)
    }
}
