use crate::utils::error::{EtlError, Result};
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;

/// Embedding 端點設定；`output_path` 描述向量在回應中的位置，
/// 例如 Ollama 為 `["embedding"]`，OpenAI 為 `["data/0", "embedding"]`
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub endpoint: String,
    pub model: String,
    pub input_key: String,
    pub output_path: Vec<String>,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
}

pub struct EmbeddingClient {
    client: Client,
    settings: EmbeddingSettings,
    url: String,
}

/// 依路徑取出向量；`name/index` 代表先取欄位再取陣列元素
pub fn extract_vector(response: &Value, path: &[String]) -> Option<Vec<f32>> {
    let mut current = response;
    for step in path {
        current = match step.split_once('/') {
            Some((key, index)) => {
                let index: usize = index.parse().ok()?;
                current.get(key)?.get(index)?
            }
            None => current.get(step.as_str())?,
        };
    }

    let vector: Vec<f32> = current
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<_>>()?;
    (!vector.is_empty()).then_some(vector)
}

impl EmbeddingClient {
    pub fn new(settings: EmbeddingSettings) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        let url = format!(
            "{}/{}",
            settings.base_url.trim_end_matches('/'),
            settings.endpoint.trim_start_matches('/')
        );

        Ok(Self {
            client: builder.build()?,
            settings,
            url,
        })
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EtlError::transform("cannot embed empty text"));
        }

        let mut payload = Map::new();
        payload.insert("model".to_string(), Value::String(self.settings.model.clone()));
        payload.insert(self.settings.input_key.clone(), Value::String(text.to_string()));

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(key) = self.settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EtlError::RemoteStatusError {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        extract_vector(&body, &self.settings.output_path).ok_or_else(|| {
            EtlError::transform(format!(
                "no embedding at {:?} in response",
                self.settings.output_path
            ))
        })
    }
}
