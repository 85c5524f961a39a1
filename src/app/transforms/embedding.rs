use crate::adapters::embedding::EmbeddingClient;
use crate::domain::model::TransformResult;
use crate::domain::ports::Transformer;
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub struct EmbeddingTransform {
    client: EmbeddingClient,
}

impl EmbeddingTransform {
    pub fn new(client: EmbeddingClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transformer for EmbeddingTransform {
    fn name(&self) -> &str {
        "embedding"
    }

    fn derived_columns(&self) -> Vec<String> {
        vec!["embedding".to_string()]
    }

    async fn transform(&self, content: &str) -> Result<TransformResult> {
        let vector = self.client.embed(content).await?;
        let dimensions = vector.len();

        // 直接序列化成文字，避免 f32 轉 Value 時被放大成 f64 精度
        let mut fields = Map::new();
        fields.insert(
            "embedding".to_string(),
            Value::String(serde_json::to_string(&vector)?),
        );
        Ok(TransformResult::success(
            fields,
            format!("{} dimensions", dimensions),
        ))
    }
}
