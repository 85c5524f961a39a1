use crate::adapters::llm::ChatClient;
use crate::app::prompt::PromptTemplate;
use crate::domain::model::TransformResult;
use crate::domain::ports::Transformer;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// 需求文字 → 分類標籤；模型回覆整段去空白後即為標籤
pub struct NeedClassificationTransform {
    chat: ChatClient,
    template: PromptTemplate,
    required_columns: Vec<String>,
}

impl NeedClassificationTransform {
    pub fn new(chat: ChatClient, template: PromptTemplate) -> Self {
        Self {
            chat,
            template,
            required_columns: vec!["sentiment".to_string()],
        }
    }

    pub fn with_required_columns(mut self, columns: Vec<String>) -> Self {
        self.required_columns = columns;
        self
    }
}

#[async_trait]
impl Transformer for NeedClassificationTransform {
    fn name(&self) -> &str {
        "need-classification"
    }

    fn derived_columns(&self) -> Vec<String> {
        vec!["classification".to_string(), "llm_raw_response".to_string()]
    }

    fn required_columns(&self) -> Vec<String> {
        self.required_columns.clone()
    }

    async fn transform(&self, content: &str) -> Result<TransformResult> {
        let response = self.chat.complete(&self.template.render(content)).await?;
        let label = response.trim();
        if label.is_empty() {
            return Err(EtlError::transform("empty classification"));
        }

        let mut fields = Map::new();
        fields.insert("classification".to_string(), Value::String(label.to_string()));
        fields.insert("llm_raw_response".to_string(), Value::String(response.clone()));
        Ok(TransformResult::success(fields, response))
    }
}
