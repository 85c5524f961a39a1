use crate::adapters::llm::ChatClient;
use crate::app::prompt::PromptTemplate;
use crate::domain::model::TransformResult;
use crate::domain::ports::Transformer;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

/// 從模型回覆中找出 `('需求', '情感')` 或 `("需求", "情感")`
pub struct TupleParser {
    single_quoted: Regex,
    double_quoted: Regex,
}

impl TupleParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| EtlError::ConfigError {
                message: format!("tuple pattern: {}", e),
            })
        };
        Ok(Self {
            single_quoted: compile(r"\('([^']+)',\s*'([^']+)'\)")?,
            double_quoted: compile(r#"\("([^"]+)",\s*"([^"]+)"\)"#)?,
        })
    }

    pub fn parse(&self, text: &str) -> Option<(String, String)> {
        [&self.single_quoted, &self.double_quoted]
            .into_iter()
            .find_map(|re| re.captures(text))
            .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
    }
}

/// 評論 → (需求, 情感) 二元組
pub struct SentimentTupleTransform {
    chat: ChatClient,
    template: PromptTemplate,
    parser: TupleParser,
    fallback: (String, String),
}

impl SentimentTupleTransform {
    pub fn new(chat: ChatClient, template: PromptTemplate, fallback: (String, String)) -> Result<Self> {
        Ok(Self {
            chat,
            template,
            parser: TupleParser::new()?,
            fallback,
        })
    }
}

#[async_trait]
impl Transformer for SentimentTupleTransform {
    fn name(&self) -> &str {
        "sentiment-tuple"
    }

    fn derived_columns(&self) -> Vec<String> {
        vec![
            "requirement".to_string(),
            "sentiment".to_string(),
            "llm_raw_response".to_string(),
        ]
    }

    async fn transform(&self, content: &str) -> Result<TransformResult> {
        let response = self.chat.complete(&self.template.render(content)).await?;

        let (requirement, sentiment) = self.parser.parse(&response).unwrap_or_else(|| {
            tracing::debug!("No tuple in response, using fallback: {}", response);
            self.fallback.clone()
        });

        let mut fields = Map::new();
        fields.insert("requirement".to_string(), Value::String(requirement));
        fields.insert("sentiment".to_string(), Value::String(sentiment));
        fields.insert("llm_raw_response".to_string(), Value::String(response.clone()));
        Ok(TransformResult::success(fields, response))
    }
}
