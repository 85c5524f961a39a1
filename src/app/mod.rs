pub mod prompt;
pub mod transforms;

use crate::adapters::embedding::EmbeddingClient;
use crate::adapters::llm::ChatClient;
use crate::config::{TaskKind, TomlConfig};
use crate::domain::ports::Transformer;
use crate::utils::error::Result;
use crate::utils::validation::validate_required_field;
use prompt::PromptTemplate;
use std::sync::Arc;
use transforms::{
    EmbeddingTransform, NeedClassificationTransform, SentimentTupleTransform, SimilarityNotator,
};

/// 依配置中的任務種類建立對應的 Transformer
pub async fn build_transformer(config: &TomlConfig) -> Result<Arc<dyn Transformer>> {
    let transformer: Arc<dyn Transformer> = match config.task() {
        TaskKind::Sentiment => {
            let fallback = config
                .prompt
                .as_ref()
                .and_then(|p| p.fallback.clone())
                .unwrap_or_else(|| ("无关".to_string(), "中性".to_string()));
            Arc::new(SentimentTupleTransform::new(
                ChatClient::new(config.chat_settings()?)?,
                load_prompt(config)?,
                fallback,
            )?)
        }
        TaskKind::Classification => {
            Arc::new(
                NeedClassificationTransform::new(
                    ChatClient::new(config.chat_settings()?)?,
                    load_prompt(config)?,
                )
                .with_required_columns(config.required_columns()),
            )
        }
        TaskKind::Embedding => Arc::new(EmbeddingTransform::new(EmbeddingClient::new(
            config.embedding_settings()?,
        )?)),
        TaskKind::Similarity => Arc::new(
            SimilarityNotator::build(
                EmbeddingClient::new(config.embedding_settings()?)?,
                config.similarity_settings()?,
            )
            .await?,
        ),
    };

    tracing::info!(
        "🧩 Transformer '{}' ready (derived columns: {})",
        transformer.name(),
        transformer.derived_columns().join(", ")
    );
    Ok(transformer)
}

fn load_prompt(config: &TomlConfig) -> Result<PromptTemplate> {
    let prompt = validate_required_field("prompt", &config.prompt)?;
    let template = PromptTemplate::from_file(&prompt.file, config.prompt_placeholder())?;
    Ok(match &prompt.variables {
        Some(variables) => template.with_variables(variables),
        None => template,
    })
}
