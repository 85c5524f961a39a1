use crate::adapters::embedding::EmbeddingSettings;
use crate::adapters::llm::ChatSettings;
use crate::app::transforms::similarity::{PhraseTemplates, SimilaritySettings};
use crate::core::etl::EngineConfig;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_required_field,
    validate_seconds, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 支援的標註任務
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// 評論 → (需求, 情感)
    Sentiment,
    /// 需求 → 分類
    Classification,
    /// 評論 → 向量
    Embedding,
    /// 評論 → (維度, 情感)，以向量相似度判斷
    Similarity,
}

impl TaskKind {
    pub fn default_id_column(self) -> &'static str {
        "reply_id"
    }

    pub fn default_content_column(self) -> &'static str {
        match self {
            TaskKind::Classification => "requirement",
            _ => "content",
        }
    }

    pub fn default_placeholder(self) -> &'static str {
        match self {
            TaskKind::Classification => "{customer_need}",
            _ => "{raw_review_text}",
        }
    }

    pub fn uses_llm(self) -> bool {
        matches!(self, TaskKind::Sentiment | TaskKind::Classification)
    }

    pub fn uses_embedding(self) -> bool {
        matches!(self, TaskKind::Embedding | TaskKind::Similarity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    pub load: LoadConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    pub prompt: Option<PromptConfig>,
    pub llm: Option<LlmConfig>,
    pub embedding: Option<EmbeddingConfig>,
    pub similarity: Option<SimilarityConfig>,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub description: Option<String>,
    pub task: TaskKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub input_path: String,
    pub id_column: Option<String>,
    pub content_column: Option<String>,
    /// 省略時保留輸入檔其餘所有欄位
    pub extra_columns: Option<Vec<String>>,
    /// 小於等於 0 代表不限制
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub output_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub cooldown_seconds: f64,
}

fn default_batch_size() -> usize {
    1
}

fn default_max_concurrent() -> usize {
    25
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
            cooldown_seconds: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub file: String,
    pub placeholder: Option<String>,
    pub variables: Option<HashMap<String, String>>,
    /// 解析不到二元組時使用的預設值
    pub fallback: Option<(String, String)>,
    /// 需求分類任務要求輸入檔必須具備的欄位
    pub required_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub endpoint: Option<String>,
    pub model: String,
    pub input_key: Option<String>,
    pub output_path: Option<Vec<String>>,
    pub api_key: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    pub cache_path: String,
    pub dimensions: Option<Vec<String>>,
    pub templates: Option<TemplatesConfig>,
    pub labels: Option<[String; 3]>,
    pub fallback: Option<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    pub positive: Option<String>,
    pub neutral: Option<String>,
    pub negative: Option<String>,
    pub mentioned: Option<String>,
    pub not_mentioned: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// "compact"（預設）或 "json"
    pub log_format: Option<String>,
}

const DEFAULT_DIMENSIONS: [&str; 8] = [
    "驾驶感受",
    "操控",
    "舒适性",
    "外观",
    "内饰",
    "性价比",
    "续航能力",
    "智能",
];

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${API_KEY})；未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn task(&self) -> TaskKind {
        self.pipeline.task
    }

    pub fn id_column(&self) -> String {
        self.source
            .id_column
            .clone()
            .unwrap_or_else(|| self.task().default_id_column().to_string())
    }

    pub fn content_column(&self) -> String {
        self.source
            .content_column
            .clone()
            .unwrap_or_else(|| self.task().default_content_column().to_string())
    }

    pub fn limit(&self) -> Option<usize> {
        self.source
            .limit
            .filter(|limit| *limit > 0)
            .map(|limit| limit as usize)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.concurrency.cooldown_seconds.max(0.0))
    }

    pub fn output_path(&self) -> &str {
        &self.load.output_path
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn json_logs(&self) -> bool {
        self.monitoring
            .as_ref()
            .and_then(|m| m.log_format.as_deref())
            .is_some_and(|format| format.eq_ignore_ascii_case("json"))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            input_path: PathBuf::from(&self.source.input_path),
            output_path: PathBuf::from(&self.load.output_path),
            id_column: self.id_column(),
            content_column: self.content_column(),
            extra_columns: self.source.extra_columns.clone(),
            limit: self.limit(),
            batch_size: self.concurrency.batch_size,
            max_concurrent: self.concurrency.max_concurrent,
            cooldown: self.cooldown(),
        }
    }

    pub fn prompt_placeholder(&self) -> String {
        self.prompt
            .as_ref()
            .and_then(|p| p.placeholder.clone())
            .unwrap_or_else(|| self.task().default_placeholder().to_string())
    }

    /// 輸入檔必須具備的額外欄位；需求分類預設要求 `sentiment`
    pub fn required_columns(&self) -> Vec<String> {
        if let Some(columns) = self.prompt.as_ref().and_then(|p| p.required_columns.clone()) {
            return columns;
        }
        match self.task() {
            TaskKind::Classification => vec!["sentiment".to_string()],
            _ => Vec::new(),
        }
    }

    pub fn chat_settings(&self) -> Result<ChatSettings> {
        let llm = validate_required_field("llm", &self.llm)?;
        Ok(ChatSettings {
            base_url: llm.base_url.clone(),
            api_key: llm.api_key.clone(),
            model: llm.model.clone(),
            temperature: llm.temperature,
            timeout: llm.timeout_seconds.map(Duration::from_secs),
        })
    }

    pub fn embedding_settings(&self) -> Result<EmbeddingSettings> {
        let embedding = validate_required_field("embedding", &self.embedding)?;
        Ok(EmbeddingSettings {
            base_url: embedding.base_url.clone(),
            endpoint: embedding
                .endpoint
                .clone()
                .unwrap_or_else(|| "api/embeddings".to_string()),
            model: embedding.model.clone(),
            input_key: embedding
                .input_key
                .clone()
                .unwrap_or_else(|| "prompt".to_string()),
            output_path: embedding
                .output_path
                .clone()
                .unwrap_or_else(|| vec!["embedding".to_string()]),
            api_key: embedding.api_key.clone(),
            timeout: embedding.timeout_seconds.map(Duration::from_secs),
        })
    }

    pub fn similarity_settings(&self) -> Result<SimilaritySettings> {
        let similarity = validate_required_field("similarity", &self.similarity)?;
        let defaults = PhraseTemplates::default();
        let templates = match &similarity.templates {
            Some(t) => PhraseTemplates {
                positive: t.positive.clone().unwrap_or(defaults.positive),
                neutral: t.neutral.clone().unwrap_or(defaults.neutral),
                negative: t.negative.clone().unwrap_or(defaults.negative),
                mentioned: t.mentioned.clone().unwrap_or(defaults.mentioned),
                not_mentioned: t.not_mentioned.clone().unwrap_or(defaults.not_mentioned),
            },
            None => defaults,
        };

        Ok(SimilaritySettings {
            dimensions: similarity
                .dimensions
                .clone()
                .unwrap_or_else(|| DEFAULT_DIMENSIONS.iter().map(|d| d.to_string()).collect()),
            templates,
            labels: similarity.labels.clone().unwrap_or_else(|| {
                ["积极".to_string(), "中性".to_string(), "消极".to_string()]
            }),
            fallback: similarity
                .fallback
                .clone()
                .unwrap_or_else(|| ("无".to_string(), "中性".to_string())),
            cache_path: PathBuf::from(&similarity.cache_path),
        })
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("pipeline.name", &self.pipeline.name)?;
        validate_path("source.input_path", &self.source.input_path)?;
        validate_path("load.output_path", &self.load.output_path)?;
        validate_positive_number("concurrency.batch_size", self.concurrency.batch_size, 1)?;
        validate_positive_number(
            "concurrency.max_concurrent",
            self.concurrency.max_concurrent,
            1,
        )?;
        validate_seconds(
            "concurrency.cooldown_seconds",
            self.concurrency.cooldown_seconds,
        )?;

        let task = self.task();
        if task.uses_llm() {
            let prompt = validate_required_field("prompt", &self.prompt)?;
            validate_path("prompt.file", &prompt.file)?;
            let llm = validate_required_field("llm", &self.llm)?;
            validate_url("llm.base_url", &llm.base_url)?;
            validate_non_empty_string("llm.model", &llm.model)?;
        }
        if task.uses_embedding() {
            let embedding = validate_required_field("embedding", &self.embedding)?;
            validate_url("embedding.base_url", &embedding.base_url)?;
            validate_non_empty_string("embedding.model", &embedding.model)?;
        }
        if task == TaskKind::Similarity {
            let similarity = validate_required_field("similarity", &self.similarity)?;
            validate_path("similarity.cache_path", &similarity.cache_path)?;
        }

        Ok(())
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()?;
        self.engine_config().validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SENTIMENT: &str = r#"
[pipeline]
name = "sentiment-tuples"
task = "sentiment"

[source]
input_path = "data/comments.csv"
limit = -1

[load]
output_path = "results/sentiment.csv"

[concurrency]
batch_size = 2
max_concurrent = 30
cooldown_seconds = 1.5

[prompt]
file = "prompts/sentiment_tuple.txt"

[prompt.variables]
product_name = "Model 3"

[llm]
base_url = "https://api.example.com/v1"
model = "gpt-4o-mini"
"#;

    #[test]
    fn test_parse_sentiment_config_with_task_defaults() {
        let config = TomlConfig::from_toml_str(SENTIMENT).unwrap();

        assert_eq!(config.task(), TaskKind::Sentiment);
        assert_eq!(config.id_column(), "reply_id");
        assert_eq!(config.content_column(), "content");
        assert_eq!(config.limit(), None);
        assert_eq!(config.prompt_placeholder(), "{raw_review_text}");
        assert!(config.validate().is_ok());

        let engine = config.engine_config();
        assert_eq!(engine.batch_size, 2);
        assert_eq!(engine.max_concurrent, 30);
        assert_eq!(engine.cooldown, Duration::from_millis(1500));
        assert_eq!(engine.extra_columns, None);
    }

    #[test]
    fn test_classification_defaults_and_concurrency_section_optional() {
        let toml_content = r#"
[pipeline]
name = "needs"
task = "classification"

[source]
input_path = "results/sentiment.csv"
limit = 50

[load]
output_path = "results/classification.csv"

[prompt]
file = "prompts/classification.txt"

[llm]
base_url = "http://localhost:8000/v1"
model = "qwen"
"#;
        let config = TomlConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.content_column(), "requirement");
        assert_eq!(config.prompt_placeholder(), "{customer_need}");
        assert_eq!(config.limit(), Some(50));
        assert_eq!(config.concurrency.batch_size, 1);
        assert_eq!(config.cooldown(), Duration::ZERO);
        assert_eq!(config.required_columns(), vec!["sentiment"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("NOTATE_TEST_API_KEY", "sk-test");
        let toml_content = SENTIMENT.replace(
            "model = \"gpt-4o-mini\"",
            "model = \"gpt-4o-mini\"\napi_key = \"${NOTATE_TEST_API_KEY}\"",
        );

        let config = TomlConfig::from_toml_str(&toml_content).unwrap();
        assert_eq!(config.chat_settings().unwrap().api_key.as_deref(), Some("sk-test"));

        std::env::remove_var("NOTATE_TEST_API_KEY");
    }

    #[test]
    fn test_validation_failures() {
        let bad_url = SENTIMENT.replace("https://api.example.com/v1", "not-a-url");
        assert!(TomlConfig::from_toml_str(&bad_url).unwrap().validate().is_err());

        let zero_batch = SENTIMENT.replace("batch_size = 2", "batch_size = 0");
        assert!(TomlConfig::from_toml_str(&zero_batch).unwrap().validate().is_err());

        let negative_cooldown = SENTIMENT.replace("cooldown_seconds = 1.5", "cooldown_seconds = -1.0");
        assert!(TomlConfig::from_toml_str(&negative_cooldown).unwrap().validate().is_err());

        let embedding_without_section = SENTIMENT.replace("task = \"sentiment\"", "task = \"embedding\"");
        let err = TomlConfig::from_toml_str(&embedding_without_section)
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(matches!(err, EtlError::MissingConfigError { ref field } if field == "embedding"));
    }

    #[test]
    fn test_similarity_settings_defaults() {
        let toml_content = r#"
[pipeline]
name = "notation"
task = "similarity"

[source]
input_path = "data/comments.csv"

[load]
output_path = "results/tuple_notation.csv"

[embedding]
base_url = "https://api.example.com/v1"
endpoint = "embeddings"
model = "text-embedding-3-large"
input_key = "input"
output_path = ["data/0", "embedding"]

[similarity]
cache_path = "results/embed_map.json"
dimensions = ["range", "comfort"]
"#;
        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_ok());

        let embedding = config.embedding_settings().unwrap();
        assert_eq!(embedding.output_path, vec!["data/0", "embedding"]);

        let similarity = config.similarity_settings().unwrap();
        assert_eq!(similarity.dimensions, vec!["range", "comfort"]);
        assert_eq!(similarity.labels[2], "消极");
        assert_eq!(similarity.templates, PhraseTemplates::default());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(SENTIMENT.as_bytes()).unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.pipeline.name, "sentiment-tuples");
    }
}
