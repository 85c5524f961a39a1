use crate::adapters::embedding::EmbeddingClient;
use crate::domain::model::TransformResult;
use crate::domain::ports::Transformer;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 參考句模板，`{dimension}` 會替換成維度名稱
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseTemplates {
    pub positive: String,
    pub neutral: String,
    pub negative: String,
    pub mentioned: String,
    pub not_mentioned: String,
}

impl Default for PhraseTemplates {
    fn default() -> Self {
        Self {
            positive: "用户已经表明，或有认为{dimension}很好的倾向".to_string(),
            neutral: "用户提到了{dimension}，但是没有表示好或者不好".to_string(),
            negative: "用户已经表明，或有认为{dimension}不好的倾向".to_string(),
            mentioned: "用户在对某车辆的评论中，说到了{dimension}的相关信息".to_string(),
            not_mentioned: "用户在对某车辆的评论中，没有说到{dimension}的相关信息".to_string(),
        }
    }
}

impl PhraseTemplates {
    fn render(template: &str, dimension: &str) -> String {
        template.replace("{dimension}", dimension)
    }

    /// 依 正面、中性、負面、提及、未提及 的順序產生參考句
    fn phrases(&self, dimension: &str) -> [String; 5] {
        [
            Self::render(&self.positive, dimension),
            Self::render(&self.neutral, dimension),
            Self::render(&self.negative, dimension),
            Self::render(&self.mentioned, dimension),
            Self::render(&self.not_mentioned, dimension),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilaritySettings {
    pub dimensions: Vec<String>,
    pub templates: PhraseTemplates,
    /// 正面、中性、負面對應輸出的情感標籤
    pub labels: [String; 3],
    pub fallback: (String, String),
    pub cache_path: PathBuf,
}

#[derive(Debug, Clone)]
struct DimensionVectors {
    name: String,
    polarity: [Vec<f32>; 3],
    mentioned: Vec<f32>,
    not_mentioned: Vec<f32>,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EtlError::transform(format!(
            "vector length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|y| y * y).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a * norm_b))
}

/// 以 embedding 相似度標註 (維度, 情感)，不經過生成式模型
pub struct SimilarityNotator {
    client: EmbeddingClient,
    dimensions: Vec<DimensionVectors>,
    labels: [String; 3],
    fallback: (String, String),
}

async fn read_cache(path: &Path) -> BTreeMap<String, Vec<f32>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!("⚠️ Ignoring unreadable vector cache {}: {}", path.display(), e);
            BTreeMap::new()
        }),
        Err(_) => BTreeMap::new(),
    }
}

async fn write_cache(path: &Path, cache: &BTreeMap<String, Vec<f32>>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(cache)?).await?;
    Ok(())
}

impl SimilarityNotator {
    /// 載入參考向量快取，缺少的句子即時取得並寫回快取
    pub async fn build(client: EmbeddingClient, settings: SimilaritySettings) -> Result<Self> {
        if settings.dimensions.is_empty() {
            return Err(EtlError::ConfigValidationError {
                field: "similarity.dimensions".to_string(),
                message: "at least one dimension is required".to_string(),
            });
        }

        let mut cache = read_cache(&settings.cache_path).await;
        let mut fetched = 0usize;
        let mut dimensions = Vec::with_capacity(settings.dimensions.len());

        for dimension in &settings.dimensions {
            let mut vectors = Vec::with_capacity(5);
            for phrase in settings.templates.phrases(dimension) {
                let vector = match cache.get(&phrase) {
                    Some(vector) if !vector.is_empty() => vector.clone(),
                    _ => {
                        let vector = client.embed(&phrase).await.map_err(|e| {
                            EtlError::ConfigError {
                                message: format!("reference vector for '{}' unavailable: {}", phrase, e),
                            }
                        })?;
                        cache.insert(phrase.clone(), vector.clone());
                        write_cache(&settings.cache_path, &cache).await?;
                        fetched += 1;
                        vector
                    }
                };
                vectors.push(vector);
            }

            let mut vectors = vectors.into_iter();
            let mut next = || vectors.next().unwrap_or_default();
            dimensions.push(DimensionVectors {
                name: dimension.clone(),
                polarity: [next(), next(), next()],
                mentioned: next(),
                not_mentioned: next(),
            });
        }

        tracing::info!(
            "🧭 Reference vectors ready for {} dimensions ({} fetched, {} cached)",
            dimensions.len(),
            fetched,
            cache.len() - fetched
        );

        Ok(Self {
            client,
            dimensions,
            labels: settings.labels,
            fallback: settings.fallback,
        })
    }

    /// 找出提及程度最高的維度，再以三個極性參考句取最相近者
    pub fn notate(&self, vector: &[f32]) -> Result<(String, String)> {
        let mut best: Option<(&DimensionVectors, f32)> = None;
        for dimension in &self.dimensions {
            let mentioned = cosine_similarity(vector, &dimension.mentioned)?;
            let not_mentioned = cosine_similarity(vector, &dimension.not_mentioned)?;
            if mentioned > not_mentioned && best.map_or(true, |(_, score)| mentioned > score) {
                best = Some((dimension, mentioned));
            }
        }

        let Some((dimension, _)) = best else {
            return Ok(self.fallback.clone());
        };

        let mut polarity = 0;
        let mut polarity_score = f32::MIN;
        for (index, reference) in dimension.polarity.iter().enumerate() {
            let score = cosine_similarity(vector, reference)?;
            if score > polarity_score {
                polarity = index;
                polarity_score = score;
            }
        }

        Ok((dimension.name.clone(), self.labels[polarity].clone()))
    }
}

#[async_trait]
impl Transformer for SimilarityNotator {
    fn name(&self) -> &str {
        "similarity-notation"
    }

    fn derived_columns(&self) -> Vec<String> {
        vec!["requirement".to_string(), "sentiment".to_string()]
    }

    async fn transform(&self, content: &str) -> Result<TransformResult> {
        let vector = self.client.embed(content).await?;
        let (requirement, sentiment) = self.notate(&vector)?;

        let mut fields = Map::new();
        fields.insert("requirement".to_string(), Value::String(requirement.clone()));
        fields.insert("sentiment".to_string(), Value::String(sentiment.clone()));
        Ok(TransformResult::success(
            fields,
            format!("({}, {})", requirement, sentiment),
        ))
    }
}
