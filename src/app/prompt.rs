use crate::utils::error::{EtlError, Result};
use std::collections::HashMap;
use std::path::Path;

/// 提示詞模板：變數在載入時替換一次，內容佔位符每筆替換
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    text: String,
    placeholder: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>, placeholder: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            placeholder: placeholder.into(),
        }
    }

    /// 找不到模板檔屬於致命錯誤，整個流程不會開始
    pub fn from_file(path: impl AsRef<Path>, placeholder: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EtlError::TemplateError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let template = Self::new(text, placeholder);
        if !template.text.contains(&template.placeholder) {
            tracing::warn!(
                "⚠️ Prompt {} has no '{}' placeholder, every record gets the same prompt",
                path.display(),
                template.placeholder
            );
        }
        Ok(template)
    }

    /// 替換 `{name}` 形式的固定變數，例如 `{product_name}`
    pub fn with_variables(mut self, variables: &HashMap<String, String>) -> Self {
        for (name, value) in variables {
            self.text = self.text.replace(&format!("{{{}}}", name), value);
        }
        self
    }

    pub fn render(&self, content: &str) -> String {
        self.text.replace(&self.placeholder, content)
    }
}
