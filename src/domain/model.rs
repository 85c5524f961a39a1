use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// 一筆輸入資料；`data` 依輸入欄位順序保存所有要帶到輸出的欄位
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub content: String,
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            data: Map::new(),
        }
    }

    pub fn with_field(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(column.into(), value.into());
        self
    }
}

pub type Batch = Vec<Record>;

/// 外部轉換的結果，只有成功或失敗兩種
#[derive(Debug, Clone, PartialEq)]
pub enum TransformResult {
    Success {
        fields: Map<String, Value>,
        raw_response: String,
    },
    Failure {
        reason: String,
    },
}

impl TransformResult {
    pub fn success(fields: Map<String, Value>, raw_response: impl Into<String>) -> Self {
        TransformResult::Success {
            fields,
            raw_response: raw_response.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        TransformResult::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransformResult::Success { .. })
    }
}

/// 已清理、可直接寫入 CSV 的一列
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub id: String,
    pub values: Map<String, Value>,
}

impl OutputRow {
    /// 依欄位順序取值；缺少的欄位回傳空字串
    pub fn cells<'a>(&'a self, columns: &'a [String]) -> impl Iterator<Item = String> + 'a {
        columns.iter().map(move |column| match self.values.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        })
    }
}

/// 輸出檔中已存在的識別碼
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    ids: HashSet<String>,
}

impl Checkpoint {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for Checkpoint {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// 讀取階段的統計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub checkpoint_size: usize,
    pub skipped_blank: usize,
    pub already_done: usize,
    pub eligible: usize,
}

/// 單一批次處理完的計數
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub persisted: usize,
    pub lost: usize,
}
