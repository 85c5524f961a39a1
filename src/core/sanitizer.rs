use crate::domain::model::{OutputRow, Record, TransformResult};
use serde_json::Value;

/// 被丟棄的一筆，附上原因供日誌使用
#[derive(Debug, Clone, PartialEq)]
pub struct FailureMarker {
    pub id: String,
    pub reason: String,
}

/// 將換行與歸位字元換成空白，確保一列只佔一行
pub fn clean_text(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

fn clean_value(value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(clean_text(&s)),
        Value::Bool(_) | Value::Number(_) => value,
        other => Value::String(clean_text(&other.to_string())),
    }
}

/// 合併原始欄位與轉換結果；失敗或缺少必要欄位時回傳 `FailureMarker`
pub fn sanitize(
    record: &Record,
    result: TransformResult,
    required_fields: &[String],
) -> Result<OutputRow, FailureMarker> {
    let fields = match result {
        TransformResult::Failure { reason } => {
            return Err(FailureMarker {
                id: record.id.clone(),
                reason,
            })
        }
        TransformResult::Success { fields, .. } => fields,
    };

    if let Some(missing) = required_fields
        .iter()
        .find(|name| matches!(fields.get(name.as_str()), None | Some(Value::Null)))
    {
        return Err(FailureMarker {
            id: record.id.clone(),
            reason: format!("derived field '{}' missing from response", missing),
        });
    }

    let mut values = serde_json::Map::with_capacity(record.data.len() + fields.len());
    for (column, value) in record.data.iter().chain(fields.iter()) {
        values.insert(column.clone(), clean_value(value.clone()));
    }

    Ok(OutputRow {
        id: record.id.clone(),
        values,
    })
}
