use crate::domain::model::{Checkpoint, LoadReport, Record};
use crate::utils::error::{EtlError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// 讀取輸入檔時的欄位綁定
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub id_column: String,
    pub content_column: String,
    /// `None` 代表保留其餘所有欄位
    pub extra_columns: Option<Vec<String>>,
    pub required_columns: Vec<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LoadedRecords {
    pub records: Vec<Record>,
    pub report: LoadReport,
    /// 實際帶到輸出的額外欄位（依輸入順序）
    pub extra_columns: Vec<String>,
}

pub struct CsvRecordSource {
    input_path: PathBuf,
}

/// 匯出工具常把空值寫成 `nan`
fn is_blank(content: &str) -> bool {
    content.is_empty() || content.eq_ignore_ascii_case("nan")
}

/// 從既有輸出檔取出已完成的識別碼；讀取失敗一律視為沒有斷點
pub fn load_checkpoint(output_path: &Path, id_column: &str) -> Checkpoint {
    if !output_path.exists() {
        return Checkpoint::default();
    }

    match read_id_column(output_path, id_column) {
        Ok(Some(ids)) => {
            tracing::info!(
                "♻️ Found {} finished records in {}, resuming",
                ids.len(),
                output_path.display()
            );
            ids
        }
        Ok(None) => {
            tracing::warn!(
                "⚠️ {} has no '{}' column, starting without checkpoint",
                output_path.display(),
                id_column
            );
            Checkpoint::default()
        }
        Err(e) => {
            tracing::warn!(
                "⚠️ Failed to read existing output {}: {}, starting without checkpoint",
                output_path.display(),
                e
            );
            Checkpoint::default()
        }
    }
}

/// 只採計寫完的資料列：沒有換行結尾的尾列與欄位數不符的列都不算完成
fn read_id_column(output_path: &Path, id_column: &str) -> Result<Option<Checkpoint>> {
    let bytes = std::fs::read(output_path)?;
    let complete = match bytes.iter().rposition(|b| *b == b'\n') {
        Some(p) => &bytes[..=p],
        None => &bytes[..0],
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(complete);
    let headers = reader.headers()?.clone();
    let position = match headers.iter().position(|h| h == id_column) {
        Some(position) => position,
        None => return Ok(None),
    };

    let mut ids = Vec::new();
    let mut skipped = 0usize;
    for row in reader.records() {
        let row = row?;
        match row.get(position) {
            Some(id) if row.len() == headers.len() => ids.push(id.to_string()),
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!(
            "⚠️ Ignored {} malformed rows in {}, their records will be processed again",
            skipped,
            output_path.display()
        );
    }
    Ok(Some(ids.into_iter().collect()))
}

impl CsvRecordSource {
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.input_path
    }

    pub fn load(&self, options: &SourceOptions, checkpoint: &Checkpoint) -> Result<LoadedRecords> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.input_path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let position = |column: &str| headers.iter().position(|h| h == column);

        let content_position =
            position(&options.content_column).ok_or_else(|| self.missing(&options.content_column))?;
        for column in &options.required_columns {
            if position(column).is_none() {
                return Err(self.missing(column));
            }
        }

        let id_position = position(&options.id_column);
        if id_position.is_none() {
            tracing::warn!(
                "⚠️ Column '{}' not found, using row position as identifier",
                options.id_column
            );
        }

        let extra_columns: Vec<String> = match &options.extra_columns {
            Some(columns) => {
                for column in columns.iter().filter(|c| position(c).is_none()) {
                    tracing::warn!("⚠️ Extra column '{}' not found, it will be left empty", column);
                }
                columns.clone()
            }
            None => headers
                .iter()
                .filter(|h| **h != options.id_column && **h != options.content_column)
                .cloned()
                .collect(),
        };
        let extra_positions: Vec<(String, usize)> = extra_columns
            .iter()
            .filter(|c| **c != options.id_column && **c != options.content_column)
            .filter_map(|c| position(c).map(|p| (c.clone(), p)))
            .collect();

        let mut report = LoadReport {
            checkpoint_size: checkpoint.len(),
            ..LoadReport::default()
        };
        let mut records = Vec::new();

        for (index, row) in reader.records().enumerate() {
            let row = row?;
            report.total_rows += 1;

            let id = match id_position {
                Some(p) => row.get(p).unwrap_or_default().to_string(),
                None => index.to_string(),
            };
            let content = row.get(content_position).unwrap_or_default().trim();

            if is_blank(content) {
                report.skipped_blank += 1;
                continue;
            }
            if checkpoint.contains(&id) {
                report.already_done += 1;
                continue;
            }
            if options.limit.is_some_and(|limit| records.len() >= limit) {
                continue;
            }

            let mut data = Map::new();
            data.insert(options.id_column.clone(), Value::String(id.clone()));
            data.insert(options.content_column.clone(), Value::String(content.to_string()));
            for (column, p) in &extra_positions {
                let value = row.get(*p).unwrap_or_default();
                data.insert(column.clone(), Value::String(value.to_string()));
            }

            records.push(Record {
                id,
                content: content.to_string(),
                data,
            });
        }

        report.eligible = records.len();

        tracing::info!(
            "📥 Read {} rows from {} ({} blank, {} already done, {} to process)",
            report.total_rows,
            self.input_path.display(),
            report.skipped_blank,
            report.already_done,
            report.eligible
        );
        if let Some(limit) = options.limit {
            tracing::info!("✂️ Limit {} applied", limit);
        }

        Ok(LoadedRecords {
            records,
            report,
            extra_columns,
        })
    }

    fn missing(&self, column: &str) -> EtlError {
        EtlError::MissingColumnError {
            column: column.to_string(),
            path: self.input_path.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn options() -> SourceOptions {
        SourceOptions {
            id_column: "reply_id".to_string(),
            content_column: "content".to_string(),
            extra_columns: Some(vec![]),
            required_columns: vec![],
            limit: None,
        }
    }

    #[test]
    fn test_load_filters_checkpoint_blank_and_limit() {
        let dir = TempDir::new().unwrap();
        let input = write_file(
            &dir,
            "in.csv",
            "reply_id,content,region\nA,first,n\nB,  ,s\nC,third,e\nD,nan,w\nE,fifth,x\nF,sixth,y\n",
        );
        let checkpoint: Checkpoint = vec!["A".to_string()].into_iter().collect();
        let mut opts = options();
        opts.limit = Some(2);

        let loaded = CsvRecordSource::new(&input).load(&opts, &checkpoint).unwrap();

        let ids: Vec<&str> = loaded.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "E"]);
        assert_eq!(loaded.report.total_rows, 6);
        assert_eq!(loaded.report.skipped_blank, 2);
        assert_eq!(loaded.report.already_done, 1);
        assert_eq!(loaded.report.eligible, 2);
        assert!(!loaded.records[0].data.contains_key("region"));
    }

    #[test]
    fn test_missing_content_column_is_fatal() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.csv", "reply_id,text\nA,hello\n");

        let err = CsvRecordSource::new(&input)
            .load(&options(), &Checkpoint::default())
            .unwrap_err();
        assert!(matches!(err, EtlError::MissingColumnError { ref column, .. } if column == "content"));
    }

    #[test]
    fn test_missing_required_column_is_fatal() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.csv", "reply_id,content\nA,hello\n");
        let mut opts = options();
        opts.required_columns = vec!["sentiment".to_string()];

        let err = CsvRecordSource::new(&input)
            .load(&opts, &Checkpoint::default())
            .unwrap_err();
        assert!(matches!(err, EtlError::MissingColumnError { ref column, .. } if column == "sentiment"));
    }

    #[test]
    fn test_missing_id_column_uses_row_position() {
        let dir = TempDir::new().unwrap();
        let input = write_file(&dir, "in.csv", "content,region\nalpha,n\n,s\ngamma,e\n");
        let mut opts = options();
        opts.extra_columns = None;

        let loaded = CsvRecordSource::new(&input)
            .load(&opts, &Checkpoint::default())
            .unwrap();

        let ids: Vec<&str> = loaded.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "2"]);
        assert_eq!(loaded.extra_columns, vec!["region".to_string()]);
        assert_eq!(loaded.records[1].data["reply_id"], Value::String("2".to_string()));
        assert_eq!(loaded.records[1].data["region"], Value::String("e".to_string()));
    }

    #[test]
    fn test_checkpoint_reads_ids_and_tolerates_garbage() {
        let dir = TempDir::new().unwrap();
        let output = write_file(
            &dir,
            "out.csv",
            "reply_id,content,sentiment\nA,\"a, with comma\",pos\nB,b,neg\n",
        );
        let checkpoint = load_checkpoint(&output, "reply_id");
        assert_eq!(checkpoint.len(), 2);
        assert!(checkpoint.contains("B"));

        let other = load_checkpoint(&output, "id");
        assert!(other.is_empty());

        let absent = load_checkpoint(&dir.path().join("nope.csv"), "reply_id");
        assert!(absent.is_empty());
    }

    #[test]
    fn test_checkpoint_skips_unfinished_and_short_rows() {
        let dir = TempDir::new().unwrap();
        let output = write_file(
            &dir,
            "out.csv",
            "reply_id,content,label\nA,alpha,ALPHA\nB,short\nC,gamma,GAMMA\nD,del",
        );

        let checkpoint = load_checkpoint(&output, "reply_id");
        assert_eq!(checkpoint.len(), 2);
        assert!(checkpoint.contains("A"));
        assert!(checkpoint.contains("C"));
        assert!(!checkpoint.contains("B"));
        assert!(!checkpoint.contains("D"));
    }
}
