use crate::domain::model::OutputRow;
use crate::utils::error::{EtlError, Result};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// 追加寫入的 CSV 輸出；所有批次共用同一把寫入鎖
pub struct CsvSink {
    path: PathBuf,
    columns: Vec<String>,
    write_lock: Mutex<()>,
}

/// 讀取既有輸出檔的表頭；檔案不存在或為空時回傳 `None`
fn existing_header(path: &Path) -> Result<Option<Vec<String>>> {
    if !path.exists() || std::fs::metadata(path)?.len() == 0 {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut header = csv::StringRecord::new();
    if reader.read_record(&mut header)? {
        Ok(Some(header.iter().map(str::to_string).collect()))
    } else {
        Ok(None)
    }
}

/// 中斷的寫入可能留下沒有換行結尾的半列；截回最後一個完整換行，回傳截掉的位元組數
pub fn trim_partial_row(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(0);
    }

    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::with_capacity(len as usize);
    file.read_to_end(&mut bytes)?;
    let keep = bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|p| p as u64 + 1)
        .unwrap_or(0);
    file.set_len(keep)?;

    tracing::warn!(
        "✂️ Dropped {} bytes of an unfinished row at the end of {}",
        len - keep,
        path.display()
    );
    Ok(len - keep)
}

fn write_rows(path: &Path, columns: &[String], rows: &[Vec<String>]) -> Result<usize> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let needs_header = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if needs_header {
        writer.write_record(columns)?;
    }
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(rows.len())
}

impl CsvSink {
    /// 建立輸出目錄；若輸出檔已存在，先截掉未寫完的尾列，再沿用其表頭順序
    pub fn open(path: impl Into<PathBuf>, columns: Vec<String>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        trim_partial_row(&path)?;

        let columns = match existing_header(&path)? {
            Some(header) if header != columns => {
                tracing::warn!(
                    "⚠️ {} already has columns {:?}, keeping that order",
                    path.display(),
                    header
                );
                header
            }
            _ => columns,
        };

        Ok(Self {
            path,
            columns,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// 追加一批資料列，回傳寫入筆數；檔案為空時先寫表頭
    pub async fn append(&self, rows: &[OutputRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let cells: Vec<Vec<String>> = rows
            .iter()
            .map(|row| row.cells(&self.columns).collect())
            .collect();
        let path = self.path.clone();
        let columns = self.columns.clone();

        let _guard = self.write_lock.lock().await;
        let written = tokio::task::spawn_blocking(move || write_rows(&path, &columns, &cells))
            .await
            .map_err(|e| EtlError::ProcessingError {
                message: format!("CSV writer task failed: {}", e),
            })??;

        tracing::debug!("💾 Appended {} rows to {}", rows.len(), self.path.display());
        Ok(written)
    }
}
