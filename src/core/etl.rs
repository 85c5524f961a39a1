use crate::adapters::csv_sink::CsvSink;
use crate::adapters::csv_source::{load_checkpoint, CsvRecordSource, LoadedRecords, SourceOptions};
use crate::core::batcher::partition;
use crate::core::dispatcher::{DispatchSettings, Dispatcher};
use crate::core::metrics::{format_duration, LogProgress, MetricsTracker};
use crate::domain::model::LoadReport;
use crate::domain::ports::{ProgressObserver, Transformer};
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;
use crate::utils::validation::{validate_non_empty_string, validate_positive_number, Validate};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 引擎本身需要的設定，與任務內容無關
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub id_column: String,
    pub content_column: String,
    pub extra_columns: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub cooldown: Duration,
}

impl Validate for EngineConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("source.id_column", &self.id_column)?;
        validate_non_empty_string("source.content_column", &self.content_column)?;
        validate_positive_number("concurrency.batch_size", self.batch_size, 1)?;
        validate_positive_number("concurrency.max_concurrent", self.max_concurrent, 1)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub load: LoadReport,
    pub batches: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub persisted: usize,
    pub lost: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_path: PathBuf,
}

impl RunSummary {
    fn empty(load: LoadReport, started_at: DateTime<Utc>, output_path: PathBuf) -> Self {
        Self {
            load,
            batches: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            persisted: 0,
            lost: 0,
            started_at,
            finished_at: Utc::now(),
            output_path,
        }
    }

    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    pub fn failure_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.failed as f64 / self.processed as f64
        }
    }

    /// 每分鐘處理筆數
    pub fn records_per_minute(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs * 60.0
        } else {
            0.0
        }
    }
}

pub struct EtlEngine {
    config: EngineConfig,
    transformer: Arc<dyn Transformer>,
    observer: Arc<dyn ProgressObserver>,
    monitor: SystemMonitor,
}

impl EtlEngine {
    pub fn new(config: EngineConfig, transformer: Arc<dyn Transformer>) -> Self {
        Self::new_with_monitoring(config, transformer, false)
    }

    pub fn new_with_monitoring(
        config: EngineConfig,
        transformer: Arc<dyn Transformer>,
        monitor_enabled: bool,
    ) -> Self {
        Self {
            config,
            transformer,
            observer: Arc::new(LogProgress),
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 輸出欄位：識別碼、內容、衍生欄位，最後是額外欄位
    pub fn output_columns(&self, extra_columns: &[String]) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        let candidates = [
            self.config.id_column.clone(),
            self.config.content_column.clone(),
        ]
        .into_iter()
        .chain(self.transformer.derived_columns())
        .chain(extra_columns.iter().cloned());

        for column in candidates {
            if !columns.contains(&column) {
                columns.push(column);
            }
        }
        columns
    }

    /// 讀取斷點與輸入，回傳這次要處理的記錄
    pub fn prepare(&self) -> Result<LoadedRecords> {
        let checkpoint = load_checkpoint(&self.config.output_path, &self.config.id_column);
        let options = SourceOptions {
            id_column: self.config.id_column.clone(),
            content_column: self.config.content_column.clone(),
            extra_columns: self.config.extra_columns.clone(),
            required_columns: self.transformer.required_columns(),
            limit: self.config.limit,
        };
        CsvRecordSource::new(&self.config.input_path).load(&options, &checkpoint)
    }

    pub async fn run(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        tracing::info!(
            "🚀 Starting '{}' over {}",
            self.transformer.name(),
            self.config.input_path.display()
        );
        self.monitor.log_stats("Start");

        let loaded = self.prepare()?;
        if loaded.records.is_empty() {
            tracing::info!("✨ Nothing new to process");
            return Ok(RunSummary::empty(
                loaded.report,
                started_at,
                self.config.output_path.clone(),
            ));
        }

        let columns = self.output_columns(&loaded.extra_columns);
        let sink = Arc::new(CsvSink::open(&self.config.output_path, columns)?);

        let eligible = loaded.records.len();
        let batches = partition(loaded.records, self.config.batch_size);
        let batch_count = batches.len();
        tracing::info!(
            "⚙️ Dispatching {} records in {} batches (max {} concurrent, cooldown {:?})",
            eligible,
            batch_count,
            self.config.max_concurrent,
            self.config.cooldown
        );

        let metrics = Arc::new(MetricsTracker::new(eligible));
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.transformer),
            sink,
            metrics,
            Arc::clone(&self.observer),
            DispatchSettings {
                max_concurrent: self.config.max_concurrent,
                cooldown: self.config.cooldown,
            },
        );
        let totals = dispatcher.run(batches).await;

        let summary = RunSummary {
            load: loaded.report,
            batches: batch_count,
            processed: totals.processed,
            succeeded: totals.succeeded,
            failed: totals.failed,
            persisted: totals.persisted,
            lost: totals.lost,
            started_at,
            finished_at: Utc::now(),
            output_path: self.config.output_path.clone(),
        };

        tracing::info!(
            "✅ Processed {} records in {} ({:.1} rec/min)",
            summary.processed,
            format_duration(summary.elapsed()),
            summary.records_per_minute()
        );
        tracing::info!(
            "📊 Succeeded {}, failed {} ({:.1}%), saved {} to {}",
            summary.succeeded,
            summary.failed,
            summary.failure_rate() * 100.0,
            summary.persisted,
            summary.output_path.display()
        );
        if summary.lost > 0 {
            tracing::warn!(
                "⚠️ {} rows could not be saved; they will be picked up by the next run",
                summary.lost
            );
        }
        self.monitor.log_final_stats();

        Ok(summary)
    }
}
