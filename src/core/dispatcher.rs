use crate::adapters::csv_sink::CsvSink;
use crate::core::metrics::MetricsTracker;
use crate::core::sanitizer::sanitize;
use crate::domain::model::{Batch, BatchReport, TransformResult};
use crate::domain::ports::{ProgressObserver, Transformer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchSettings {
    pub max_concurrent: usize,
    /// 每個批次佔用並發槽位的最短時間
    pub cooldown: Duration,
}

/// 批次任務的生命週期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Cooling,
    Done,
}

struct BatchContext {
    transformer: Arc<dyn Transformer>,
    sink: Arc<CsvSink>,
    metrics: Arc<MetricsTracker>,
    observer: Arc<dyn ProgressObserver>,
    required_fields: Vec<String>,
    cooldown: Duration,
}

pub struct Dispatcher {
    context: Arc<BatchContext>,
    max_concurrent: usize,
}

fn trace_state(batch: usize, state: TaskState) {
    tracing::trace!(batch, state = ?state, "batch task state");
}

impl BatchContext {
    /// 批次內逐筆呼叫轉換，整批一次寫入
    async fn process(&self, index: usize, batch: &Batch) -> BatchReport {
        let mut report = BatchReport {
            processed: batch.len(),
            ..BatchReport::default()
        };
        let mut rows = Vec::with_capacity(batch.len());

        for record in batch {
            let transformer = Arc::clone(&self.transformer);
            let content = record.content.clone();
            // 單筆 panic 只讓這一筆失敗，同批其他記錄照常寫出
            let task = tokio::spawn(async move { transformer.transform(&content).await });
            let result = match task.await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => TransformResult::failure(e.to_string()),
                Err(e) => TransformResult::failure(format!("transform aborted: {}", e)),
            };

            match sanitize(record, result, &self.required_fields) {
                Ok(row) => rows.push(row),
                Err(marker) => {
                    report.failed += 1;
                    tracing::warn!("❌ Record {} failed: {}", marker.id, marker.reason);
                }
            }
        }
        report.succeeded = rows.len();

        match self.sink.append(&rows).await {
            Ok(written) => report.persisted = written,
            Err(e) => {
                report.lost = rows.len();
                tracing::error!(
                    "💥 Batch {} could not be saved to {}: {} ({} rows lost until the next run)",
                    index,
                    self.sink.path().display(),
                    e,
                    rows.len()
                );
            }
        }

        report
    }

    /// 整批未能完成時全數記為失敗，並照常通知觀察者
    fn abandon(&self, size: usize) -> BatchReport {
        let report = BatchReport {
            processed: size,
            failed: size,
            ..BatchReport::default()
        };
        self.observer.on_batch_done(&self.metrics.record_batch(&report));
        report
    }

    async fn run_task(&self, index: usize, batch: Batch, semaphore: Arc<Semaphore>) -> BatchReport {
        trace_state(index, TaskState::Queued);
        let permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!("❌ Batch {} never got a slot: {}", index, e);
                return self.abandon(batch.len());
            }
        };

        trace_state(index, TaskState::Running);
        let started = Instant::now();
        let report = self.process(index, &batch).await;

        let elapsed = started.elapsed();
        if elapsed < self.cooldown {
            trace_state(index, TaskState::Cooling);
            tokio::time::sleep(self.cooldown - elapsed).await;
        }
        drop(permit);
        trace_state(index, TaskState::Done);

        self.observer.on_batch_done(&self.metrics.record_batch(&report));
        report
    }
}

impl Dispatcher {
    pub fn new(
        transformer: Arc<dyn Transformer>,
        sink: Arc<CsvSink>,
        metrics: Arc<MetricsTracker>,
        observer: Arc<dyn ProgressObserver>,
        settings: DispatchSettings,
    ) -> Self {
        let required_fields = transformer.derived_columns();
        Self {
            context: Arc::new(BatchContext {
                transformer,
                sink,
                metrics,
                observer,
                required_fields,
                cooldown: settings.cooldown,
            }),
            max_concurrent: settings.max_concurrent.max(1),
        }
    }

    /// 所有批次立即送出，由信號量限制同時執行的數量；回傳整體計數
    pub async fn run(&self, batches: Vec<Batch>) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(batches.len());

        for (index, batch) in batches.into_iter().enumerate() {
            let size = batch.len();
            let context = Arc::clone(&self.context);
            let semaphore = Arc::clone(&semaphore);
            let handle =
                tokio::spawn(async move { context.run_task(index, batch, semaphore).await });
            handles.push((index, size, handle));
        }

        let mut totals = BatchReport::default();
        for (index, size, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!("💥 Batch {} task aborted: {}", index, e);
                    self.context.abandon(size)
                }
            };
            totals.processed += report.processed;
            totals.succeeded += report.succeeded;
            totals.failed += report.failed;
            totals.persisted += report.persisted;
            totals.lost += report.lost;
        }

        totals
    }
}
