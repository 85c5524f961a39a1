use crate::core::metrics::MetricsSnapshot;
use crate::domain::model::TransformResult;
use crate::utils::error::Result;
use async_trait::async_trait;

/// 單筆記錄的外部轉換（LLM、embedding 等）
///
/// 實作回傳的 `Err` 會被引擎視為該筆的 `Failure`，不會中斷批次。
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    /// 成功結果必須帶齊的衍生欄位，同時決定輸出欄位順序
    fn derived_columns(&self) -> Vec<String>;

    /// 輸入檔必須存在的額外欄位
    fn required_columns(&self) -> Vec<String> {
        Vec::new()
    }

    async fn transform(&self, content: &str) -> Result<TransformResult>;
}

/// 進度觀察者，只讀取指標，不影響流程
pub trait ProgressObserver: Send + Sync {
    fn on_batch_done(&self, snapshot: &MetricsSnapshot);
}
