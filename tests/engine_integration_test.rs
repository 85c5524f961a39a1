use async_trait::async_trait;
use notate_etl::{EngineConfig, EtlEngine, EtlError, Result, TransformResult, Transformer};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// 把內容轉成大寫；內容為 "fail" 時回報錯誤，"panic" 時直接 panic
struct ShoutTransform {
    calls: AtomicUsize,
}

impl ShoutTransform {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Transformer for ShoutTransform {
    fn name(&self) -> &str {
        "shout"
    }

    fn derived_columns(&self) -> Vec<String> {
        vec!["label".to_string()]
    }

    async fn transform(&self, content: &str) -> Result<TransformResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match content {
            "fail" => Err(EtlError::ProcessingError {
                message: "model refused".to_string(),
            }),
            "panic" => panic!("transform blew up"),
            _ => {
                let mut fields = Map::new();
                fields.insert("label".to_string(), Value::String(content.to_uppercase()));
                Ok(TransformResult::success(fields, content.to_uppercase()))
            }
        }
    }
}

fn write_input(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("input.csv");
    std::fs::write(&path, body).unwrap();
    path
}

fn config(dir: &TempDir, input: &Path) -> EngineConfig {
    EngineConfig {
        input_path: input.to_path_buf(),
        output_path: dir.path().join("out").join("result.csv"),
        id_column: "reply_id".to_string(),
        content_column: "content".to_string(),
        extra_columns: None,
        limit: None,
        batch_size: 1,
        max_concurrent: 4,
        cooldown: Duration::ZERO,
    }
}

fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().iter().map(str::to_string).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (headers, rows)
}

#[tokio::test]
async fn test_failed_record_is_retried_on_next_run_only() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "reply_id,content\nA,alpha\nB,fail\nC,gamma\n");
    let mut config = config(&dir, &input);
    config.max_concurrent = 2;
    let output = config.output_path.clone();

    let transform = ShoutTransform::new();
    let engine = EtlEngine::new(config.clone(), transform.clone());
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.load.eligible, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.persisted, 2);
    assert_eq!(summary.lost, 0);

    let (headers, rows) = read_rows(&output);
    assert_eq!(headers, vec!["reply_id", "content", "label"]);
    let mut ids: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["A", "C"]);

    // 第二次只重試 B，而 B 仍失敗
    let second = EtlEngine::new(config, transform.clone()).run().await.unwrap();
    assert_eq!(second.load.checkpoint_size, 2);
    assert_eq!(second.load.already_done, 2);
    assert_eq!(second.processed, 1);
    assert_eq!(second.failed, 1);
    assert_eq!(second.persisted, 0);
    assert_eq!(transform.calls.load(Ordering::SeqCst), 4);

    let (_, rows) = read_rows(&output);
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_resume_from_partial_output() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "reply_id,content\n1,one\n2,two\n3,three\n");
    let config = config(&dir, &input);
    std::fs::create_dir_all(config.output_path.parent().unwrap()).unwrap();
    std::fs::write(&config.output_path, "reply_id,content,label\n1,one,ONE\n").unwrap();

    let transform = ShoutTransform::new();
    let summary = EtlEngine::new(config.clone(), transform.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.load.total_rows, 3);
    assert_eq!(summary.load.already_done, 1);
    assert_eq!(summary.processed, 2);
    assert_eq!(transform.calls.load(Ordering::SeqCst), 2);

    let (headers, rows) = read_rows(&config.output_path);
    assert_eq!(headers, vec!["reply_id", "content", "label"]);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().filter(|r| r[0] == "1").count(), 1);
    assert!(rows.iter().any(|r| r == &vec!["3", "three", "THREE"]));
}

#[tokio::test]
async fn test_nothing_to_do_leaves_output_untouched() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "reply_id,content\n1,one\n");
    let config = config(&dir, &input);
    std::fs::create_dir_all(config.output_path.parent().unwrap()).unwrap();
    std::fs::write(&config.output_path, "reply_id,content,label\n1,one,ONE\n").unwrap();

    let summary = EtlEngine::new(config.clone(), ShoutTransform::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.load.eligible, 0);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.batches, 0);
    assert_eq!(
        std::fs::read_to_string(&config.output_path).unwrap(),
        "reply_id,content,label\n1,one,ONE\n"
    );
}

#[tokio::test]
async fn test_cooldown_paces_each_slot() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "reply_id,content\n1,a\n2,b\n3,c\n4,d\n");
    let mut config = config(&dir, &input);
    config.max_concurrent = 1;
    config.cooldown = Duration::from_millis(60);

    let started = std::time::Instant::now();
    let summary = EtlEngine::new(config, ShoutTransform::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 4);
    assert!(started.elapsed() >= Duration::from_millis(240));
}

#[tokio::test]
async fn test_cooldown_holds_every_slot_of_a_saturated_pool() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "reply_id,content\n1,a\n2,b\n3,c\n4,d\n");
    let mut config = config(&dir, &input);
    config.max_concurrent = 2;
    config.cooldown = Duration::from_millis(60);

    let started = std::time::Instant::now();
    let summary = EtlEngine::new(config, ShoutTransform::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.batches, 4);
    assert_eq!(summary.succeeded, 4);
    // 兩個槽位各輪兩批
    assert!(started.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn test_batches_limit_and_blank_rows() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        &dir,
        "reply_id,content,author\n1,one,ann\n2,,bob\n3,nan,cat\n4,four,dan\n5,five,eve\n6,six,fay\n",
    );
    let mut config = config(&dir, &input);
    config.batch_size = 2;
    config.limit = Some(3);

    let summary = EtlEngine::new(config.clone(), ShoutTransform::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.load.skipped_blank, 2);
    assert_eq!(summary.load.eligible, 3);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.persisted, 3);

    let (headers, rows) = read_rows(&config.output_path);
    assert_eq!(headers, vec!["reply_id", "content", "label", "author"]);
    let mut ids: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "4", "5"]);
    assert!(rows.iter().any(|r| r == &vec!["4", "four", "FOUR", "dan"]));
}

#[tokio::test]
async fn test_multiline_and_quoted_content_stays_one_row() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        &dir,
        "reply_id,content\n1,\"line one\nline two, with \"\"quotes\"\"\"\n2,plain\n",
    );
    let config = config(&dir, &input);

    let summary = EtlEngine::new(config.clone(), ShoutTransform::new())
        .run()
        .await
        .unwrap();
    assert_eq!(summary.persisted, 2);

    let (_, rows) = read_rows(&config.output_path);
    assert_eq!(rows.len(), 2);
    let row = rows.iter().find(|r| r[0] == "1").unwrap();
    assert_eq!(row[1], "line one line two, with \"quotes\"");
    assert_eq!(row[2], "LINE ONE LINE TWO, WITH \"QUOTES\"");
}

#[tokio::test]
async fn test_panicking_record_spares_its_batch_mates() {
    let dir = TempDir::new().unwrap();
    let input = write_input(
        &dir,
        "reply_id,content\nA,alpha\nB,panic\nC,gamma\nD,delta\n",
    );
    let mut config = config(&dir, &input);
    config.batch_size = 2;
    config.max_concurrent = 2;

    let summary = EtlEngine::new(config.clone(), ShoutTransform::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.processed, 4);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.persisted, 3);

    let (_, rows) = read_rows(&config.output_path);
    let mut ids: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["A", "C", "D"]);
}

#[tokio::test]
async fn test_resume_after_interrupted_write() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "reply_id,content\nA,alpha\nB,beta\nC,gamma\n");
    let config = config(&dir, &input);
    std::fs::create_dir_all(config.output_path.parent().unwrap()).unwrap();
    std::fs::write(
        &config.output_path,
        "reply_id,content,label\nA,alpha,ALPHA\nB,be",
    )
    .unwrap();

    let summary = EtlEngine::new(config.clone(), ShoutTransform::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.load.already_done, 1);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.persisted, 2);

    let (headers, rows) = read_rows(&config.output_path);
    assert_eq!(headers, vec!["reply_id", "content", "label"]);
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.len() == 3));
    assert!(rows.iter().any(|r| r == &vec!["B", "beta", "BETA"]));
    assert!(rows.iter().any(|r| r == &vec!["C", "gamma", "GAMMA"]));

    // 再跑一次沒有剩餘工作
    let again = EtlEngine::new(config, ShoutTransform::new())
        .run()
        .await
        .unwrap();
    assert_eq!(again.load.eligible, 0);
}

#[tokio::test]
async fn test_missing_content_column_is_fatal() {
    let dir = TempDir::new().unwrap();
    let input = write_input(&dir, "reply_id,text\n1,one\n");
    let config = config(&dir, &input);

    let err = EtlEngine::new(config.clone(), ShoutTransform::new())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, EtlError::MissingColumnError { ref column, .. } if column == "content"));
    assert!(!config.output_path.exists());
}
