use clap::Parser;
use notate_etl::adapters::csv_source::{load_checkpoint, CsvRecordSource, SourceOptions};
use notate_etl::utils::{logger, validation::Validate};
use notate_etl::{build_transformer, EtlEngine, EtlError, TomlConfig};

#[derive(Parser)]
#[command(name = "notate-etl")]
#[command(about = "Concurrent CSV annotation with LLM and embedding transforms")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "notate.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Override monitoring setting from config
    #[arg(long)]
    monitor: Option<bool>,

    /// Show what would be processed without calling any model
    #[arg(long)]
    dry_run: bool,

    /// Override source.limit (0 or less means unlimited)
    #[arg(long)]
    limit: Option<i64>,

    /// Override concurrency.max_concurrent
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Override concurrency.cooldown_seconds
    #[arg(long)]
    cooldown: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match TomlConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 初始化日誌
    if config.json_logs() {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }
    tracing::info!("🚀 Starting notate-etl");
    tracing::info!("📁 Loaded configuration from: {}", args.config);

    // 應用命令列覆蓋設定
    if let Some(limit) = args.limit {
        config.source.limit = Some(limit);
        tracing::info!("🔧 Limit overridden to: {}", limit);
    }
    if let Some(max_concurrent) = args.max_concurrent {
        config.concurrency.max_concurrent = max_concurrent;
        tracing::info!("🔧 Max concurrent overridden to: {}", max_concurrent);
    }
    if let Some(cooldown) = args.cooldown {
        config.concurrency.cooldown_seconds = cooldown;
        tracing::info!("🔧 Cooldown overridden to: {}s", cooldown);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }
    tracing::info!("✅ Configuration loaded and validated successfully");

    display_config_summary(&config, &args);

    let monitor_enabled = args.monitor.unwrap_or_else(|| config.monitoring_enabled());
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let outcome = if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No model calls will be made");
        perform_dry_run(&config).await
    } else {
        run(&config, monitor_enabled).await
    };

    if let Err(e) = outcome {
        tracing::error!(
            "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        let exit_code = e.severity().exit_code();
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

async fn run(config: &TomlConfig, monitor_enabled: bool) -> Result<(), EtlError> {
    let transformer = build_transformer(config).await?;
    let engine = EtlEngine::new_with_monitoring(config.engine_config(), transformer, monitor_enabled);
    let summary = engine.run().await?;

    println!("✅ Run completed in {:.1}s", summary.elapsed().as_secs_f64());
    println!(
        "📊 Eligible {}, processed {}, succeeded {}, failed {} ({:.1}%)",
        summary.load.eligible,
        summary.processed,
        summary.succeeded,
        summary.failed,
        summary.failure_rate() * 100.0
    );
    println!("📁 {} rows saved to: {}", summary.persisted, summary.output_path.display());
    if summary.lost > 0 {
        println!("⚠️ {} rows were not saved and will be retried next run", summary.lost);
    }
    Ok(())
}

fn display_config_summary(config: &TomlConfig, args: &Args) {
    println!("📋 Configuration Summary:");
    println!("  Pipeline: {} ({:?})", config.pipeline.name, config.task());
    if let Some(description) = &config.pipeline.description {
        println!("  Description: {}", description);
    }
    println!("  Input: {}", config.source.input_path);
    println!("  Output: {}", config.output_path());
    println!(
        "  Columns: id='{}', content='{}'",
        config.id_column(),
        config.content_column()
    );
    if let Some(limit) = config.limit() {
        println!("  Limit: {}", limit);
    }
    println!(
        "  Concurrency: batch size {}, max {} in flight, cooldown {:.1}s",
        config.concurrency.batch_size,
        config.concurrency.max_concurrent,
        config.concurrency.cooldown_seconds
    );
    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }
    println!();
}

/// 只讀取斷點與輸入，報告本次會處理的記錄數，不建立任何遠端連線
async fn perform_dry_run(config: &TomlConfig) -> Result<(), EtlError> {
    let engine = config.engine_config();
    let checkpoint = load_checkpoint(&engine.output_path, &engine.id_column);
    let options = SourceOptions {
        id_column: engine.id_column.clone(),
        content_column: engine.content_column.clone(),
        extra_columns: engine.extra_columns.clone(),
        required_columns: config.required_columns(),
        limit: engine.limit,
    };
    let loaded = CsvRecordSource::new(&engine.input_path).load(&options, &checkpoint)?;
    let report = &loaded.report;

    println!("🔍 Dry Run Analysis:");
    println!("  Rows in input: {}", report.total_rows);
    println!("  Ids already in output: {}", report.checkpoint_size);
    println!("  Skipped (blank content): {}", report.skipped_blank);
    println!("  Skipped (already done): {}", report.already_done);
    println!("  Eligible this run: {}", report.eligible);
    println!("  Carried columns: {}", loaded.extra_columns.join(", "));
    if let Some(first) = loaded.records.first() {
        let preview: String = first.content.chars().take(80).collect();
        println!("  First record: {} → {}", first.id, preview);
    }
    Ok(())
}
