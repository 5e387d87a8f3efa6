use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use offload_core::config::FileConfig;
use offload_core::{
    AppCache, BackgroundTask, Engine, Instrument, Settings, TaskArgs, TaskError, TaskHandler,
    TaskId, TaskRequest, TaskStatus, blocking_fn, cached_query, handler_fn, memoize,
};

#[derive(Parser, Debug)]
#[command(about = "Run a few report jobs through the background engine")]
struct CliArgs {
    /// TOML file with `[engine]`, `[cache]` and `[instrument]` overrides.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Override the number of workers.
    #[clap(long)]
    workers: Option<usize>,

    /// Give up waiting on a task after this many seconds.
    #[clap(long, default_value_t = 10)]
    wait_secs: u64,
}

/// Flaky importer: fails until its retry budget is spent.
struct InvoiceImport {
    failures_left: AtomicU32,
}

#[async_trait]
impl TaskHandler for InvoiceImport {
    async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
        let source: String = args.keyword("source")?;
        let left = self.failures_left.load(Ordering::Relaxed);
        if left > 0 {
            self.failures_left.fetch_sub(1, Ordering::Relaxed);
            return Err(TaskError::new(format!(
                "could not reach {source} (failures left={left})"
            )));
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(json!({ "source": source, "imported": 128 }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DashboardTotals {
    year: i32,
    invoices: u64,
    revenue: f64,
}

fn employee_statistics(args: &TaskArgs) -> Result<Value, TaskError> {
    let department: String = args.keyword("department")?;
    std::thread::sleep(Duration::from_millis(50));
    Ok(json!({ "department": department, "total": 12, "active": 9, "inactive": 3 }))
}

async fn wait_for(engine: &Engine, id: TaskId, limit: Duration) -> Result<TaskStatus> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let status = engine
            .status(id)
            .with_context(|| format!("task {id} is not registered"))?;
        if status.is_finished() {
            return Ok(status);
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("task {id} still {} after {limit:?}", status.state);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn load_settings(cli_args: &CliArgs) -> Result<Settings> {
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let mut settings = Settings::resolve(file_config)?;
    if let Some(workers) = cli_args.workers {
        settings.engine.workers = workers;
    }
    settings.validate()?;
    Ok(settings)
}

/// Memoized dashboard query plus an explicit invalidation after a write.
fn cache_demo(settings: &Settings) -> Result<()> {
    let cache = Arc::new(AppCache::from_settings(&settings.cache));
    let loads = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&loads);

    let totals = memoize(
        Arc::clone(&cache),
        "dashboard_totals",
        settings.cache.default_ttl,
        move |year: &i32| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok::<_, TaskError>(DashboardTotals {
                year: *year,
                invoices: 342,
                revenue: 18_250.5,
            })
        },
    )
    .with_key(|year: &i32| format!("dashboard_totals:{year}"));

    let first = totals.call(&2024)?;
    let second = totals.call(&2024)?;
    info!(
        year = first.year,
        invoices = second.invoices,
        revenue = second.revenue,
        loads = loads.load(Ordering::Relaxed),
        "dashboard totals served"
    );

    totals.invalidate(&2024);
    totals.call(&2024)?;
    info!(loads = loads.load(Ordering::Relaxed), "dashboard totals after invalidation");

    let timer = Instrument::new("count_employees", &settings.instrument);
    let count: u64 = cached_query(
        &cache,
        "total_count:employees",
        settings.cache.default_ttl,
        &timer,
        || Ok::<_, TaskError>(12),
    )?;
    info!(count, cached = cache.len(), "cached query");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("failed to install tracing subscriber")?;

    let settings = load_settings(&cli_args)?;
    info!(workers = settings.engine.workers, "starting engine");

    let engine = Engine::new(settings.engine.clone());
    engine.start()?;

    let stats = BackgroundTask::new("employee_statistics", blocking_fn(employee_statistics));
    let monthly = BackgroundTask::new(
        "monthly_report",
        handler_fn(|args| async move {
            let year: i32 = args.keyword("year")?;
            let month: u32 = args.keyword("month")?;
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(json!({ "period": format!("{year}-{month:02}"), "revenue": 1520.75 }))
        }),
    )
    .priority(2);
    let import: Arc<dyn TaskHandler> = Arc::new(InvoiceImport {
        failures_left: AtomicU32::new(1),
    });

    let ids = [
        stats.submit(&engine, TaskArgs::new().with_kwarg("department", "finance"))?,
        monthly.submit(
            &engine,
            TaskArgs::new().with_kwarg("year", 2024).with_kwarg("month", 3),
        )?,
        engine.submit(TaskRequest::new("import_invoices", Arc::clone(&import)).kwarg("source", "erp"))?,
        engine.submit(TaskRequest::new("import_invoices", import).kwarg("source", "erp"))?,
    ];

    let limit = Duration::from_secs(cli_args.wait_secs);
    for id in ids {
        let status = wait_for(&engine, id, limit).await?;
        match &status.error {
            Some(error) => warn!(task_id = %id, name = %status.name, state = %status.state, error, "task finished"),
            None => info!(
                task_id = %id,
                name = %status.name,
                state = %status.state,
                result = %engine.result(id).unwrap_or(serde_json::Value::Null),
                "task finished"
            ),
        }
    }

    let inline = stats
        .run_sync(TaskArgs::new().with_kwarg("department", "sales"))
        .await?;
    info!(%inline, "ran employee_statistics inline");

    cache_demo(&settings)?;

    let counts = engine.counts();
    info!(
        completed = counts.completed,
        failed = counts.failed,
        cancelled = counts.cancelled,
        "task counts"
    );

    let report = engine.shutdown().await;
    info!(
        unfinished_workers = report.unfinished_workers,
        cancelled_tasks = report.cancelled_tasks,
        "engine stopped"
    );
    Ok(())
}
