//! Resource Aggregation Service
//!
//! Wires the stores, task service, cipher, plugin client and event
//! publisher into an [`Aggregator`], then:
//! - seeds connection methods from configuration
//! - rediscovers every onboarded device in the background
//! - runs the periodic plugin health check
//! until interrupted.

use agg_aggregation::{Aggregator, BroadcastPublisher, Pbkdf2AesGcmCipher, ReqwestPluginClient};
use agg_core::config::load_environment;
use agg_core::AggregationConfig;
use agg_store::Stores;
use agg_task::{InMemoryTaskService, TaskEvent, TaskMetrics};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "agg-service")]
#[command(about = "Aggregates plugin-managed hardware endpoints into one inventory")]
struct Args {
    /// Configuration file (JSON or YAML); defaults to the standard search paths
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Skip the startup rediscovery of onboarded devices
    #[arg(long)]
    no_rediscovery: bool,

    /// Print collected Prometheus metrics on shutdown
    #[arg(long)]
    dump_metrics: bool,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("agg_service=info".parse()?)
        .add_directive("agg_aggregation=info".parse()?)
        .add_directive("agg_store=info".parse()?)
        .add_directive("agg_task=info".parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn task_metrics_text(metrics: &TaskMetrics) -> String {
    use prometheus::Encoder;
    let mut buffer = Vec::new();
    if prometheus::TextEncoder::new()
        .encode(&metrics.registry().gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Environment from /etc/aggregation/environment or .env (if present)
    load_environment();

    let args = Args::parse();
    init_tracing(args.json_logs)?;

    let config = match &args.config {
        Some(path) => AggregationConfig::load(path),
        None => AggregationConfig::load_default(),
    }
    .context("failed to load aggregation configuration")?
    .with_env_overrides();
    info!(
        on_disk = %config.on_disk_url,
        in_memory = %config.in_memory_url,
        "Starting resource aggregation service"
    );

    // --- Collaborators ---
    let stores = Stores::connect(&config.on_disk_url, &config.in_memory_url)
        .await
        .context("failed to connect the key-value stores")?;
    let task_metrics = Arc::new(TaskMetrics::new().context("failed to register task metrics")?);
    let tasks = Arc::new(InMemoryTaskService::new(Arc::clone(&task_metrics)));
    let cipher = Arc::new(
        Pbkdf2AesGcmCipher::from_key_file(&config.key_path, config.pbkdf2_iterations)
            .with_context(|| format!("failed to load master key from {}", config.key_path))?,
    );
    let client = Arc::new(
        ReqwestPluginClient::new(config.south_bound_timeout()).context("failed to build plugin HTTP client")?,
    );
    let publisher = Arc::new(BroadcastPublisher::default());
    let mut events = publisher.subscribe();
    let mut task_events = tasks.subscribe();

    let config = Arc::new(config);
    let aggregator = Aggregator::new(Arc::clone(&config), stores, tasks, client, cipher, publisher);

    if let Err(e) = aggregator.add_connection_methods().await {
        error!("Failed to seed connection methods: {}", e);
    }

    // --- Background work ---
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(
                origin = %event.origin,
                event_type = %event.event_type,
                collection = %event.collection,
                "Resource event"
            );
        }
    });
    let task_log = tokio::spawn(async move {
        while let Ok(event) = task_events.recv().await {
            match event {
                TaskEvent::Created(id) => debug!(task_id = %id, "Task created"),
                TaskEvent::Updated(id, state, percent) => debug!(task_id = %id, %state, percent, "Task updated"),
            }
        }
    });

    let health = Arc::new(aggregator.health_monitor());
    let health_handle = tokio::spawn(health.run());
    info!("Started plugin health monitor");

    let rediscovery_handle = if args.no_rediscovery {
        None
    } else {
        let aggregator = aggregator.clone();
        Some(tokio::spawn(async move {
            let count = aggregator.rediscover_resources().await;
            info!(targets = count, "Startup rediscovery finished");
        }))
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down resource aggregation service");

    health_handle.abort();
    if let Some(handle) = rediscovery_handle {
        if !handle.is_finished() {
            warn!("Rediscovery still running at shutdown, aborting");
        }
        handle.abort();
    }
    event_log.abort();
    task_log.abort();

    if args.dump_metrics {
        println!("{}", agg_store::metrics::gather_metrics());
        println!("{}", task_metrics_text(&task_metrics));
    }
    Ok(())
}
