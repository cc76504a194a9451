use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use probefan::domain::{Batch, Outcome, Task};
use probefan::progress::ProgressTracker;
use probefan::provider::{EchoAdapter, OpenAiCompatAdapter, ProviderRegistry};
use probefan::resilience::{BreakerRegistry, FrequencyGovernor};
use probefan::runner::TaskExecutor;
use probefan::scheduler::{Scheduler, Strategy};

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("probefan")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("probefan.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run {
            batch,
            strategy,
            workers,
            run_timeout,
            dry_run,
            json,
        } => {
            let options = RunOptions {
                strategy: *strategy,
                workers: *workers,
                run_timeout: *run_timeout,
                dry_run: *dry_run,
                json: *json,
                verbose: cli.is_verbose(),
            };
            handle_run_command(batch, &options, config).await
        }
        Commands::Providers => handle_providers_command(config),
        Commands::Resolve { name } => handle_resolve_command(name, config),
    }
}

struct RunOptions {
    strategy: Option<Strategy>,
    workers: Option<usize>,
    run_timeout: Option<u64>,
    dry_run: bool,
    json: bool,
    verbose: bool,
}

fn build_registry(config: &Config, dry_run: bool) -> Result<ProviderRegistry> {
    let catalog = config.catalog()?;
    if dry_run {
        return Ok(ProviderRegistry::new(catalog).with_fallback_adapter(Arc::new(EchoAdapter)));
    }

    let mut registry = ProviderRegistry::new(catalog);
    for (provider, endpoint) in &config.providers.endpoints {
        let adapter = OpenAiCompatAdapter::new(endpoint)
            .context(format!("Failed to create adapter for {}", provider))?;
        registry.register(provider, Arc::new(adapter));
    }
    Ok(registry)
}

async fn handle_run_command(batch_path: &Path, options: &RunOptions, config: &Config) -> Result<()> {
    info!("Running batch: {}", batch_path.display());

    let batch = Batch::load(batch_path).context(format!("Failed to load batch {}", batch_path.display()))?;
    let expanded = batch.expand(&config.task).context("Failed to expand batch")?;

    let mut scheduler_config = config.scheduler.clone();
    if let Some(strategy) = options.strategy {
        scheduler_config.strategy = strategy;
    }
    if let Some(workers) = options.workers {
        scheduler_config.max_workers = workers;
    }
    if let Some(secs) = options.run_timeout {
        scheduler_config.run_timeout_ms = Some(secs.saturating_mul(1000));
    }

    let executor = Arc::new(TaskExecutor::new(
        build_registry(config, options.dry_run)?,
        Arc::new(FrequencyGovernor::new(config.governor.clone())),
        Arc::new(BreakerRegistry::new(config.breaker.clone())),
        config.retry,
    ));
    let scheduler = Scheduler::new(executor.clone(), scheduler_config);

    let tracker = ProgressTracker::new();
    let run_id = expanded.run_id.clone();
    tracker.create(&run_id, expanded.tasks.len(), expanded.metadata.clone());

    if !options.json {
        println!(
            "{} {} ({} tasks, {})",
            "Run:".green(),
            run_id,
            expanded.tasks.len(),
            scheduler.config().strategy
        );
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling remaining tasks");
            on_interrupt.cancel();
        }
    });

    let mut record = tracker.callback(&run_id);
    let json = options.json;
    let summary = scheduler
        .run_with_cancel(expanded.tasks, cancel, |task, outcome| {
            record(task, outcome);
            print_outcome(task, outcome, json);
        })
        .await;

    let snapshot = tracker.get(&run_id).ok_or_else(|| eyre::eyre!("Run {} vanished from tracker", run_id))?;

    if json {
        let report = serde_json::json!({ "progress": snapshot, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        let status = if summary.failed == 0 {
            "Done:".green()
        } else {
            "Done:".yellow()
        };
        println!(
            "{} {} completed, {} failed ({} cancelled) in {:.1}s{}",
            status,
            summary.completed,
            summary.failed,
            summary.cancelled,
            summary.elapsed.as_secs_f64(),
            if summary.timed_out { " [run timed out]".red().to_string() } else { String::new() }
        );
    }

    if options.verbose {
        for breaker in executor.breakers().snapshots() {
            println!(
                "  breaker {} {} (failures: {})",
                breaker.key.cyan(),
                breaker.state,
                breaker.failure_count
            );
        }
    }

    Ok(())
}

fn print_outcome(task: &Task, outcome: &Outcome, json: bool) {
    if json {
        match serde_json::to_string(outcome) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("Failed to serialize outcome {}: {}", outcome.task_id, e),
        }
        return;
    }

    let target = if outcome.model.is_empty() {
        outcome.provider.clone()
    } else {
        format!("{}:{}", outcome.provider, outcome.model)
    };

    if outcome.success {
        let content = outcome.content.as_deref().unwrap_or_default();
        println!(
            "{} {} {} [{}] {}",
            "ok".green(),
            task.id(),
            task.subject(),
            target,
            preview(content, 80).dimmed()
        );
    } else {
        let reason = outcome
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown failure".to_string());
        println!(
            "{} {} {} [{}] {} (attempts: {})",
            "fail".red(),
            task.id(),
            task.subject(),
            target,
            reason,
            outcome.attempts
        );
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

fn handle_providers_command(config: &Config) -> Result<()> {
    info!("Listing providers");
    let catalog = config.catalog()?;
    let governor = FrequencyGovernor::new(config.governor.clone());

    println!("{}", "Providers:".green());
    for (provider, model) in catalog.providers() {
        let endpoint = config
            .providers
            .endpoints
            .get(provider)
            .map(|e| format!("{} (${})", e.base_url, e.api_key_env))
            .unwrap_or_else(|| "no endpoint".dimmed().to_string());
        println!(
            "  {:<12} {:<28} every {:>4.1}s  {}",
            provider.cyan(),
            model,
            governor.interval_for(provider).as_secs_f64(),
            endpoint
        );
    }

    println!("{}", "Aliases:".green());
    for (alias, target) in catalog.aliases() {
        println!("  {:<16} -> {}", alias, target);
    }
    Ok(())
}

fn handle_resolve_command(name: &str, config: &Config) -> Result<()> {
    info!("Resolving provider: {}", name);
    let catalog = config.catalog()?;
    match catalog.resolve(name) {
        Ok(resolved) => {
            println!("{} -> {}", name, resolved.to_string().green());
            Ok(())
        }
        Err(e) => {
            println!("{} {}", "Unresolved:".red(), e);
            Err(e.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Logging level comes from config, so set it up once config is known
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
