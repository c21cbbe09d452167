use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use scribed::audio::WavDecoder;
use scribed::cli::{Cli, Commands, ConfigAction, ModelAction, OutputFormat};
use scribed::clock::SystemClock;
use scribed::config::Config;
use scribed::job::{Job, JobId, JobOptions, JobStatus};
use scribed::orchestrator::{Dispatcher, ManualDispatcher, Orchestrator, OrchestratorParts};
use scribed::rate_limit::RateLimiter;
use scribed::store::{KeySpace, MemoryStore, SharedStore};
use scribed::stt::{WhisperConfig, WhisperLoader};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    tracing::debug!(version = %scribed::version_string(), "scribed starting");

    match cli.command {
        Commands::Transcribe {
            file,
            language,
            translate,
            word_timestamps,
            output,
            window,
            checkpoint_interval,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(secs) = window {
                config.pipeline.window_secs = secs as f64;
            }
            if let Some(secs) = checkpoint_interval {
                config.pipeline.checkpoint_interval_secs = secs;
            }
            let options = JobOptions {
                language_in: language,
                language_out: translate.then(|| "en".to_string()),
                word_timestamps,
                ..JobOptions::default()
            };
            let job = transcribe(&config, &file, options).await?;
            print_job(&job, output)?;
            if job.status != JobStatus::Completed {
                std::process::exit(1);
            }
        }
        Commands::Status { job_id, output } => {
            let config = load_config(cli.config.as_deref())?;
            let orchestrator = shared_orchestrator(&config).await?;
            let job = orchestrator.job(&JobId::from(job_id)).await?;
            print_job(&job, output)?;
        }
        Commands::Cancel { job_id } => {
            let config = load_config(cli.config.as_deref())?;
            let orchestrator = shared_orchestrator(&config).await?;
            let job = orchestrator.cancel(&JobId::from(job_id)).await?;
            println!("{} {}", job.id, status_label(job.status));
        }
        Commands::Resume { job_id } => {
            let config = load_config(cli.config.as_deref())?;
            let orchestrator = Arc::new(shared_orchestrator(&config).await?);
            let id = JobId::from(job_id);
            cancel_on_ctrl_c(orchestrator.clone(), id.clone());
            let job = orchestrator.resume(&id).await?;
            print_job(&job, OutputFormat::Text)?;
            if job.status != JobStatus::Completed {
                std::process::exit(1);
            }
        }
        Commands::Model { action } => {
            let config = load_config(cli.config.as_deref())?;
            handle_model_command(action, &config).await?;
        }
        Commands::RateCheck { client } => {
            let config = load_config(cli.config.as_deref())?;
            let limiter = RateLimiter::new(
                open_store(&config).await?,
                KeySpace::new(config.store.key_prefix.clone()),
                Arc::new(SystemClock),
                &config.rate_limit,
            );
            if limiter.is_allowed(&client).await {
                println!("{} {client}", "allowed".green());
            } else {
                println!("{} {client}", "rate limited".red());
                std::process::exit(1);
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "scribed", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Installs the log subscriber. `RUST_LOG` wins over the flags.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("scribed={level}")));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/scribed/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides apply on top of either.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

async fn open_store(config: &Config) -> Result<Arc<dyn SharedStore>> {
    if let Some(store) = redis_store(config).await? {
        return Ok(store);
    }
    tracing::debug!("Using in-process store");
    Ok(Arc::new(MemoryStore::new()))
}

#[cfg(feature = "redis-store")]
async fn redis_store(config: &Config) -> Result<Option<Arc<dyn SharedStore>>> {
    let Some(url) = &config.store.redis_url else {
        return Ok(None);
    };
    let store = scribed::store::RedisStore::connect(url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {url}"))?;
    Ok(Some(Arc::new(store)))
}

#[cfg(not(feature = "redis-store"))]
async fn redis_store(config: &Config) -> Result<Option<Arc<dyn SharedStore>>> {
    if config.store.redis_url.is_some() {
        bail!("Built without the redis-store feature; store.redis_url cannot be used");
    }
    Ok(None)
}

fn orchestrator(
    config: &Config,
    store: Arc<dyn SharedStore>,
    dispatcher: Arc<dyn Dispatcher>,
) -> Orchestrator {
    Orchestrator::new(
        config,
        OrchestratorParts {
            store,
            loader: Arc::new(WhisperLoader::new(WhisperConfig::from(&config.model))),
            decoder: Arc::new(WavDecoder::new()),
            dispatcher,
            clock: Arc::new(SystemClock),
        },
    )
}

/// Orchestrator against the shared store. Job commands are meaningless
/// against a store that lives only as long as this process.
async fn shared_orchestrator(config: &Config) -> Result<Orchestrator> {
    if config.store.redis_url.is_none() {
        bail!("This command needs a shared store: set store.redis_url or SCRIBED_REDIS_URL");
    }
    let store = open_store(config).await?;
    Ok(orchestrator(config, store, Arc::new(ManualDispatcher::new())))
}

/// Submits `file` and runs it to a terminal status in this process.
async fn transcribe(config: &Config, file: &Path, options: JobOptions) -> Result<Job> {
    config.validate()?;
    let store = open_store(config).await?;
    let orchestrator = Arc::new(orchestrator(config, store, Arc::new(ManualDispatcher::new())));

    let job = orchestrator
        .submit(file, options)
        .await
        .with_context(|| format!("Failed to submit {}", file.display()))?;
    if job.status.is_terminal() {
        return Ok(job);
    }

    cancel_on_ctrl_c(orchestrator.clone(), job.id.clone());
    Ok(orchestrator.run(&job.id).await?)
}

/// First Ctrl-C cancels the job at the next window boundary.
fn cancel_on_ctrl_c(orchestrator: Arc<Orchestrator>, id: JobId) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling {id} after the current window...");
            if let Err(e) = orchestrator.cancel(&id).await {
                eprintln!("Cancel failed: {e}");
            }
        }
    });
}

async fn handle_model_command(action: ModelAction, config: &Config) -> Result<()> {
    let orchestrator = orchestrator(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(ManualDispatcher::new()),
    );
    match action {
        ModelAction::Status => {}
        ModelAction::Load => {
            orchestrator
                .model()
                .ensure_loaded()
                .await
                .with_context(|| format!("Failed to load {}", config.model.path.display()))?;
        }
    }

    let status = orchestrator.model().status();
    println!("Model:   {}", status.name);
    println!(
        "Path:    {} ({})",
        config.model.path.display(),
        if config.model.path.exists() {
            "present"
        } else {
            "missing"
        }
    );
    println!("Backend: {}", scribed::defaults::gpu_backend());
    println!("Loaded:  {}", status.loaded);
    if let Some(device) = status.device {
        println!("Device:  {device}");
        println!("Memory:  {:.1} MB", status.memory_used as f64 / 1_048_576.0);
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let config_path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to render configuration")?
            );
        }
        ConfigAction::Path => println!("{}", config_path.display()),
    }
    Ok(())
}

fn print_job(job: &Job, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(job)?);
        return Ok(());
    }

    let color = std::io::stdout().is_terminal();
    for segment in &job.segments {
        let span = format!(
            "[{} --> {}]",
            format_timestamp(segment.start),
            format_timestamp(segment.end)
        );
        if color {
            println!("{} {}", span.dimmed(), segment.text);
        } else {
            println!("{span} {}", segment.text);
        }
    }

    eprintln!(
        "{} {} {:.1}%",
        job.id,
        status_label(job.status),
        job.progress
    );
    if let Some(message) = &job.error_message {
        eprintln!("{}", message.yellow());
    }
    Ok(())
}

fn status_label(status: JobStatus) -> String {
    match status {
        JobStatus::Completed => status.to_string().green().to_string(),
        JobStatus::Failed => status.to_string().red().to_string(),
        JobStatus::Cancelling | JobStatus::Cancelled => status.to_string().yellow().to_string(),
        JobStatus::Queued | JobStatus::Processing => status.to_string().cyan().to_string(),
    }
}

/// Formats seconds as `HH:MM:SS.mmm`.
fn format_timestamp(secs: f64) -> String {
    let millis = (secs.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        millis / 3_600_000,
        millis / 60_000 % 60,
        millis / 1000 % 60,
        millis % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_cover_hours() {
        assert_eq!(format_timestamp(0.0), "00:00:00.000");
        assert_eq!(format_timestamp(61.5), "00:01:01.500");
        assert_eq!(format_timestamp(3900.0), "01:05:00.000");
    }
}
