use anyhow::Result;
use clap::{Parser, Subcommand};
use collabd::{
    collab::CollabHub,
    config::CollabConfig,
    tasks::HttpTaskDirectory,
    ws, AppContext,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "collabd",
    about = "OpsDeck collaboration daemon — realtime presence, channels, and task comments",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// WebSocket server port
    #[arg(long, env = "COLLABD_PORT")]
    port: Option<u16>,

    /// Data directory for config.toml and logs
    #[arg(long, env = "COLLABD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "COLLABD_LOG")]
    log: Option<String>,

    /// Bind address for the WebSocket server (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "COLLABD_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "COLLABD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,

    /// Suppress informational output (errors still go to stderr).
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon in the foreground (default when no subcommand given).
    ///
    /// Examples:
    ///   collabd serve
    ///   collabd
    Serve,
    /// Query a running daemon's health endpoint and print it.
    ///
    /// Examples:
    ///   collabd status
    ///   collabd status --port 9000
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = CollabConfig::new(args.port, args.data_dir, args.log, args.bind_address);
            let _log_guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);
            run_server(config).await
        }
        Command::Status => {
            let config = CollabConfig::new(args.port, args.data_dir, args.log, args.bind_address);
            run_status(&config, args.quiet).await
        }
    }
}

async fn run_server(config: CollabConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "collabd starting");
    let config = Arc::new(config);
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        task_api = %config.task_api_url,
        "config loaded"
    );

    let tasks = Arc::new(HttpTaskDirectory::new(
        &config.task_api_url,
        config.task_api_token.clone(),
    ));
    let hub = Arc::new(CollabHub::new(tasks, config.outbox_capacity));

    let ctx = Arc::new(AppContext {
        config,
        hub,
        started_at: std::time::Instant::now(),
    });

    ws::run(ctx).await
}

// ─── collabd status ───────────────────────────────────────────────────────────

async fn run_status(config: &CollabConfig, quiet: bool) -> Result<()> {
    let url = format!("http://{}:{}/health", config.bind_address, config.port);
    let resp = match reqwest::get(&url).await {
        Ok(r) => r,
        Err(_) => {
            eprintln!("error: no daemon answering at {url}");
            eprintln!("       Start one with: collabd serve");
            std::process::exit(1);
        }
    };
    let health: serde_json::Value = resp.json().await?;

    if quiet {
        println!("{}", health["status"].as_str().unwrap_or("unknown"));
        return Ok(());
    }
    println!("Status:          {}", health["status"].as_str().unwrap_or("unknown"));
    println!("Version:         {}", health["version"].as_str().unwrap_or("?"));
    println!("Uptime:          {}s", health["uptime"].as_u64().unwrap_or(0));
    println!("Online users:    {}", health["onlineUsers"].as_u64().unwrap_or(0));
    println!("Active channels: {}", health["activeChannels"].as_u64().unwrap_or(0));
    Ok(())
}

// ─── Logging setup ────────────────────────────────────────────────────────────

/// Initialize tracing with stdout output and optional daily-rotated file
/// output. Returns a `WorkerGuard` that must stay alive for the process
/// lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format)
/// or `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only
/// logging with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("collabd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
