use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{debug, info, LevelFilter};
use tokio_util::sync::CancellationToken;

use squadron::api::{create_router, AppState};
use squadron::db::Database;
use squadron::settings::Settings;

const APP_NAME: &str = "squadron";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common)?;

    let settings = Settings::load(cli.common.config.as_deref())?;
    debug!("resolved settings: {:#?}", settings);

    match cli.command {
        Command::Serve(cmd) => run_serve(settings, cmd),
        Command::Config { command } => handle_config(&settings, command),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
            Ok(())
        }
    }
}

#[tokio::main]
async fn run_serve(settings: Settings, cmd: ServeCommand) -> Result<()> {
    handle_serve(settings, cmd).await
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Squadron - AI coding-agent fleet orchestrator.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the orchestrator server
    Serve(ServeCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct ServeCommand {
    /// Override the listen host
    #[arg(long)]
    host: Option<String>,
    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the resolved configuration as TOML
    Show,
}

fn init_logging(common: &CommonOpts) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    if common.quiet {
        log::set_max_level(LevelFilter::Off);
        return Ok(());
    }

    let level = match common.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("squadron={level},tower_http={level}")));

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        let disable_color =
            std::env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(!disable_color))
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(match common.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });
    builder.try_init().ok();

    Ok(())
}

async fn handle_serve(mut settings: Settings, cmd: ServeCommand) -> Result<()> {
    if let Some(host) = cmd.host {
        settings.server.host = host;
    }
    if let Some(port) = cmd.port {
        settings.server.port = port;
    }

    std::fs::create_dir_all(&settings.storage.data_dir).with_context(|| {
        format!(
            "creating data directory {}",
            settings.storage.data_dir.display()
        )
    })?;
    std::fs::create_dir_all(&settings.storage.state_dir).with_context(|| {
        format!(
            "creating state directory {}",
            settings.storage.state_dir.display()
        )
    })?;

    let db = Database::new(&settings.db_path()).await?;
    let state = AppState::build(&db, &settings);

    // Background discovery of external opencode nodes.
    let shutdown = CancellationToken::new();
    state.registry.spawn(shutdown.clone());

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("parsing listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Squadron listening on http://{}", addr);

    let supervisor = state.supervisor.clone();
    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    // Backends are owned by this process; leave nothing orphaned.
    info!("Shutting down squad backends");
    shutdown.cancel();
    supervisor.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

fn handle_config(settings: &Settings, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let rendered =
                toml::to_string_pretty(settings).context("serializing configuration")?;
            print!("{}", rendered);
            Ok(())
        }
    }
}
