use std::env;
use std::ffi::OsString;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use annuaire::bridge::{self, ConfirmRequest, UiBridge};
use annuaire::config::{AppConfig, AppPaths, load_or_init_config};
use annuaire::coordinator::RunExit;
use annuaire::probe::EndpointProber;
use annuaire::selection::BackendSelection;
use annuaire::store::ChoiceStore;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging();
    debug!(
        "config: {}, data: {}",
        ctx.paths.config_file.display(),
        ctx.paths.data_dir.display()
    );

    match cli.command {
        Command::Run(cmd) => match async_run(&ctx, cmd)? {
            RunOutcome::Exit => Ok(()),
            RunOutcome::Relaunch => relaunch(&ctx.common),
        },
        Command::Ping(cmd) => async_ping(cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "annuaire", &mut io::stdout());
            Ok(())
        }
    }
}

#[tokio::main]
async fn async_run(ctx: &RuntimeContext, cmd: RunCommand) -> Result<RunOutcome> {
    handle_run(ctx, cmd).await
}

#[tokio::main]
async fn async_ping(cmd: PingCommand) -> Result<()> {
    handle_ping(cmd).await
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Annuaire - contact directory app shell.",
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
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a backend and host it for the UI
    Run(RunCommand),
    /// Check whether a backend URL is reachable
    Ping(PingCommand),
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

#[derive(Debug, Clone, Args)]
struct RunCommand {
    /// Select the locally-spawned backend
    #[arg(long, conflicts_with = "remote")]
    local: bool,
    /// Select a remote backend at this base URL
    #[arg(long, value_name = "URL")]
    remote: Option<String>,
    /// Remember this selection for future launches
    #[arg(long)]
    remember: bool,
}

#[derive(Debug, Clone, Args)]
struct PingCommand {
    /// Base URL to probe
    url: String,
    /// Per-attempt timeout in seconds
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
}

enum RunOutcome {
    Exit,
    Relaunch,
}

struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        let config = load_or_init_config(&paths)?;
        let paths = paths.apply_overrides(&config)?;
        paths.ensure_directories()?;
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return;
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("annuaire={level},reqwest=warn")));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(io::stderr().is_terminal())
                    .with_target(false),
            )
            .try_init()
            .ok();

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

async fn handle_run(ctx: &RuntimeContext, cmd: RunCommand) -> Result<RunOutcome> {
    let app = bridge::launch(&ctx.config, &ctx.paths);
    let bridge = app.bridge;
    let mut coordinator = app.coordinator;
    let frontend = tokio::spawn(run_frontend(bridge.clone(), app.confirms));

    submit_initial_selection(ctx, &cmd, &bridge).await?;

    // Print the endpoint whenever the coordinator resolves one.
    let announce = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            if let Some(endpoint) = bridge.endpoint_ready().await {
                info!("backend ready");
                println!("active endpoint: {}", endpoint.base_url);
            }
        })
    };

    let outcome = tokio::select! {
        exit = &mut coordinator => {
            match exit.context("coordinator task panicked")? {
                RunExit::Relaunch => {
                    info!("restarting so the selection screen reappears");
                    RunOutcome::Relaunch
                }
                RunExit::Closed => RunOutcome::Exit,
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, stopping backend");
            // Dropping every command sender lets the coordinator run
            // its shutdown path, which stops any live backend process.
            announce.abort();
            frontend.abort();
            drop(bridge);
            coordinator.await.context("coordinator task panicked")?;
            info!("shutdown complete");
            return Ok(RunOutcome::Exit);
        }
    };

    announce.abort();
    frontend.abort();
    Ok(outcome)
}

/// Pick the first selection for this run: explicit CLI flags win, then
/// the remembered choice; with neither, tell the user how to choose.
async fn submit_initial_selection(
    ctx: &RuntimeContext,
    cmd: &RunCommand,
    bridge: &UiBridge,
) -> Result<()> {
    if let Some(url) = &cmd.remote {
        let selection = BackendSelection::remote(url, cmd.remember)?;
        // Pre-submission feedback, same as the selection screen's ping.
        if !bridge.check_reachable(url, Duration::from_secs(5)).await {
            anyhow::bail!(
                "could not connect to the remote server at {url}; \
                 check the URL and ensure the server is running"
            );
        }
        bridge.submit_selection(selection).await;
        return Ok(());
    }

    if cmd.local {
        bridge
            .submit_selection(BackendSelection::local(cmd.remember))
            .await;
        return Ok(());
    }

    let store = ChoiceStore::new(&ctx.paths.data_dir);
    if let Some(selection) = store.load().and_then(|choice| choice.into_selection()) {
        info!("using remembered backend choice");
        bridge.submit_selection(selection).await;
        return Ok(());
    }

    anyhow::bail!("no backend selected; pass --local or --remote <URL> (add --remember to keep it)")
}

/// Terminal stand-in for the presentation layer: answers confirm
/// prompts and accepts a `forget` command on stdin.
async fn run_frontend(bridge: UiBridge, mut confirms: mpsc::Receiver<ConfirmRequest>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<ConfirmRequest> = None;

    loop {
        tokio::select! {
            request = confirms.recv() => {
                let Some(request) = request else { break };
                println!("{} [y/N]", request.message);
                pending = Some(request);
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim().to_ascii_lowercase();
                if let Some(request) = pending.take() {
                    let _ = request.reply.send(matches!(line.as_str(), "y" | "yes"));
                } else if line == "forget" {
                    let bridge = bridge.clone();
                    tokio::spawn(async move {
                        if bridge
                            .confirm(
                                "Forget the remembered backend choice and restart the application?",
                            )
                            .await
                        {
                            bridge.request_forget().await;
                        } else {
                            debug!("forget declined");
                        }
                    });
                } else if !line.is_empty() {
                    println!("unknown command '{line}' (try: forget)");
                }
            }
        }
    }
}

async fn handle_ping(cmd: PingCommand) -> Result<()> {
    let prober = EndpointProber::new();
    let reachable = prober
        .wait_until_ready(
            &cmd.url,
            1,
            Duration::from_secs(cmd.timeout_secs),
            Duration::ZERO,
        )
        .await;

    if reachable {
        println!("{} is reachable", cmd.url);
        Ok(())
    } else {
        warn!("{} is not reachable", cmd.url);
        std::process::exit(1);
    }
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let rendered =
                toml::to_string_pretty(&ctx.config).context("serializing configuration")?;
            print!("{rendered}");
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
    }
}

/// Respawn this executable and let the current process exit. The
/// common options carry over; the selection flags deliberately do
/// not, so the selection step reappears in the new process.
fn relaunch(common: &CommonOpts) -> Result<()> {
    let exe = env::current_exe().context("locating current executable")?;
    std::process::Command::new(exe)
        .args(relaunch_args(common))
        .spawn()
        .context("relaunching application")?;
    Ok(())
}

fn relaunch_args(common: &CommonOpts) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(path) = &common.config {
        args.push(OsString::from("--config"));
        args.push(path.clone().into_os_string());
    }
    if common.quiet {
        args.push(OsString::from("--quiet"));
    }
    for _ in 0..common.verbose {
        args.push(OsString::from("-v"));
    }
    if common.debug {
        args.push(OsString::from("--debug"));
    }
    args.push(OsString::from("run"));
    args
}


async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
