//! devrunner - Supervise local dev servers and surface their URLs.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use devrunner::bus::{Event, ExitReason};
use devrunner::config::ConfigLoader;
use devrunner::display;
use devrunner::sniffer::UrlSniffer;
use devrunner::{RunnerContext, Supervisor};

#[derive(Parser)]
#[command(
    name = "devrunner",
    about = "Supervise local dev servers and surface their URLs",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more commands under supervision.
    Run {
        /// Commands to run, one per argument (e.g. "npm run dev").
        #[arg(required = true)]
        commands: Vec<String>,
        /// Working directory for every command.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Print events as JSON lines.
        #[arg(long)]
        json: bool,
        /// Config file to use instead of the default search paths.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Read lines from stdin and print detected server URLs.
    Sniff {
        /// Print detected URLs as JSON lines.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// True once no tracked process can still produce output.
async fn all_finished(supervisor: &Supervisor) -> bool {
    supervisor
        .get_all_processes()
        .await
        .iter()
        .all(|(_, info)| info.status.is_terminal())
}

async fn run(
    commands: Vec<String>,
    cwd: Option<PathBuf>,
    json: bool,
    config: Option<PathBuf>,
) -> ExitCode {
    let loader = config.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            display::print_error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let context = RunnerContext::new(config);
    let (stopped_tx, mut stopped_rx) = mpsc::unbounded_channel();

    let printer = context.bus().subscribe_prefix("runner:*", move |event| {
        if json {
            display::print_event_json(event);
        } else {
            display::print_event(event, false);
        }
        if let Event::Stopped { reason, .. } = event {
            if *reason != ExitReason::Restarted {
                let _ = stopped_tx.send(());
            }
        }
    });

    let supervisor = context.supervisor();
    for command in commands {
        tracing::info!(%command, "Starting command");
        if let Err(e) = supervisor.start(command, cwd.clone()).await {
            display::print_error(&e.to_string());
        }
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping processes");
            ctrl_c.cancel();
        }
    });

    while !all_finished(supervisor).await {
        tokio::select! {
            () = cancel.cancelled() => break,
            message = stopped_rx.recv() => {
                if message.is_none() {
                    break;
                }
            }
        }
    }

    let stopped = supervisor.stop_all().await;
    tracing::debug!(stopped, "Stopped remaining processes");
    if let Err(e) = supervisor.shutdown().await {
        tracing::warn!(error = %e, "Supervisor already shut down");
    }
    context.bus().unsubscribe_prefix("runner:*", printer);

    ExitCode::SUCCESS
}

async fn sniff(json: bool) -> ExitCode {
    let sniffer = UrlSniffer::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(detected) = sniffer.detect(&line) else {
                    continue;
                };
                if json {
                    match serde_json::to_string(&detected) {
                        Ok(out) => println!("{out}"),
                        Err(e) => tracing::warn!(error = %e, "Failed to serialize URL"),
                    }
                } else {
                    display::print_detected_url(&detected);
                }
            }
            Ok(None) => return ExitCode::SUCCESS,
            Err(e) => {
                display::print_error(&format!("Failed to read stdin: {e}"));
                return ExitCode::FAILURE;
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            commands,
            cwd,
            json,
            config,
        } => run(commands, cwd, json, config).await,
        Commands::Sniff { json } => sniff(json).await,
    }
}
