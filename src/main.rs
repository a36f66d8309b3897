use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use nodestat::collector::Agent;
use nodestat::config::Config;
use nodestat::console::Console;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn default_worker_threads() -> usize {
    match std::env::var("NODESTAT_WORKER_THREADS") {
        Ok(value) => value
            .parse::<usize>()
            .expect("invalid env value for NODESTAT_WORKER_THREADS"),
        Err(_) => std::thread::available_parallelism()
            .expect("get available working threads")
            .get(),
    }
}

#[derive(FromArgs)]
#[argh(
    description = "Nodestat periodically reports kernel counters for cpu, pressure stall and nfs",
    help_triggers("-h", "--help")
)]
struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(
        option,
        short = 'l',
        default = "\"info\".to_string()",
        description = "log level"
    )]
    log_level: String,

    #[argh(
        option,
        short = 'c',
        long = "config",
        description = "read configuration from a file, built-in defaults apply without one"
    )]
    config: Option<PathBuf>,

    #[argh(
        option,
        short = 't',
        default = "default_worker_threads()",
        description = "specify how many threads the Tokio runtime will use"
    )]
    threads: usize,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]

    fn show_version(&self) {
        println!("nodestat {}", env!("CARGO_PKG_VERSION"));
    }

    fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        // metrics are written to stdout, logs must stay on stderr
        let log_level = std::env::var("NODESTAT_LOG").unwrap_or(self.log_level.clone());
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(log_level))
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .init();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("nodestat-worker")
            .worker_threads(self.threads)
            .enable_io()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let config = match &self.config {
                Some(path) => Config::load(path).map_err(|err| {
                    error!(message = "configuration error", %err);
                    exitcode::CONFIG
                })?,
                None => Config::default(),
            };

            info!(
                message = "start nodestat",
                threads = self.threads,
                interval = ?config.interval,
                proc_path = %config.proc_path,
            );

            let agent = Agent::new(&config.proc_path, &config.collectors);
            let mut console = Console::new();
            let mut interval = tokio::time::interval(config.interval);

            let mut sigint = signal(SignalKind::interrupt()).expect("register SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("register SIGTERM handler");

            loop {
                tokio::select! {
                    biased;

                    _ = sigint.recv() => {
                        info!(message = "SIGINT received, shutting down");
                        break;
                    }
                    _ = sigterm.recv() => {
                        info!(message = "SIGTERM received, shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let metrics = agent.gather().await;
                        if let Err(err) = console.write(&metrics).await {
                            error!(message = "write metrics failed", %err);
                            return Err(exitcode::IOERR);
                        }
                    }
                }
            }

            Ok::<(), ExitCode>(())
        })?;

        runtime.shutdown_timeout(Duration::from_secs(5));

        Ok(())
    }
}

fn main() {
    let cmd = argh::from_env::<RootCommand>();
    if let Err(code) = cmd.run() {
        std::process::exit(code);
    }
}
