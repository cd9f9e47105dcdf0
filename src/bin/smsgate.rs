//! smsgate daemon
//!
//! Opens the modem, keeps it connected, and sends one SMS per
//! newline-delimited JSON record read from stdin:
//!
//! ```text
//! {"destination": "65123456", "payload": "Hello"}
//! ```
//!
//! Each record produces one JSON outcome line on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use smsgate::{
    Config, IncomingMessageRouter, LogNotifier, ModemSession, ReconnectSupervisor, SendOutcome,
    SendQueue, SendRequest, list_ports,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

/// SMS gateway over a serial GSM modem.
#[derive(Parser, Debug)]
#[command(name = "smsgate", version, about = "Send SMS through a GSM modem")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Serial port override.
    #[arg(long, short)]
    port: Option<String>,

    /// Print the available serial ports and exit.
    #[arg(long, default_value_t = false)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.list_ports {
        for port in list_ports()? {
            println!("{port}");
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.modem.port = port;
        config.validate()?;
    }

    tracing::info!(
        port = %config.modem.port,
        baud_rate = config.modem.baud_rate,
        format = ?config.modem.message_format,
        "smsgate starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let notifier = Arc::new(LogNotifier);

    let session = Arc::new(ModemSession::with_serial_config(
        config.serial_config(),
        config.session_options(),
    ));
    // A failed first connect leaves the session faulted; the supervisor takes over
    if let Err(e) = session.connect().await {
        tracing::warn!(error = %e, "initial connect failed, supervisor will retry");
    }

    let supervisor = ReconnectSupervisor::new(
        Arc::clone(&session),
        notifier.clone(),
        config.supervisor_options(),
    );
    let supervisor_handle = supervisor.start(shutdown_rx.clone());

    let (queue, queue_handle) = SendQueue::start(
        Arc::clone(&session),
        config.queue_options(),
        shutdown_rx.clone(),
    );

    let router = IncomingMessageRouter::new(queue.clone(), notifier, config.router_options());
    let router_handle = router.start(session.subscribe(), shutdown_rx);

    serve_stdin(&queue).await;

    tracing::info!("shutting down");
    let _ = shutdown_tx.send(true);
    for (name, handle) in [
        ("queue", queue_handle),
        ("router", router_handle),
        ("supervisor", supervisor_handle),
    ] {
        if let Err(e) = handle.await {
            tracing::error!("{name} task failed: {e}");
        }
    }
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "modem close failed");
    }

    tracing::info!("smsgate stopped");
    Ok(())
}

/// Feeds stdin records into the queue until EOF or Ctrl-C.
///
/// On EOF every outstanding job is awaited; Ctrl-C returns at once and
/// leaves the queue shutdown to resolve whatever is left.
async fn serve_stdin(queue: &SendQueue) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut jobs = JoinSet::new();
    let mut reading = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while reading || !jobs.is_empty() {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("received SIGINT");
                return;
            }
            line = lines.next_line(), if reading => match line {
                Ok(Some(line)) => {
                    if let Some(outcome) = submit(queue, &line, &mut jobs) {
                        print_outcome(&outcome);
                    }
                }
                Ok(None) => reading = false,
                Err(e) => {
                    tracing::error!(error = %e, "stdin read failed");
                    reading = false;
                }
            },
            Some(joined) = jobs.join_next(), if !jobs.is_empty() => match joined {
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => tracing::error!("job task failed: {e}"),
            },
        }
    }
}

/// Enqueues one record. Returns an immediate outcome if the record is unusable.
fn submit(queue: &SendQueue, line: &str, jobs: &mut JoinSet<SendOutcome>) -> Option<SendOutcome> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let request: SendRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed request");
            return Some(SendOutcome::failed(format!("malformed request: {e}")));
        }
    };

    match queue.enqueue(request.destination, request.payload) {
        Ok(ticket) => {
            jobs.spawn(ticket.outcome());
            None
        }
        Err(e) => Some(SendOutcome::failed(e.summary())),
    }
}

fn print_outcome(outcome: &SendOutcome) {
    match serde_json::to_string(outcome) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!("cannot serialize outcome: {e}"),
    }
}
