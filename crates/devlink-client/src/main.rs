//! `devlink` command-line client.
//!
//! ```text
//! devlink discover pairing|connect     look for a device on the LAN
//! devlink pair --code 123456           pair with the device showing that code
//! devlink connect --command "getprop"  run a shell command on a paired device
//! devlink forget                       delete this client's identity
//! devlink token init                   create the privileged-worker token
//! devlink probe                        is the worker reachable? (sends nothing)
//! devlink status | stop-worker         authenticated worker control
//! devlink inject tap 540 1200          inject input through the worker
//! ```
//!
//! # Error output (for beginners)
//!
//! Failures print one generic line ("device not found", "wrong code",
//! "request rejected", ...).  The detailed cause is only
//! logged at `debug` level: set `RUST_LOG=devlink_client=debug` to see it.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use devlink_client::application::attempt::AttemptError;
use devlink_client::application::{connect_device, inject_input, pair_device};
use devlink_client::infrastructure::discovery::{discover, MdnsBrowser, ServicePhase};
use devlink_client::infrastructure::keystore::KeyManager;
use devlink_client::infrastructure::privileged::{self, init_token};
use devlink_client::infrastructure::storage::config::{default_config_path, load_config, ClientConfig};
use devlink_core::protocol::privileged::{InputCommand, PathPoint};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "devlink", about = "Pair with and drive a device over its debug protocol", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "DEVLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the config file.
    #[arg(long, env = "DEVLINK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PhaseArg {
    Pairing,
    Connect,
}

impl From<PhaseArg> for ServicePhase {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::Pairing => ServicePhase::Pairing,
            PhaseArg::Connect => ServicePhase::Connect,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Look for a device advertising the given service.
    Discover {
        #[arg(value_enum)]
        phase: PhaseArg,
    },
    /// Pair with the device currently showing a pairing code.
    Pair {
        /// The code displayed on the device.
        #[arg(long)]
        code: String,
    },
    /// Connect to a paired device and run a shell command.
    Connect {
        /// Skip discovery and connect to this address.
        #[arg(long)]
        addr: Option<SocketAddr>,
        #[arg(long)]
        command: String,
    },
    /// Delete this client's identity; the device will treat it as unknown.
    Forget,
    /// Manage the privileged-worker token.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Check whether the privileged worker is listening.
    Probe,
    /// Ask the privileged worker for its status.
    Status,
    /// Stop the privileged worker.
    StopWorker,
    /// Inject input through the privileged worker.
    Inject {
        #[command(subcommand)]
        event: InjectEvent,
    },
}

#[derive(Debug, Subcommand)]
enum TokenAction {
    /// Write a fresh token file (replaces any existing one).
    Init,
}

#[derive(Debug, Subcommand)]
enum InjectEvent {
    Tap { x: i32, y: i32 },
    Key { code: u32 },
    Text { text: String },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[arg(long, default_value_t = 300)]
        duration_ms: u32,
        #[arg(long, default_value_t = 32)]
        steps: usize,
    },
}

impl InjectEvent {
    fn into_command(self) -> InputCommand {
        match self {
            InjectEvent::Tap { x, y } => InputCommand::Tap { x, y },
            InjectEvent::Key { code } => InputCommand::Key { code },
            InjectEvent::Text { text } => InputCommand::Text(text),
            InjectEvent::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
                steps,
            } => inject_input::swipe(
                PathPoint { x: x1, y: y1 },
                PathPoint { x: x2, y: y2 },
                duration_ms,
                steps,
            ),
        }
    }
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ClientConfig> {
        let path = self.config.clone().unwrap_or_else(default_config_path);
        let mut config =
            load_config(&path).with_context(|| format!("loading {}", path.display()))?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        Ok(config)
    }
}

/// Logs the detailed cause and turns the error into its generic message.
fn report(err: AttemptError) -> anyhow::Error {
    debug!(class = ?err.class(), "attempt failed: {err}");
    anyhow::anyhow!(err.user_message())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            on_signal.cancel();
        }
    });

    let keys = KeyManager::with_file_protector(&config.data_dir);

    match cli.command {
        Command::Discover { phase } => {
            let browser = MdnsBrowser::new().map_err(|e| report(e.into()))?;
            let found = discover(&browser, phase.into(), config.discovery_timeout(), &cancel)
                .await
                .map_err(|e| report(e.into()))?;
            match found {
                Some(endpoint) => println!("{}\t{}", endpoint.instance, endpoint.socket_addr()),
                None => return Err(report(AttemptError::NotFound(phase.into()))),
            }
        }
        Command::Pair { code } => {
            let browser = MdnsBrowser::new().map_err(|e| report(e.into()))?;
            let paired = pair_device::pair(&browser, &keys, &config, &code, &cancel)
                .await
                .map_err(report)?;
            println!("paired with {} at {}", paired.peer.name, paired.endpoint.socket_addr());
        }
        Command::Connect { addr, command } => {
            let browser = MdnsBrowser::new().map_err(|e| report(e.into()))?;
            let output = connect_device::run_remote_command(
                &browser, &keys, &config, addr, &command, &cancel,
            )
            .await
            .map_err(report)?;
            use std::io::Write;
            std::io::stdout()
                .write_all(&output)
                .context("writing command output")?;
        }
        Command::Forget => {
            keys.forget().await.map_err(|e| report(e.into()))?;
            println!("identity deleted");
        }
        Command::Token {
            action: TokenAction::Init,
        } => {
            init_token(&config.data_dir).map_err(|e| report(e.into()))?;
            println!("token written to {}", privileged::token_path(&config.data_dir).display());
        }
        Command::Probe => {
            let path = config.worker_socket_path();
            if privileged::probe(&path).await {
                println!("worker reachable at {}", path.display());
            } else {
                anyhow::bail!("worker not reachable at {}", path.display());
            }
        }
        Command::Status => {
            let mut client = inject_input::connect_worker(&config).await.map_err(report)?;
            let status = client.status().await.map_err(|e| report(e.into()))?;
            println!("{status}");
        }
        Command::StopWorker => {
            let client = inject_input::connect_worker(&config).await.map_err(report)?;
            client.shutdown().await.map_err(|e| report(e.into()))?;
            println!("worker stopped");
        }
        Command::Inject { event } => {
            let reply = inject_input::inject(&config, vec![event.into_command()])
                .await
                .map_err(report)?;
            debug!(reply = %reply.message, "injected");
        }
    }

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_requires_code() {
        assert!(Cli::try_parse_from(["devlink", "pair"]).is_err());
    }

    #[test]
    fn test_swipe_defaults() {
        // Arrange
        let cli = Cli::parse_from(["devlink", "inject", "swipe", "0", "0", "0", "100"]);

        // Act
        let Command::Inject { event } = cli.command else {
            panic!("expected inject");
        };

        // Assert
        match event.into_command() {
            InputCommand::Motion {
                duration_ms,
                points,
            } => {
                assert_eq!(duration_ms, 300);
                assert_eq!(points.len(), 32);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_data_dir_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "devlink",
            "--config",
            dir.path().join("absent.toml").to_str().unwrap(),
            "--data-dir",
            "/tmp/devlink-test",
            "probe",
        ]);

        let config = cli.load_config().unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/devlink-test"));
    }
}
