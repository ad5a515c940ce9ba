//! devlink privileged worker entry point.
//!
//! ```text
//! main()
//!  └─ WorkerConfig::from_args()   -- refuses to start without explicit paths
//!  └─ WorkerConfig::load_token()  -- refuses to start without a token file
//!  └─ WorkerServer::bind()        -- <data-dir>/<socket-name>.sock
//!  └─ WorkerServer::run()         -- until SHUTDOWN or Ctrl-C
//! ```
//!
//! # No defaults (for beginners)
//!
//! `--data-dir` and `--socket-name` deliberately have no default values and
//! no environment-variable fallback.  A worker that guessed its data
//! directory could end up loading the wrong token, or none at all.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use devlink_worker::application::inject_input::{InjectInputUseCase, InputInjector};
use devlink_worker::infrastructure::injector::android::{AndroidShellInjector, DEFAULT_INPUT_PROGRAM};
use devlink_worker::infrastructure::injector::mock::MockInputInjector;
use devlink_worker::infrastructure::server::{ServerContext, WorkerServer};
use devlink_worker::infrastructure::startup::WorkerConfig;

#[derive(Debug, Parser)]
#[command(name = "devlink-worker", about = "Privileged input-injection worker for devlink", version)]
struct Args {
    /// Directory holding `worker.token`; the socket is created here too.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Socket file name, without the `.sock` suffix.
    #[arg(long)]
    socket_name: Option<String>,

    /// Path to the platform `input` tool.
    #[arg(long, default_value = DEFAULT_INPUT_PROGRAM)]
    input_program: PathBuf,

    /// Log events instead of injecting them.
    #[arg(long, env = "DEVLINK_WORKER_DRY_RUN")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = WorkerConfig::from_args(args.data_dir, args.socket_name)
        .context("refusing to start")?;
    let token = config.load_token().context("refusing to start")?;

    let injector: Arc<dyn InputInjector> = if args.dry_run {
        info!("dry run: events are logged, not injected");
        Arc::new(MockInputInjector::new())
    } else {
        Arc::new(AndroidShellInjector::with_program(args.input_program))
    };
    let use_case = Arc::new(InjectInputUseCase::new(injector));

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            on_signal.cancel();
        }
    });

    let context = ServerContext::new(token, use_case, shutdown);
    let server = WorkerServer::bind(&config.socket_path(), context)?;
    server.run().await;

    info!("worker stopped");
    Ok(())
}
