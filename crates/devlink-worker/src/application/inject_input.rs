//! InjectInputUseCase: carries out authenticated input requests.
//!
//! This use case sits at the application layer and delegates to an
//! [`InputInjector`] trait object for the actual event synthesis.  The
//! platform implementations live in the infrastructure layer.
//!
//! The use case only ever sees requests the session state machine already
//! admitted, so it does no authentication of its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use devlink_core::protocol::privileged::{InputCommand, PathPoint, Reply, ReplyType, Request};
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for input injection.
#[derive(Debug, Error)]
pub enum InjectError {
    /// The platform tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The platform tool ran but reported failure.
    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },
    /// Any other platform error.
    #[error("platform error: {0}")]
    Platform(String),
}

/// Platform-agnostic input injection.
#[async_trait]
pub trait InputInjector: Send + Sync {
    /// Taps once at `(x, y)`.
    async fn tap(&self, x: i32, y: i32) -> Result<(), InjectError>;

    /// Presses, drags through `points`, and releases over `duration_ms`.
    async fn motion(&self, duration_ms: u32, points: &[PathPoint]) -> Result<(), InjectError>;

    /// Sends one key event by platform key code.
    async fn key(&self, code: u32) -> Result<(), InjectError>;

    /// Types `text` into the focused field.
    async fn text(&self, text: &str) -> Result<(), InjectError>;
}

/// The InjectInput use case.
pub struct InjectInputUseCase {
    injector: Arc<dyn InputInjector>,
    injected: AtomicU64,
}

impl InjectInputUseCase {
    pub fn new(injector: Arc<dyn InputInjector>) -> Self {
        Self {
            injector,
            injected: AtomicU64::new(0),
        }
    }

    /// Injects one command.
    ///
    /// # Errors
    ///
    /// Returns [`InjectError`] if the platform injector fails.
    pub async fn run(&self, command: &InputCommand) -> Result<(), InjectError> {
        match command {
            InputCommand::Tap { x, y } => self.injector.tap(*x, *y).await?,
            InputCommand::Motion {
                duration_ms,
                points,
            } => self.injector.motion(*duration_ms, points).await?,
            InputCommand::Key { code } => self.injector.key(*code).await?,
            InputCommand::Text(text) => self.injector.text(text).await?,
        }
        self.injected.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Executes an input or batch request and builds the reply.
    ///
    /// A batch stops at the first failing event; the reply says how many ran.
    pub async fn execute(&self, request: &Request) -> Reply {
        let commands: &[InputCommand] = match request {
            Request::Input(command) => std::slice::from_ref(command),
            Request::Batch(commands) => commands,
            other => {
                return Reply::new(
                    ReplyType::Error,
                    format!("{:?} is not an input request", other.request_type()),
                )
            }
        };

        for (done, command) in commands.iter().enumerate() {
            if let Err(e) = self.run(command).await {
                warn!(done, total = commands.len(), "injection failed: {e}");
                return Reply::new(
                    ReplyType::Error,
                    format!("event {} of {} failed: {e}", done + 1, commands.len()),
                );
            }
        }
        debug!(count = commands.len(), "injected");
        Reply::ok(format!("injected {}", commands.len()))
    }

    /// Total events injected since startup.
    pub fn events_injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::injector::mock::{MockInputInjector, RecordedEvent};

    #[tokio::test]
    async fn test_tap_is_forwarded_to_injector() {
        // Arrange
        let injector = Arc::new(MockInputInjector::new());
        let use_case = InjectInputUseCase::new(Arc::clone(&injector) as Arc<dyn InputInjector>);

        // Act
        let reply = use_case
            .execute(&Request::Input(InputCommand::Tap { x: 10, y: 20 }))
            .await;

        // Assert
        assert_eq!(reply.kind, ReplyType::Ok);
        assert_eq!(injector.recorded(), vec![RecordedEvent::Tap(10, 20)]);
        assert_eq!(use_case.events_injected(), 1);
    }

    #[tokio::test]
    async fn test_batch_runs_in_order() {
        let injector = Arc::new(MockInputInjector::new());
        let use_case = InjectInputUseCase::new(Arc::clone(&injector) as Arc<dyn InputInjector>);
        let batch = Request::Batch(vec![
            InputCommand::Key { code: 26 },
            InputCommand::Text("hi".into()),
            InputCommand::Tap { x: 1, y: 2 },
        ]);

        let reply = use_case.execute(&batch).await;

        assert_eq!(reply.message, "injected 3");
        assert_eq!(
            injector.recorded(),
            vec![
                RecordedEvent::Key(26),
                RecordedEvent::Text("hi".into()),
                RecordedEvent::Tap(1, 2),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_is_reported_as_error_reply() {
        let injector = Arc::new(MockInputInjector::failing());
        let use_case = InjectInputUseCase::new(injector);

        let reply = use_case
            .execute(&Request::Input(InputCommand::Key { code: 3 }))
            .await;

        assert_eq!(reply.kind, ReplyType::Error);
        assert_eq!(use_case.events_injected(), 0);
    }

    #[tokio::test]
    async fn test_control_request_is_not_executed() {
        let injector = Arc::new(MockInputInjector::new());
        let use_case = InjectInputUseCase::new(Arc::clone(&injector) as Arc<dyn InputInjector>);

        let reply = use_case.execute(&Request::Status).await;

        assert_eq!(reply.kind, ReplyType::Error);
        assert!(injector.recorded().is_empty());
    }
}
