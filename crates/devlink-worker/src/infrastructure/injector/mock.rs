//! Recording input injector for tests and `--dry-run`.
//!
//! # Why a mock injector?
//!
//! The real injector drives the device's `input` tool, which only exists on
//! the device and actually taps the screen.  `MockInputInjector` records each
//! event in a `Mutex<Vec<...>>` instead, so tests can assert exactly what was
//! injected and in what order.
//!
//! # `should_fail` flag
//!
//! Build with [`MockInputInjector::failing`] to make every call return an
//! error, for testing how failures are reported.

use std::sync::Mutex;

use async_trait::async_trait;
use devlink_core::protocol::privileged::PathPoint;
use tracing::info;

use crate::application::inject_input::{InjectError, InputInjector};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Tap(i32, i32),
    Motion { duration_ms: u32, points: Vec<PathPoint> },
    Key(u32),
    Text(String),
}

/// An injector that records calls without touching the device.
#[derive(Debug, Default)]
pub struct MockInputInjector {
    pub events: Mutex<Vec<RecordedEvent>>,
    /// When `true`, every method returns [`InjectError::Platform`].
    pub should_fail: bool,
}

impl MockInputInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// A snapshot of everything recorded so far.
    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, event: RecordedEvent) -> Result<(), InjectError> {
        if self.should_fail {
            return Err(InjectError::Platform("mock failure".into()));
        }
        info!(?event, "dry-run injection");
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}

#[async_trait]
impl InputInjector for MockInputInjector {
    async fn tap(&self, x: i32, y: i32) -> Result<(), InjectError> {
        self.record(RecordedEvent::Tap(x, y))
    }

    async fn motion(&self, duration_ms: u32, points: &[PathPoint]) -> Result<(), InjectError> {
        self.record(RecordedEvent::Motion {
            duration_ms,
            points: points.to_vec(),
        })
    }

    async fn key(&self, code: u32) -> Result<(), InjectError> {
        self.record(RecordedEvent::Key(code))
    }

    async fn text(&self, text: &str) -> Result<(), InjectError> {
        self.record(RecordedEvent::Text(text.to_string()))
    }
}
