//! Input injection through the device's `input` command-line tool.
//!
//! # What is the `input` tool? (for beginners)
//!
//! Android ships a small program, `/system/bin/input`, that asks the window
//! manager to deliver synthetic touch and key events.  Only privileged
//! processes (the shell user or root) may run it, which is why this injector
//! lives in the worker rather than in the client.
//!
//! The subcommands used here are:
//!
//! | Event  | Invocation                                   |
//! |--------|----------------------------------------------|
//! | tap    | `input tap <x> <y>`                          |
//! | key    | `input keyevent <code>`                      |
//! | text   | `input text <text>` (spaces sent as `%s`)    |
//! | motion | `input motionevent DOWN|MOVE|UP <x> <y>`     |
//!
//! Arguments are passed directly to the process, never through a shell, so
//! text cannot smuggle extra commands.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use devlink_core::protocol::privileged::PathPoint;
use tokio::process::Command;
use tracing::debug;

use crate::application::inject_input::{InjectError, InputInjector};

/// Default location of the platform tool.
pub const DEFAULT_INPUT_PROGRAM: &str = "/system/bin/input";

/// Phase of one `motionevent` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionAction {
    Down,
    Move,
    Up,
}

impl MotionAction {
    fn as_str(self) -> &'static str {
        match self {
            MotionAction::Down => "DOWN",
            MotionAction::Move => "MOVE",
            MotionAction::Up => "UP",
        }
    }
}

// ── Argument builders ─────────────────────────────────────────────────────────

pub fn tap_args(x: i32, y: i32) -> Vec<String> {
    vec!["tap".into(), x.to_string(), y.to_string()]
}

pub fn key_args(code: u32) -> Vec<String> {
    vec!["keyevent".into(), code.to_string()]
}

/// `input text` treats a literal space as an argument separator; `%s` is its
/// escape for one.
pub fn text_args(text: &str) -> Vec<String> {
    vec!["text".into(), text.replace(' ', "%s")]
}

pub fn motion_args(action: MotionAction, point: PathPoint) -> Vec<String> {
    vec![
        "motionevent".into(),
        action.as_str().into(),
        point.x.to_string(),
        point.y.to_string(),
    ]
}

/// Expands a path into DOWN, MOVE..., UP steps.
///
/// A single point becomes a press and release in place.
pub fn motion_steps(points: &[PathPoint]) -> Vec<(MotionAction, PathPoint)> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Vec::new();
    };
    let mut steps = Vec::with_capacity(points.len() + 1);
    steps.push((MotionAction::Down, *first));
    if points.len() > 2 {
        steps.extend(points[1..points.len() - 1].iter().map(|p| (MotionAction::Move, *p)));
    }
    steps.push((MotionAction::Up, *last));
    steps
}

// ── Injector ──────────────────────────────────────────────────────────────────

/// Runs the platform `input` tool once per event.
#[derive(Debug, Clone)]
pub struct AndroidShellInjector {
    program: PathBuf,
}

impl Default for AndroidShellInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl AndroidShellInjector {
    pub fn new() -> Self {
        Self::with_program(DEFAULT_INPUT_PROGRAM)
    }

    /// Uses a different executable in place of the platform tool.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn invoke(&self, args: Vec<String>) -> Result<(), InjectError> {
        let program = self.program.display().to_string();
        debug!(%program, subcommand = ?args.first(), "running input tool");
        let status = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| InjectError::Spawn {
                program: program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(InjectError::Failed {
                program,
                status: status.to_string(),
            })
        }
    }
}

#[async_trait]
impl InputInjector for AndroidShellInjector {
    async fn tap(&self, x: i32, y: i32) -> Result<(), InjectError> {
        self.invoke(tap_args(x, y)).await
    }

    async fn motion(&self, duration_ms: u32, points: &[PathPoint]) -> Result<(), InjectError> {
        let steps = motion_steps(points);
        if steps.is_empty() {
            return Err(InjectError::Platform("motion path has no points".into()));
        }
        let pause = Duration::from_millis(u64::from(duration_ms)) / (steps.len() as u32 - 1).max(1);

        let last = steps.len() - 1;
        for (i, (action, point)) in steps.into_iter().enumerate() {
            self.invoke(motion_args(action, point)).await?;
            if i < last {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(())
    }

    async fn key(&self, code: u32) -> Result<(), InjectError> {
        self.invoke(key_args(code)).await
    }

    async fn text(&self, text: &str) -> Result<(), InjectError> {
        self.invoke(text_args(text)).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
