//! InjectInput use case: build input commands and deliver them to the
//! privileged worker.
//!
//! Each call opens a fresh connection and authenticates from zero with the
//! token in the data directory.  Commands beyond one batch are sent as
//! several batches on the same connection.

use devlink_core::protocol::privileged::{
    InputCommand, PathPoint, PrivilegedError, Reply, MAX_BATCH_EVENTS, MAX_PATH_POINTS,
};
use tracing::debug;

use crate::application::attempt::AttemptError;
use crate::infrastructure::privileged::{read_token, PrivilegedClient};
use crate::infrastructure::storage::config::ClientConfig;

/// Builds a straight-line swipe from `from` to `to` with `steps` points.
///
/// `steps` is clamped to `2..=MAX_PATH_POINTS`, so the path always contains
/// both end points.
pub fn swipe(from: PathPoint, to: PathPoint, duration_ms: u32, steps: usize) -> InputCommand {
    let steps = steps.clamp(2, MAX_PATH_POINTS);
    let last = (steps - 1) as i64;
    let lerp = |a: i32, b: i32, i: i64| -> i32 {
        let a = i64::from(a);
        let b = i64::from(b);
        (a + (b - a) * i / last) as i32
    };
    let points = (0..steps as i64)
        .map(|i| PathPoint {
            x: lerp(from.x, to.x, i),
            y: lerp(from.y, to.y, i),
        })
        .collect();
    InputCommand::Motion {
        duration_ms,
        points,
    }
}

/// Opens an authenticated connection to the worker named in `config`.
pub async fn connect_worker(config: &ClientConfig) -> Result<PrivilegedClient, AttemptError> {
    let token = read_token(&config.data_dir)?;
    let client = PrivilegedClient::connect_and_authenticate(
        &config.worker_socket_path(),
        &token,
        config.io_timeout(),
    )
    .await?;
    Ok(client)
}

/// Delivers `commands` in order and returns the last reply.
pub async fn inject(
    config: &ClientConfig,
    mut commands: Vec<InputCommand>,
) -> Result<Reply, AttemptError> {
    if commands.is_empty() {
        return Err(PrivilegedError::Malformed("no input to inject".into()).into());
    }
    let mut client = connect_worker(config).await?;

    if commands.len() == 1 {
        let command = commands.remove(0);
        return Ok(client.inject(command).await?);
    }

    let mut last = None;
    while !commands.is_empty() {
        let rest = commands.split_off(commands.len().min(MAX_BATCH_EVENTS));
        let batch = std::mem::replace(&mut commands, rest);
        debug!(events = batch.len(), "sending batch");
        last = Some(client.inject_batch(batch).await?);
    }
    last.ok_or_else(|| PrivilegedError::Malformed("no input to inject".into()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(cmd: &InputCommand) -> &[PathPoint] {
        match cmd {
            InputCommand::Motion { points, .. } => points,
            other => panic!("expected motion, got {other:?}"),
        }
    }

    #[test]
    fn test_swipe_starts_and_ends_on_the_given_points() {
        // Arrange
        let from = PathPoint { x: 100, y: 900 };
        let to = PathPoint { x: 100, y: 100 };

        // Act
        let cmd = swipe(from, to, 300, 9);

        // Assert
        let pts = points(&cmd);
        assert_eq!(pts.len(), 9);
        assert_eq!(pts[0], from);
        assert_eq!(pts[8], to);
        assert_eq!(pts[4], PathPoint { x: 100, y: 500 });
    }

    #[test]
    fn test_swipe_step_count_is_clamped() {
        let a = PathPoint { x: 0, y: 0 };
        let b = PathPoint { x: 10, y: 10 };
        assert_eq!(points(&swipe(a, b, 10, 0)).len(), 2);
        assert_eq!(points(&swipe(a, b, 10, 10_000)).len(), MAX_PATH_POINTS);
    }

    #[tokio::test]
    async fn test_empty_input_is_refused_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            data_dir: dir.path().to_path_buf(),
            ..ClientConfig::default()
        };

        let err = inject(&config, Vec::new()).await.unwrap_err();

        assert!(matches!(err, AttemptError::Input(_)));
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_contacting_worker() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            data_dir: dir.path().to_path_buf(),
            ..ClientConfig::default()
        };

        let err = inject(&config, vec![InputCommand::Key { code: 3 }]).await.unwrap_err();

        assert!(matches!(err, AttemptError::Privileged(_)));
    }
}
