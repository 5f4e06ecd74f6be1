use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::error;

use super::BoxError;

pub async fn wait_for_any_task(
    tasks: &mut JoinSet<Result<(), BoxError>>,
) -> Result<(), BoxError> {
    match tasks.join_next().await {
        None => Ok(()), // empty set
        Some(joined) => joined?,
    }
}

pub async fn wait_for_tasks_with_timeout(
    tasks: &mut JoinSet<Result<(), BoxError>>,
    grace: Duration,
) -> Result<(), BoxError> {
    let mut first_error = None;

    let drained = timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => error!("Failed to join with task: {:?}", e),
            }
        }
    })
    .await;

    // A timeout outranks member failures, it means tasks are still running.
    if drained.is_err() {
        return Err("timed out waiting for tasks to complete".into());
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
