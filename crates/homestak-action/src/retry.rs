use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{ActionError, ErrorKind};

/// Backoff schedule for retryable action failures: three attempts total,
/// waiting 2s, then 5s, then 10s between them.
const BACKOFF: [Duration; 3] = [Duration::from_secs(2), Duration::from_secs(5), Duration::from_secs(10)];

/// Run `op` up to `BACKOFF.len() + 1` times, retrying only on
/// [`ErrorKind::NotReady`] or [`ErrorKind::Unauthorized`] (an initial token
/// may not have propagated yet). Any other error kind returns immediately.
pub async fn with_retry<T, F, Fut>(op: F) -> Result<T, ActionError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ActionError>>,
{
    let mut last_err = None;
    for (attempt, delay) in std::iter::once(None)
        .chain(BACKOFF.iter().copied().map(Some))
        .enumerate()
    {
        if let Some(delay) = delay {
            warn!(attempt, delay_secs = delay.as_secs(), "retrying action");
            tokio::time::sleep(delay).await;
        }
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let retryable = matches!(e.kind(), ErrorKind::NotReady | ErrorKind::Unauthorized);
                last_err = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ActionError::Internal("retry loop exited without error".into())))
}
