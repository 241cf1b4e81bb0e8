use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Sleep for `delay`, waking early on cancellation.
///
/// Returns true if the wait ended because of cancellation.
pub(crate) async fn sleep_or_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = cancel.cancelled() => true,
    }
}
