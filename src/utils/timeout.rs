use crate::error::{NetronError, Result};
use std::time::Duration;
use tokio::time;

/// Default timeout for a single request/response round trip (30 seconds)
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the handshake exchange (10 seconds)
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time to wait for the remote side to accept a stream (10 seconds)
pub const STREAM_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wrap an async operation with a timeout
pub async fn with_timeout<T>(
    operation: impl std::future::Future<Output = T>,
    duration: Duration,
) -> std::result::Result<T, time::error::Elapsed> {
    time::timeout(duration, operation).await
}

/// Wrap an async operation with a timeout, converting Elapsed to
/// `NetronError::Timeout`
pub async fn with_timeout_error<T>(
    operation: impl std::future::Future<Output = Result<T>>,
    duration: Duration,
) -> Result<T> {
    match time::timeout(duration, operation).await {
        Ok(result) => result,
        Err(_) => Err(NetronError::Timeout),
    }
}
