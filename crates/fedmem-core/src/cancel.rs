//! Cooperative cancellation helpers.
//!
//! Every engine operation that crosses the I/O boundary takes a
//! `CancellationToken` threaded down from the owning session. Cancellation is
//! observed at suspension points; synchronous storage segments check the
//! token at their boundaries.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{MemoryError, Result};

/// Await `fut`, failing with `Cancelled` as soon as the token fires.
pub async fn checked<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(MemoryError::Cancelled),
        out = fut => out,
    }
}

/// Bail out if the token has already fired. Used at synchronous boundaries.
pub fn bail_if_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(MemoryError::Cancelled)
    } else {
        Ok(())
    }
}
