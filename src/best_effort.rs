//! Best-effort operations
//!
//! Cache writes, metric writes and alert notifications must never fail the
//! caller. Wrapping them in [`best_effort`] makes that visible at the call
//! site: the result type is `Option<T>`, not `Result<T>`.

use crate::error::Result;
use std::future::Future;
use tracing::warn;

/// Run `fut`, logging and discarding any error.
pub async fn best_effort<T, F>(operation: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(operation, error = %e, "Best-effort operation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_swallows_errors() {
        let failed: Option<()> = best_effort("cache.set", async {
            Err(Error::Cache {
                operation: "set".into(),
                reason: "connection refused".into(),
            })
        })
        .await;
        assert!(failed.is_none());

        let ok = best_effort("cache.get", async { Ok(7) }).await;
        assert_eq!(ok, Some(7));
    }
}
