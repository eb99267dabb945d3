//! Timeout: wrap an operation with a wall-clock deadline.

use std::future::Future;
use std::time::Duration;

use crate::error::CoreError;

pub async fn timeout<T, Fut>(duration: Duration, op: Fut) -> Result<T, CoreError>
where
    Fut: Future<Output = Result<T, CoreError>>,
{
    match tokio::time::timeout(duration, op).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::timeout(duration)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_timeout_error_on_deadline_elapsed() {
        let result = timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, CoreError>(1)
        })
        .await;
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }

    #[tokio::test]
    async fn passes_through_result_when_op_finishes_in_time() {
        let result = timeout(Duration::from_millis(100), async { Ok::<_, CoreError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }
}
