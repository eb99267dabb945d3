//! Fallback: run a primary operation, fall back to a secondary on failure.

use std::future::Future;

use crate::error::CoreError;

pub async fn fallback<T, F, Fut, G, GFut>(
    primary: F,
    should_fallback: impl Fn(&CoreError) -> bool,
    on_fallback: impl FnOnce(&CoreError),
    secondary: G,
) -> Result<T, CoreError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
    G: FnOnce() -> GFut,
    GFut: Future<Output = Result<T, CoreError>>,
{
    match primary().await {
        Ok(v) => Ok(v),
        Err(err) => {
            if should_fallback(&err) {
                on_fallback(&err);
                secondary().await
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_on_matching_failure() {
        let result = fallback(
            || async { Err::<i32, _>(CoreError::internal("primary down")) },
            |_| true,
            |_| {},
            || async { Ok::<_, CoreError>(7) },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn propagates_primary_error_when_filter_rejects() {
        let result = fallback(
            || async { Err::<i32, _>(CoreError::validation("bad input")) },
            |e| !matches!(e.code(), crate::error::ErrorCode::ValidationError),
            |_| panic!("should not fall back"),
            || async { Ok::<_, CoreError>(7) },
        )
        .await;
        assert!(result.is_err());
    }
}
