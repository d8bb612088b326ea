use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff for retryable gateway errors (network,
/// "market closed"). Never gives up when `never_give_up` is set (the
/// auto-close-pending case of `GatewayUnavailable` in the error design).
pub async fn with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    base: Duration,
    never_give_up: bool,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempt += 1;
                if !never_give_up && attempt >= max_attempts {
                    return Err(e);
                }
                let delay = base * 2u32.saturating_pow(attempt.min(6));
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after gateway error");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(5, Duration::from_millis(1), false, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let result: Result<u32, &str> =
            with_backoff(2, Duration::from_millis(1), false, || async { Err("nope") }).await;
        assert!(result.is_err());
    }
}
