use crate::{ApiError, ApiErrorContext, RateLimitHandler, StreamingCallback, StreamingChunk};
use anyhow::Result;
use reqwest::{Response, StatusCode};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::warn;

/// Map a non-success HTTP status to an `ApiError`, keeping rate limit context.
pub async fn check_response_error<T: RateLimitHandler + std::fmt::Debug + Send + Sync + 'static>(
    response: Response,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let rate_limits = T::from_response(&response);
    let response_text = response
        .text()
        .await
        .map_err(|e| ApiError::NetworkError(e.to_string()))?;

    let error = match status {
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimit(response_text),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ApiError::Authentication(response_text)
        }
        StatusCode::BAD_REQUEST => ApiError::InvalidRequest(response_text),
        StatusCode::SERVICE_UNAVAILABLE => ApiError::Overloaded(response_text),
        status if status.is_server_error() => ApiError::ServiceError(response_text),
        _ => ApiError::Unknown(format!("Status {status}: {response_text}")),
    };

    Err(ApiErrorContext {
        error,
        rate_limits: Some(rate_limits),
    }
    .into())
}

fn backoff(attempts: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempts.min(5)))
}

/// Decide whether a failed request should be retried, sleeping before returning true.
///
/// With a streaming callback, the rate limit countdown is reported through it and an
/// error returned by the callback (user cancellation) aborts the wait.
pub async fn handle_retryable_error<
    T: RateLimitHandler + std::fmt::Debug + Send + Sync + 'static,
>(
    error: &anyhow::Error,
    attempts: u32,
    max_retries: u32,
    streaming_callback: Option<&StreamingCallback>,
) -> bool {
    if attempts >= max_retries {
        return false;
    }
    let Some(ctx) = error.downcast_ref::<ApiErrorContext<T>>() else {
        return false;
    };

    let delay = match &ctx.error {
        ApiError::RateLimit(_) => ctx
            .rate_limits
            .as_ref()
            .map(|limits| limits.get_retry_delay())
            .unwrap_or_else(|| backoff(attempts)),
        ApiError::ServiceError(_) | ApiError::NetworkError(_) | ApiError::Overloaded(_) => {
            backoff(attempts)
        }
        _ => return false,
    };

    warn!(
        "{} (attempt {}/{}), retrying in {} seconds",
        ctx.error,
        attempts + 1,
        max_retries,
        delay.as_secs()
    );

    match streaming_callback {
        Some(callback) if matches!(ctx.error, ApiError::RateLimit(_)) => {
            wait_with_countdown(delay, callback).await
        }
        _ => {
            sleep(delay).await;
            true
        }
    }
}

async fn wait_with_countdown(delay: Duration, callback: &StreamingCallback) -> bool {
    let start = Instant::now();
    while start.elapsed() < delay {
        let remaining = delay.saturating_sub(start.elapsed());
        if callback(&StreamingChunk::RateLimit {
            seconds_remaining: remaining.as_secs(),
        })
        .is_err()
        {
            let _ = callback(&StreamingChunk::RateLimitClear);
            return false;
        }
        sleep(remaining.min(Duration::from_secs(1))).await;
    }
    let _ = callback(&StreamingChunk::RateLimitClear);
    true
}
