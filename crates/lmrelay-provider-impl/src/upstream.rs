use std::time::{Duration, Instant};

use http::{HeaderMap, StatusCode};
use tracing::{info, warn};

use lmrelay_provider_core::{
    AttemptFailure, BlockLevel, BlockMark, BlockScope, RelayError, UpstreamContext,
};

use crate::cooldown::cooldown_duration;

/// Error bodies and unary responses must arrive within this long.
pub const BODY_READ_TIMEOUT: Duration = Duration::from_secs(30);

pub fn network_failure(err: wreq::Error, scope: &BlockScope) -> AttemptFailure {
    AttemptFailure {
        error: RelayError::Network(err.to_string()),
        mark: Some(BlockMark {
            scope: scope.clone(),
            level: BlockLevel::Transient,
            duration: Some(Duration::from_secs(30)),
            reason: Some("network_error".to_string()),
        }),
        retry: true,
    }
}

fn log_upstream_request(
    ctx: &UpstreamContext,
    provider: &str,
    op: &str,
    method: &str,
    path: &str,
    model: &str,
    is_stream: bool,
) -> Instant {
    info!(
        event = "upstream_request",
        trace_id = %ctx.trace_id,
        provider = %provider,
        op = %op,
        method = %method,
        path = %path,
        model = %model,
        is_stream = is_stream
    );
    Instant::now()
}

fn log_upstream_response_ok(
    ctx: &UpstreamContext,
    provider: &str,
    op: &str,
    status: StatusCode,
    elapsed_ms: u128,
    is_stream: bool,
) {
    info!(
        event = "upstream_response",
        trace_id = %ctx.trace_id,
        provider = %provider,
        op = %op,
        status = %status.as_u16(),
        elapsed_ms = elapsed_ms,
        is_stream = is_stream
    );
}

fn log_upstream_response_err(
    ctx: &UpstreamContext,
    provider: &str,
    op: &str,
    elapsed_ms: u128,
    err: impl std::fmt::Display,
) {
    warn!(
        event = "upstream_response",
        trace_id = %ctx.trace_id,
        provider = %provider,
        op = %op,
        status = "error",
        elapsed_ms = elapsed_ms,
        error = %err
    );
}

#[allow(clippy::too_many_arguments)]
pub async fn send_with_logging<F, Fut>(
    ctx: &UpstreamContext,
    provider: &str,
    op: &str,
    method: &str,
    path: &str,
    model: &str,
    is_stream: bool,
    scope: &BlockScope,
    send: F,
) -> Result<wreq::Response, AttemptFailure>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<wreq::Response, wreq::Error>>,
{
    let started_at = log_upstream_request(ctx, provider, op, method, path, model, is_stream);
    let response = send().await.map_err(|err| {
        log_upstream_response_err(ctx, provider, op, started_at.elapsed().as_millis(), &err);
        network_failure(err, scope)
    })?;
    log_upstream_response_ok(
        ctx,
        provider,
        op,
        response.status(),
        started_at.elapsed().as_millis(),
        is_stream,
    );
    Ok(response)
}

/// Reads a whole response body, bounded so a stalled upstream cannot
/// hold the attempt open.
pub async fn read_body(
    response: wreq::Response,
    scope: &BlockScope,
) -> Result<String, AttemptFailure> {
    let bytes = tokio::time::timeout(BODY_READ_TIMEOUT, response.bytes())
        .await
        .map_err(|_| AttemptFailure {
            error: RelayError::Timeout("upstream body read".to_string()),
            mark: None,
            retry: false,
        })?
        .map_err(|err| network_failure(err, scope))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Maps a non-success status to a block mark and retry decision.
pub fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: String,
    scope: &BlockScope,
) -> AttemptFailure {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AttemptFailure {
            error: RelayError::InvalidKey(format!(
                "upstream rejected credentials with status {}",
                status.as_u16()
            )),
            mark: Some(BlockMark {
                scope: scope.clone(),
                level: BlockLevel::Dead,
                duration: None,
                reason: Some("auth_error".to_string()),
            }),
            retry: true,
        },
        StatusCode::TOO_MANY_REQUESTS => {
            let duration = cooldown_duration(headers, &body);
            AttemptFailure {
                error: RelayError::Upstream {
                    status: status.as_u16(),
                    body,
                },
                mark: Some(BlockMark {
                    scope: scope.clone(),
                    level: BlockLevel::Cooldown,
                    duration: Some(duration),
                    reason: Some("rate_limit".to_string()),
                }),
                retry: true,
            }
        }
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            AttemptFailure {
                error: RelayError::Upstream {
                    status: status.as_u16(),
                    body,
                },
                mark: Some(BlockMark {
                    scope: scope.clone(),
                    level: BlockLevel::Transient,
                    duration: Some(Duration::from_secs(30)),
                    reason: Some("upstream_unavailable".to_string()),
                }),
                retry: true,
            }
        }
        _ => AttemptFailure {
            error: RelayError::Upstream {
                status: status.as_u16(),
                body,
            },
            mark: None,
            retry: false,
        },
    }
}
