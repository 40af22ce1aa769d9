//! Response classification and request header construction

use crate::config::RelayConfig;
use crate::error::RelayError;
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT_ENCODING, CONNECTION, CONTENT_RANGE, HeaderMap, HeaderName, HeaderValue, RANGE,
    USER_AGENT,
};
use std::collections::BTreeMap;

/// Classify a response status
///
/// Returns `None` for statuses that carry a body to relay (2xx).
pub fn classify_status(status: StatusCode, retry_on_rate_limit: bool) -> Option<RelayError> {
    if status.is_success() {
        return None;
    }
    let code = status.as_u16();
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RelayError::TransientExpired { status: code }
        }
        StatusCode::TOO_MANY_REQUESTS if retry_on_rate_limit => RelayError::TransientNetwork {
            reason: "rate limited (HTTP 429)".into(),
        },
        _ => RelayError::FatalHttp { status: code },
    })
}

/// Build request headers: relay defaults, then descriptor headers, then `Range`
///
/// Descriptor headers override defaults case-insensitively. Headers with
/// invalid names or values are skipped.
pub fn build_headers(
    config: &RelayConfig,
    descriptor_headers: &BTreeMap<String, String>,
    resume_from: u64,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Ok(ua) = HeaderValue::from_str(&config.user_agent) {
        headers.insert(USER_AGENT, ua);
    }

    for (name, value) in descriptor_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::debug!(header = %name, "Skipping invalid descriptor header"),
        }
    }

    // Compressed bodies would break byte-offset resumption
    headers.insert(
        ACCEPT_ENCODING,
        HeaderValue::from_static("identity;q=1, *;q=0"),
    );

    headers.remove(RANGE);
    if resume_from > 0
        && let Ok(range) = HeaderValue::from_str(&format!("bytes={resume_from}-"))
    {
        headers.insert(RANGE, range);
    }

    headers
}

/// How a response body lines up with bytes already delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyAlignment {
    /// Leading bytes of the body to discard
    pub skip: u64,
    /// Size of the complete object, when known
    pub total_bytes: Option<u64>,
}

/// Work out how to continue after `delivered` bytes, given the response
///
/// - `206` with `Content-Range: bytes start-end/total`: skip `delivered - start`
/// - any other success: the body starts at offset 0, skip `delivered`
///
/// Returns an error when a partial response starts past the delivered offset,
/// since the gap cannot be filled.
pub fn align_body(
    status: StatusCode,
    headers: &HeaderMap,
    content_length: Option<u64>,
    delivered: u64,
) -> Result<BodyAlignment, RelayError> {
    if status == StatusCode::PARTIAL_CONTENT
        && let Some((start, total)) = headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
    {
        if start > delivered {
            return Err(RelayError::FatalHttp {
                status: status.as_u16(),
            });
        }
        let total_bytes = total.or_else(|| content_length.map(|len| start + len));
        return Ok(BodyAlignment {
            skip: delivered - start,
            total_bytes,
        });
    }

    Ok(BodyAlignment {
        skip: delivered,
        total_bytes: content_length,
    })
}

/// Decide whether a body that just ended completed the object
///
/// `skip` is what was still to be discarded before reaching the delivered
/// offset. Returns `None` when the object is complete, a transient error when
/// the body stopped short, and [`RelayError::ObjectChanged`] when the body
/// cannot be the object already partly delivered.
pub fn check_body_end(delivered: u64, skip: u64, total: Option<u64>) -> Option<RelayError> {
    let reached = delivered - skip;
    match total {
        Some(total) if total >= delivered && reached < total => {
            Some(RelayError::TransientNetwork {
                reason: format!("body ended after {reached} of {total} bytes"),
            })
        }
        Some(total) if total != delivered => Some(RelayError::ObjectChanged {
            delivered,
            reason: format!("object is only {total} bytes"),
        }),
        None if skip > 0 => Some(RelayError::ObjectChanged {
            delivered,
            reason: format!("body ended after {reached} bytes"),
        }),
        _ => None,
    }
}

/// Parse `bytes start-end/total` (total may be `*`)
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = spec.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = total.trim().parse().ok();
    Some((start, total))
}
