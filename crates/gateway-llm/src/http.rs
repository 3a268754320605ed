use std::time::Duration;

use gateway_types::{GatewayError, ProviderKind, Result};
use serde::de::DeserializeOwned;

const MAX_ERROR_BODY: usize = 512;

/// Send a request and decode a JSON body, mapping failures onto the gateway
/// error taxonomy. 401 and 403 are authentication failures; any other
/// non-success status is a provider error.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    provider: ProviderKind,
    timeout: Duration,
) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| map_send_error(e, provider, timeout))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(provider, status.as_u16(), &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| map_send_error(e, provider, timeout))
}

pub(crate) fn map_send_error(e: reqwest::Error, provider: ProviderKind, timeout: Duration) -> GatewayError {
    if e.is_timeout() {
        GatewayError::RequestTimeout {
            provider: provider.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if e.is_decode() {
        GatewayError::Provider {
            provider: provider.to_string(),
            status: 200,
            message: format!("unreadable response body: {e}"),
        }
    } else {
        GatewayError::Transport {
            provider: provider.to_string(),
            message: e.to_string(),
        }
    }
}

pub(crate) fn status_error(provider: ProviderKind, status: u16, body: &str) -> GatewayError {
    let message = truncate(body.trim());
    match status {
        401 | 403 => GatewayError::Authentication {
            provider: provider.to_string(),
            message: format!("HTTP {status}: {message}"),
        },
        _ => GatewayError::Provider {
            provider: provider.to_string(),
            status,
            message,
        },
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Items of a `{"<field>": [...]}` listing. A missing or non-array field is an
/// empty listing.
pub(crate) fn listing_items(body: &serde_json::Value, field: &str) -> Vec<serde_json::Value> {
    body.get(field)
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_statuses_map_to_authentication() {
        for status in [401, 403] {
            let err = status_error(ProviderKind::OpenAi, status, "{\"error\":\"nope\"}");
            assert!(matches!(err, GatewayError::Authentication { .. }), "{status}");
        }
    }

    #[test]
    fn other_statuses_map_to_provider_error() {
        let err = status_error(ProviderKind::Azure, 503, "busy");
        match err {
            GatewayError::Provider { status, message, .. } => {
                assert_eq!(status, 503);
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(status_error(ProviderKind::Azure, 429, "").is_retryable());
        assert!(!status_error(ProviderKind::Azure, 404, "").is_retryable());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "é".repeat(600);
        let err = status_error(ProviderKind::OpenAi, 500, &body);
        let GatewayError::Provider { message, .. } = err else {
            panic!("expected provider error");
        };
        assert!(message.ends_with("..."));
        assert!(message.len() <= MAX_ERROR_BODY + 3);
    }

    #[test]
    fn listing_items_tolerates_odd_shapes() {
        assert_eq!(listing_items(&json!({"data": [1, 2]}), "data").len(), 2);
        assert!(listing_items(&json!({"data": "x"}), "data").is_empty());
        assert!(listing_items(&json!({}), "value").is_empty());
    }
}
