//! The wire seam between the delivery client and the remote index.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Outcome of a single document within a bulk request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    Created,
    Failed { status: u16, reason: String },
}

impl ItemOutcome {
    /// Throttled and server side failures are worth another attempt, everything else (mapping
    /// errors, conflicts, ...) would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ItemOutcome::Created => false,
            ItemOutcome::Failed { status, .. } => is_retryable_status(*status),
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Failure of a bulk request as a whole.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to reach the index: {0:#}")]
    Unreachable(anyhow::Error),
    #[error("The index did not answer within {0:?}")]
    Timeout(Duration),
    #[error("The index rejected the bulk request with status {status}: {reason}")]
    Rejected { status: u16, reason: String },
    #[error("The index returned an unexpected bulk response: {0}")]
    MalformedResponse(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Unreachable(_) | TransportError::Timeout(_) => true,
            TransportError::Rejected { status, .. } => is_retryable_status(*status),
            // The documents may or may not have been stored. Retrying risks duplicates, which
            // is accepted for at-least-once delivery.
            TransportError::MalformedResponse(_) => true,
        }
    }
}

/// Sends documents to the remote index using bulk "create" operations.
///
/// Implementations return one outcome per document, in submission order.
#[async_trait]
pub trait IndexTransport: Send + Sync {
    async fn bulk_create(
        &self,
        index: &str,
        documents: &[Value],
    ) -> Result<Vec<ItemOutcome>, TransportError>;
}

/// Maps the body of a bulk response onto per-document outcomes.
pub fn parse_bulk_response(
    body: &Value,
    expected: usize,
) -> Result<Vec<ItemOutcome>, TransportError> {
    let items = body.get("items").and_then(Value::as_array);
    let has_errors = body.get("errors").and_then(Value::as_bool);

    let items = match (items, has_errors) {
        (Some(items), _) => items,
        (None, Some(false)) => return Ok(vec![ItemOutcome::Created; expected]),
        (None, _) => {
            return Err(TransportError::MalformedResponse(
                "missing 'items'".to_string(),
            ));
        }
    };

    if items.len() != expected {
        return Err(TransportError::MalformedResponse(format!(
            "expected {} items but got {}",
            expected,
            items.len()
        )));
    }

    Ok(items.iter().map(parse_item).collect())
}

fn parse_item(item: &Value) -> ItemOutcome {
    let result = item
        .get("create")
        .or_else(|| item.as_object().and_then(|object| object.values().next()));

    let Some(result) = result else {
        return ItemOutcome::Failed {
            status: 500,
            reason: "missing item result".to_string(),
        };
    };

    let status = result
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|status| u16::try_from(status).ok())
        .unwrap_or(500);

    if (200..300).contains(&status) && result.get("error").is_none() {
        return ItemOutcome::Created;
    }

    let reason = match result.get("error") {
        Some(error) => {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
            match error.get("reason").and_then(Value::as_str) {
                Some(reason) => format!("{}: {}", kind, reason),
                None => kind.to_string(),
            }
        }
        None => format!("status {}", status),
    };

    ItemOutcome::Failed { status, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_without_errors_is_fully_created() {
        let body = json!({ "took": 3, "errors": false, "items": [
            { "create": { "status": 201 } },
            { "create": { "status": 201 } },
        ]});

        assert_eq!(
            parse_bulk_response(&body, 2).unwrap(),
            vec![ItemOutcome::Created, ItemOutcome::Created]
        );
    }

    #[test]
    fn item_errors_are_reported_per_document() {
        let body = json!({ "errors": true, "items": [
            { "create": { "status": 201 } },
            { "create": { "status": 400, "error": { "type": "mapper_parsing_exception", "reason": "bad field" } } },
            { "create": { "status": 429, "error": { "type": "es_rejected_execution_exception" } } },
        ]});

        let outcomes = parse_bulk_response(&body, 3).unwrap();

        assert_eq!(outcomes[0], ItemOutcome::Created);
        assert_eq!(
            outcomes[1],
            ItemOutcome::Failed {
                status: 400,
                reason: "mapper_parsing_exception: bad field".to_string()
            }
        );
        assert!(!outcomes[1].is_retryable());
        assert!(outcomes[2].is_retryable());
    }

    #[test]
    fn mismatched_item_count_is_malformed() {
        let body = json!({ "errors": true, "items": [ { "create": { "status": 201 } } ]});

        let err = parse_bulk_response(&body, 2).unwrap_err();
        assert!(matches!(err, TransportError::MalformedResponse(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn classifies_request_failures() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            TransportError::Rejected {
                status: 503,
                reason: "unavailable".to_string()
            }
            .is_retryable()
        );
        assert!(
            !TransportError::Rejected {
                status: 400,
                reason: "bad request".to_string()
            }
            .is_retryable()
        );
    }
}
