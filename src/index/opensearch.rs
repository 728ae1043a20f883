//! OpenSearch / Elasticsearch transport using bulk "create" requests.

use crate::index::transport::{IndexTransport, ItemOutcome, TransportError, parse_bulk_response};
use anyhow::Context;
use async_trait::async_trait;
use opensearch::auth::Credentials;
use opensearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use opensearch::{BulkOperation, BulkParts, OpenSearch};
use serde_json::Value;

/// Sends documents into a fixed index of a single OpenSearch node.
///
/// Documents are created without an ID so that the backend assigns one; index templates are
/// expected to be provisioned externally and are never registered from here.
pub struct OpenSearchTransport {
    client: OpenSearch,
}

impl OpenSearchTransport {
    pub fn new(url: &str, credentials: Option<(String, String)>) -> anyhow::Result<Self> {
        let conn_pool =
            SingleNodeConnectionPool::new(url.parse().context("Invalid OpenSearch URL")?);

        let mut builder = TransportBuilder::new(conn_pool);
        if let Some((user, pass)) = credentials
            && !user.is_empty()
        {
            builder = builder.auth(Credentials::Basic(user, pass));
        }

        let transport = builder
            .build()
            .context("Failed to build the OpenSearch transport")?;

        Ok(Self {
            client: OpenSearch::new(transport),
        })
    }
}

#[async_trait]
impl IndexTransport for OpenSearchTransport {
    #[tracing::instrument(level = "debug", skip(self, documents), fields(documents = documents.len()))]
    async fn bulk_create(
        &self,
        index: &str,
        documents: &[Value],
    ) -> Result<Vec<ItemOutcome>, TransportError> {
        let body: Vec<BulkOperation<&Value>> = documents
            .iter()
            .map(|document| BulkOperation::create_without_id(document).into())
            .collect();

        let response = self
            .client
            .bulk(BulkParts::Index(index))
            .body(body)
            .send()
            .await
            .map_err(|err| TransportError::Unreachable(err.into()))?;

        let status = response.status_code().as_u16();
        if !response.status_code().is_success() {
            let reason = response
                .text()
                .await
                .unwrap_or_else(|err| format!("unreadable response body: {}", err));
            return Err(TransportError::Rejected { status, reason });
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|err| TransportError::MalformedResponse(err.to_string()))?;

        parse_bulk_response(&body, documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use warp::Filter;
    use warp::http::StatusCode;

    type Received = Arc<Mutex<Vec<(String, String)>>>;

    /// Serves a single bulk endpoint answering with the given status and body, recording the
    /// path and body of every request.
    fn serve_bulk(status: u16, answer: Value) -> (String, Received) {
        let received: Received = Arc::default();
        let captured = received.clone();
        let status = StatusCode::from_u16(status).unwrap();

        let route = warp::path::full().and(warp::body::bytes()).map(
            move |path: warp::path::FullPath, body: warp::hyper::body::Bytes| {
                captured.lock().unwrap().push((
                    path.as_str().to_string(),
                    String::from_utf8_lossy(&body).into_owned(),
                ));
                warp::reply::with_status(warp::reply::json(&answer), status)
            },
        );
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        (format!("http://{}", addr), received)
    }

    fn documents() -> Vec<Value> {
        vec![
            json!({ "message": "first" }),
            json!({ "message": "second" }),
            json!({ "message": "third" }),
        ]
    }

    #[tokio::test]
    async fn creates_documents_without_ids_in_the_fixed_index() {
        let (url, received) = serve_bulk(
            200,
            json!({
                "took": 3,
                "errors": true,
                "items": [
                    { "create": { "_index": "timeseries", "status": 201 } },
                    { "create": { "_index": "timeseries", "status": 400,
                        "error": { "type": "mapper_parsing_exception", "reason": "failed to parse [Elapsed]" } } },
                    { "create": { "_index": "timeseries", "status": 429,
                        "error": { "type": "es_rejected_execution_exception", "reason": "queue is full" } } }
                ]
            }),
        );
        let transport = OpenSearchTransport::new(&url, None).unwrap();
        let documents = documents();

        let outcomes = transport
            .bulk_create("timeseries", &documents)
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0], ItemOutcome::Created);
        assert!(matches!(&outcomes[1], ItemOutcome::Failed { status: 400, reason } if reason.contains("mapper_parsing_exception")));
        assert!(!outcomes[1].is_retryable());
        assert!(outcomes[2].is_retryable());

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (path, body) = &received[0];
        assert_eq!(path, "/timeseries/_bulk");

        let lines: Vec<Value> = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 6);
        for (pair, document) in lines.chunks(2).zip(&documents) {
            let action = pair[0]["create"].as_object().unwrap();
            assert!(!action.contains_key("_id"));
            assert_eq!(&pair[1], document);
        }
    }

    #[tokio::test]
    async fn failed_bulk_requests_are_classified_by_status() {
        let (url, _) = serve_bulk(503, json!({ "error": "cluster unavailable" }));
        let transport = OpenSearchTransport::new(&url, None).unwrap();

        let err = transport
            .bulk_create("timeseries", &documents())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Rejected { status: 503, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn rejects_invalid_urls() {
        assert!(OpenSearchTransport::new("not a url", None).is_err());
    }

    #[test]
    fn builds_with_and_without_credentials() {
        assert!(OpenSearchTransport::new("http://localhost:9200", None).is_ok());
        assert!(
            OpenSearchTransport::new(
                "https://search.local:9200",
                Some(("shipper".to_string(), "secret".to_string()))
            )
            .is_ok()
        );
    }
}
