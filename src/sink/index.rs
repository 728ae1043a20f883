use crate::event::EventRecord;
use crate::index::IndexDeliveryClient;
use crate::sink::Sink;

/// Hands events over to the [`IndexDeliveryClient`] for batched remote delivery.
///
/// Enqueueing never blocks, the actual transmission happens on the client's background worker.
pub struct IndexSink {
    client: IndexDeliveryClient,
}

impl IndexSink {
    pub fn new(client: IndexDeliveryClient) -> Self {
        IndexSink { client }
    }
}

impl Sink for IndexSink {
    fn name(&self) -> &str {
        "index"
    }

    fn emit(&self, record: &EventRecord) -> anyhow::Result<()> {
        // Self-diagnostics stay local, otherwise a failing index would report into itself.
        if !record.is_diagnostic() {
            self.client.enqueue(record.clone());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;
    use crate::index::{DeliveryOptions, IndexTransport, ItemOutcome, TransportError};
    use crate::sink::SinkRouter;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    struct NoIndex;

    #[async_trait]
    impl IndexTransport for NoIndex {
        async fn bulk_create(
            &self,
            _index: &str,
            documents: &[Value],
        ) -> Result<Vec<ItemOutcome>, TransportError> {
            Ok(vec![ItemOutcome::Created; documents.len()])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn diagnostics_are_not_shipped() {
        let client =
            IndexDeliveryClient::start(Arc::new(NoIndex), DeliveryOptions::default(), SinkRouter::new());
        let sink = IndexSink::new(client.clone());

        sink.emit(&EventRecord::new(Level::Information, "Order placed"))
            .unwrap();
        sink.emit(&EventRecord::diagnostic(Level::Warning, "Index unreachable"))
            .unwrap();

        assert_eq!(client.pending(), 1);
        client.shutdown().await;
    }
}
