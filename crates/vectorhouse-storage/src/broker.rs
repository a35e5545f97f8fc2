//! Broker: Collection Metadata Lookup
//!
//! The write path needs exactly one thing from the log broker's control
//! plane: the collection schema, fetched once when a channel's write
//! buffer is created and cached for the collection lifetime. Schema
//! evolution is handled by the control plane recreating the channel.

use crate::error::Result;
use async_trait::async_trait;
use vectorhouse_core::CollectionSchema;

#[async_trait]
pub trait Broker: Send + Sync {
    async fn describe_collection(&self, collection_id: i64) -> Result<CollectionSchema>;
}

/// Fixed-schema broker for tests and embedded use
pub struct StaticBroker {
    schema: CollectionSchema,
}

impl StaticBroker {
    pub fn new(schema: CollectionSchema) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl Broker for StaticBroker {
    async fn describe_collection(&self, _collection_id: i64) -> Result<CollectionSchema> {
        Ok(self.schema.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BloomFilterConfig;
    use crate::metacache::MetaCache;
    use vectorhouse_core::{DataType, FieldSchema};

    #[tokio::test]
    async fn test_meta_cache_opens_from_broker_schema() {
        let schema = CollectionSchema::new(
            "docs",
            vec![FieldSchema::new(100, "id", DataType::Int64).primary_key()],
        );
        let broker = StaticBroker::new(schema);

        let cache = MetaCache::open(&broker, 1, "ch-0", BloomFilterConfig::default())
            .await
            .unwrap();
        assert_eq!(cache.schema().name, "docs");
        assert_eq!(cache.collection_id(), 1);
    }
}
