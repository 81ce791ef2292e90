use serde::Serialize;

use super::aggregate::count_services;
use super::SERVICES;
use crate::db::DocumentStore;
use crate::errors::{EnrichmentError, FetchError};
use crate::models::{Category, Document, Service};

/// Ways to turn raw category documents into published categories, tried in
/// order until one succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStrategy {
    /// Fetch every service and count references per category.
    CountServices,
    /// Publish the categories with `service_count = 0`.
    ZeroCounts,
    /// Publish no categories at all.
    Empty,
}

pub const FALLBACK_CHAIN: [EnrichmentStrategy; 3] = [
    EnrichmentStrategy::CountServices,
    EnrichmentStrategy::ZeroCounts,
    EnrichmentStrategy::Empty,
];

#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    pub categories: Vec<Category>,
    pub strategy: EnrichmentStrategy,
    /// Failures of the strategies tried before `strategy`.
    pub errors: Vec<EnrichmentError>,
}

impl EnrichmentStrategy {
    pub async fn apply(
        &self,
        store: &dyn DocumentStore,
        docs: &[Document],
    ) -> Result<Vec<Category>, EnrichmentError> {
        match self {
            EnrichmentStrategy::CountServices => {
                let services: Vec<Service> = store
                    .fetch_all(SERVICES, &[])
                    .await
                    .map_err(EnrichmentError::Services)?
                    .iter()
                    .map(Service::from_document)
                    .collect();
                let categories = ingest(docs).map_err(EnrichmentError::Categories)?;
                Ok(count_services(categories, &services))
            }
            EnrichmentStrategy::ZeroCounts => ingest(docs).map_err(EnrichmentError::Categories),
            EnrichmentStrategy::Empty => Ok(vec![]),
        }
    }
}

/// Ingests every well-formed category and skips the rest. Fails only when
/// there were documents and none of them could be ingested.
fn ingest(docs: &[Document]) -> Result<Vec<Category>, FetchError> {
    let mut categories = Vec::with_capacity(docs.len());
    let mut first_error = None;

    for doc in docs {
        match Category::from_document(doc) {
            Ok(category) => categories.push(category),
            Err(e) => {
                tracing::warn!(id = %doc.id, error = %e, "skipping malformed category");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if categories.is_empty() => Err(e),
        _ => Ok(categories),
    }
}

pub async fn enrich_categories(store: &dyn DocumentStore, docs: &[Document]) -> EnrichmentOutcome {
    let mut errors = vec![];
    for strategy in FALLBACK_CHAIN {
        match strategy.apply(store, docs).await {
            Ok(categories) => {
                if !errors.is_empty() {
                    tracing::warn!(
                        ?strategy,
                        failures = errors.len(),
                        "category enrichment degraded"
                    );
                }
                return EnrichmentOutcome {
                    categories,
                    strategy,
                    errors,
                };
            }
            Err(e) => {
                tracing::warn!(?strategy, error = %e, "category enrichment step failed");
                errors.push(e);
            }
        }
    }

    EnrichmentOutcome {
        categories: vec![],
        strategy: EnrichmentStrategy::Empty,
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SnapshotReceiver;
    use crate::models::Filter;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedServices(Result<Vec<Document>, FetchError>);

    #[async_trait]
    impl DocumentStore for FixedServices {
        async fn fetch_all(&self, _: &str, _: &[Filter]) -> Result<Vec<Document>, FetchError> {
            self.0.clone()
        }

        async fn watch(&self, _: &str, _: &[Filter]) -> Result<SnapshotReceiver, FetchError> {
            Err(FetchError::Unavailable)
        }
    }

    fn categories() -> Vec<Document> {
        vec![Document::new("c1", json!({"name": "Hair"}))]
    }

    #[tokio::test]
    async fn test_full_enrichment() {
        let store = FixedServices(Ok(vec![
            Document::new("s1", json!({"category": {"id": "c1"}})),
            Document::new("s2", json!({"category": "Hair"})),
            Document::new("s3", json!({"category": "Nails"})),
        ]));
        let outcome = enrich_categories(&store, &categories()).await;
        assert_eq!(outcome.strategy, EnrichmentStrategy::CountServices);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.categories[0].service_count, 2);
    }

    #[tokio::test]
    async fn test_services_failure_zeroes_counts() {
        let store = FixedServices(Err(FetchError::Unavailable));
        let outcome = enrich_categories(&store, &categories()).await;
        assert_eq!(outcome.strategy, EnrichmentStrategy::ZeroCounts);
        assert_eq!(outcome.errors.len(), 1);
        assert!(!outcome.categories.is_empty());
        assert!(outcome.categories.iter().all(|c| c.service_count == 0));
    }

    #[tokio::test]
    async fn test_malformed_category_skipped_others_counted() {
        let store = FixedServices(Ok(vec![
            Document::new("s1", json!({"category": "Hair"})),
        ]));
        let docs = vec![
            Document::new("c1", json!({"name": "Hair"})),
            Document::new("c2", json!({"isActive": true})),
        ];
        let outcome = enrich_categories(&store, &docs).await;
        assert_eq!(outcome.strategy, EnrichmentStrategy::CountServices);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.categories.len(), 1);
        assert_eq!(outcome.categories[0].id, "c1");
        assert_eq!(outcome.categories[0].service_count, 1);
    }

    #[tokio::test]
    async fn test_malformed_category_skipped_with_zero_counts() {
        let store = FixedServices(Err(FetchError::Unavailable));
        let docs = vec![
            Document::new("c1", json!({"name": "Hair"})),
            Document::new("c2", json!({"isActive": true})),
        ];
        let outcome = enrich_categories(&store, &docs).await;
        assert_eq!(outcome.strategy, EnrichmentStrategy::ZeroCounts);
        assert_eq!(outcome.categories.len(), 1);
        assert_eq!(outcome.categories[0].service_count, 0);
    }

    #[tokio::test]
    async fn test_all_malformed_categories_publish_empty_list() {
        let store = FixedServices(Ok(vec![]));
        let docs = vec![
            Document::new("c1", json!({"isActive": true})),
            Document::new("c2", json!({})),
        ];
        let outcome = enrich_categories(&store, &docs).await;
        assert_eq!(outcome.strategy, EnrichmentStrategy::Empty);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.categories.is_empty());
    }

    #[tokio::test]
    async fn test_no_categories_is_not_a_failure() {
        let store = FixedServices(Ok(vec![]));
        let outcome = enrich_categories(&store, &[]).await;
        assert_eq!(outcome.strategy, EnrichmentStrategy::CountServices);
        assert!(outcome.categories.is_empty());
    }
}
