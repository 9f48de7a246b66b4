//! Cache-or-fetch loading of the animal dataset.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::cache::CacheStore;
use crate::errors::AppError;
use crate::inflight::InFlight;
use crate::models::Animal;
use crate::upstream::AnimalSource;

/// Where a dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Cache,
    Upstream,
}

/// A loaded dataset.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub animals: Arc<Vec<Animal>>,
    pub origin: Origin,
}

/// Decides per request whether the cache can answer or upstream must.
pub struct DataFetchOrchestrator {
    cache: Arc<CacheStore>,
    source: Arc<dyn AnimalSource>,
    dataset_key: String,
    in_flight: InFlight<String, Result<Dataset, AppError>>,
}

impl DataFetchOrchestrator {
    pub fn new(
        cache: Arc<CacheStore>,
        source: Arc<dyn AnimalSource>,
        dataset_key: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            source,
            dataset_key: dataset_key.into(),
            in_flight: InFlight::new(),
        }
    }

    /// Load the dataset from cache, falling back to a single upstream fetch.
    ///
    /// Concurrent callers that all miss share one upstream request.
    pub async fn fetch(&self) -> Result<Dataset, AppError> {
        if let Some(cached) = self.cache.get(&self.dataset_key).await {
            match parse_records(cached) {
                Ok(animals) => {
                    return Ok(Dataset {
                        animals: Arc::new(animals),
                        origin: Origin::Cache,
                    })
                }
                Err(e) => tracing::warn!("Ignoring unusable cached dataset: {}", e),
            }
        }

        self.in_flight
            .run(self.dataset_key.clone(), || self.fetch_upstream())
            .await
    }

    async fn fetch_upstream(&self) -> Result<Dataset, AppError> {
        let raw = self.source.fetch_all().await?;
        let animals = parse_records(raw)?;
        tracing::info!("Fetched {} animals from upstream", animals.len());

        match serde_json::to_value(&animals) {
            Ok(payload) => {
                if let Err(e) = self.cache.put(&self.dataset_key, payload).await {
                    tracing::warn!("Continuing without cached dataset: {}", e);
                }
            }
            Err(e) => tracing::warn!("Could not serialize dataset for caching: {}", e),
        }

        Ok(Dataset {
            animals: Arc::new(animals),
            origin: Origin::Upstream,
        })
    }

    /// Look up a single animal by id.
    pub async fn find(&self, animal_id: &str) -> Result<Option<Animal>, AppError> {
        let dataset = self.fetch().await?;
        Ok(dataset
            .animals
            .iter()
            .find(|animal| animal.animal_id == animal_id)
            .cloned())
    }
}

/// Accept only a JSON array; elements that are not usable records are skipped.
fn parse_records(raw: Value) -> Result<Vec<Animal>, AppError> {
    let items = match raw {
        Value::Array(items) => items,
        other => {
            tracing::error!("Upstream returned a non-array payload: {}", truncate(&other));
            return Err(AppError::UpstreamFormat(
                "Expected a JSON array of animal records".to_string(),
            ));
        }
    };

    let total = items.len();
    let animals: Vec<Animal> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Animal>(item) {
            Ok(animal) => Some(animal),
            Err(e) => {
                tracing::debug!("Skipping malformed animal record: {}", e);
                None
            }
        })
        .collect();

    if animals.len() < total {
        tracing::warn!("Skipped {} malformed animal records", total - animals.len());
    }
    Ok(animals)
}

fn truncate(value: &Value) -> String {
    let text = value.to_string();
    match text.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    }
}
