//! Favorites kept on this device for visitors who are not signed in.
//!
//! The full animal records are stored, not just ids, as one JSON array under
//! the `favorites` key. Every mutation writes the whole snapshot before the
//! in-memory list changes.
//!
//! The store starts unloaded. Until `load` has restored the previous
//! snapshot, `list` is empty and mutations are refused, since writing then
//! would replace the saved favorites with an empty list.

#[cfg(test)]
mod memory;
mod storage;

#[cfg(test)]
pub use memory::MemoryStorage;
pub use storage::*;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::errors::AppError;
use crate::models::Animal;

/// Storage key holding the favorites snapshot.
pub const FAVORITES_KEY: &str = "favorites";

#[derive(Default)]
struct State {
    items: Vec<Animal>,
    loaded: bool,
}

pub struct LocalFavoritesStore {
    storage: Arc<dyn LocalStorage>,
    state: RwLock<State>,
    /// Serialises mutations so snapshots reach storage in issue order.
    writer: Mutex<()>,
}

impl LocalFavoritesStore {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            storage,
            state: RwLock::new(State::default()),
            writer: Mutex::new(()),
        }
    }

    /// Restore the persisted snapshot. Returns how many favorites were loaded.
    ///
    /// A missing snapshot is an empty list; an unreadable one is discarded
    /// with a warning. Either way the store ends up loaded.
    pub async fn load(&self) -> Result<usize, AppError> {
        let _writer = self.writer.lock().await;

        let items = match self.storage.get_item(FAVORITES_KEY).await? {
            None => {
                tracing::info!("No saved favorites found");
                Vec::new()
            }
            Some(raw) => parse_snapshot(&raw),
        };

        let count = items.len();
        let mut state = self.state.write().await;
        state.items = items;
        state.loaded = true;
        tracing::info!("Loaded {} favorites", count);
        Ok(count)
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.loaded
    }

    /// Current favorites in insertion order.
    pub async fn list(&self) -> Vec<Animal> {
        self.state.read().await.items.clone()
    }

    pub async fn contains(&self, animal_id: &str) -> bool {
        self.state
            .read()
            .await
            .items
            .iter()
            .any(|item| item.animal_id == animal_id)
    }

    /// Append `animal` unless one with the same id is already saved.
    /// Returns whether it was added.
    pub async fn add(&self, animal: Animal) -> Result<bool, AppError> {
        if animal.animal_id.trim().is_empty() {
            return Err(AppError::Validation("Animal id is required".to_string()));
        }

        let _writer = self.writer.lock().await;
        let mut next = self.loaded_items().await?;

        if next.iter().any(|item| item.animal_id == animal.animal_id) {
            tracing::debug!("Animal {} is already a favorite", animal.animal_id);
            return Ok(false);
        }

        let animal_id = animal.animal_id.clone();
        next.push(animal);
        self.commit(next).await?;
        tracing::info!("Added animal {} to favorites", animal_id);
        Ok(true)
    }

    /// Remove the favorite with `animal_id`. Returns whether one was removed.
    pub async fn remove(&self, animal_id: &str) -> Result<bool, AppError> {
        let _writer = self.writer.lock().await;
        let mut next = self.loaded_items().await?;

        let before = next.len();
        next.retain(|item| item.animal_id != animal_id);
        if next.len() == before {
            return Ok(false);
        }

        self.commit(next).await?;
        tracing::info!("Removed animal {} from favorites", animal_id);
        Ok(true)
    }

    async fn loaded_items(&self) -> Result<Vec<Animal>, AppError> {
        let state = self.state.read().await;
        if !state.loaded {
            return Err(AppError::NotLoaded(
                "Favorites are still loading from local storage".to_string(),
            ));
        }
        Ok(state.items.clone())
    }

    async fn commit(&self, items: Vec<Animal>) -> Result<(), AppError> {
        let snapshot = serde_json::to_string(&items)
            .map_err(|e| AppError::Internal(format!("Could not encode favorites: {}", e)))?;

        if let Err(e) = self.storage.set_item(FAVORITES_KEY, &snapshot).await {
            tracing::error!("Failed to save favorites: {}", e);
            return Err(e.into());
        }

        self.state.write().await.items = items;
        Ok(())
    }
}

fn parse_snapshot(raw: &str) -> Vec<Animal> {
    let items = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            tracing::warn!("Saved favorites are not an array, starting empty");
            return Vec::new();
        }
        Err(e) => {
            tracing::error!("Could not parse saved favorites, starting empty: {}", e);
            return Vec::new();
        }
    };

    let mut animals: Vec<Animal> = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<Animal>(item) {
            Ok(animal) if !animals.iter().any(|a| a.animal_id == animal.animal_id) => {
                animals.push(animal)
            }
            Ok(animal) => tracing::warn!("Dropping duplicate saved favorite {}", animal.animal_id),
            Err(e) => tracing::warn!("Dropping unreadable saved favorite: {}", e),
        }
    }
    animals
}
