use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use thiserror::Error;
use ulid::Ulid;

use crate::error::{BookingError, PersistenceError};
use crate::model::Asset;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("asset not found: {0}")]
    NotFound(Ulid),
    #[error("asset directory backend: {0}")]
    Backend(String),
}

impl From<DirectoryError> for BookingError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::NotFound(id) => BookingError::NotFound(id),
            other => BookingError::Persistence(PersistenceError::Storage(other.to_string())),
        }
    }
}

/// Read-only asset lookup. The catalog itself is managed elsewhere.
#[async_trait]
pub trait AssetDirectory: Send + Sync {
    async fn get_by_id(&self, id: Ulid) -> Result<Asset, DirectoryError>;
}

/// In-process catalog.
#[derive(Default)]
pub struct MemoryDirectory {
    assets: DashMap<Ulid, Asset>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, asset: Asset) {
        self.assets.insert(asset.id, asset);
    }

    /// Register an available asset and return its id.
    pub fn add(&self, day_rate: Decimal) -> Ulid {
        let id = Ulid::new();
        self.upsert(Asset {
            id,
            day_rate,
            available: true,
        });
        id
    }

    pub fn set_available(&self, id: &Ulid, available: bool) -> Result<(), DirectoryError> {
        let mut asset = self.assets.get_mut(id).ok_or(DirectoryError::NotFound(*id))?;
        asset.available = available;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[async_trait]
impl AssetDirectory for MemoryDirectory {
    async fn get_by_id(&self, id: Ulid) -> Result<Asset, DirectoryError> {
        self.assets
            .get(&id)
            .map(|a| a.value().clone())
            .ok_or(DirectoryError::NotFound(id))
    }
}
