use super::assets_model::Asset;
use crate::errors::Result;

/// Read side of the asset roster, implemented by the storage layer.
pub trait AssetRepositoryTrait: Send + Sync {
    /// Active assets with their category and optional preferred consumer.
    fn list_active(&self) -> Result<Vec<Asset>>;
}
