pub mod assets_model;
pub mod assets_traits;

pub use assets_model::*;
pub use assets_traits::AssetRepositoryTrait;
