//! # External Collaborators
//!
//! The car registry and the package catalog are owned by other services.
//! The engine reads them through these ports; the SQLite adapters read the
//! local replica in `cars` and `packages`.

use async_trait::async_trait;
use washpass_core::{Car, PackageDefinition};
use washpass_db::CatalogRepository;

use crate::error::EngineResult;

#[async_trait]
pub trait CarRegistry: Send + Sync {
    /// The car, only if `user_id` owns it.
    async fn find_owned_car(&self, user_id: &str, car_id: &str) -> EngineResult<Option<Car>>;
}

#[async_trait]
pub trait PackageCatalog: Send + Sync {
    async fn find_package(&self, package_id: &str) -> EngineResult<Option<PackageDefinition>>;
}

#[derive(Debug, Clone)]
pub struct SqliteCarRegistry {
    catalog: CatalogRepository,
}

impl SqliteCarRegistry {
    pub fn new(catalog: CatalogRepository) -> Self {
        SqliteCarRegistry { catalog }
    }
}

#[async_trait]
impl CarRegistry for SqliteCarRegistry {
    async fn find_owned_car(&self, user_id: &str, car_id: &str) -> EngineResult<Option<Car>> {
        Ok(self.catalog.find_owned_car(user_id, car_id).await?)
    }
}

#[derive(Debug, Clone)]
pub struct SqlitePackageCatalog {
    catalog: CatalogRepository,
}

impl SqlitePackageCatalog {
    pub fn new(catalog: CatalogRepository) -> Self {
        SqlitePackageCatalog { catalog }
    }
}

#[async_trait]
impl PackageCatalog for SqlitePackageCatalog {
    async fn find_package(&self, package_id: &str) -> EngineResult<Option<PackageDefinition>> {
        Ok(self.catalog.find_package(package_id).await?)
    }
}
