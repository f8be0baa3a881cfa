//! # Catalog Repository
//!
//! Package definitions and the car registry. Both are read-only to the
//! engine; the write methods exist for seeding and administration.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use washpass_core::{Car, PackageDefinition};

/// Repository for packages and cars.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    /// Creates a new CatalogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Packages
    // =========================================================================

    pub async fn find_package(&self, id: &str) -> DbResult<Option<PackageDefinition>> {
        let package =
            sqlx::query_as::<_, PackageDefinition>("SELECT * FROM packages WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(package)
    }

    /// Packages offered for sale, cheapest first. The reward package has a
    /// zero price and is excluded.
    pub async fn list_packages(&self) -> DbResult<Vec<PackageDefinition>> {
        let packages = sqlx::query_as::<_, PackageDefinition>(
            "SELECT * FROM packages WHERE price_cents > 0 ORDER BY price_cents, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(packages)
    }

    /// Inserts or replaces a catalog entry.
    pub async fn upsert_package(&self, package: &PackageDefinition) -> DbResult<()> {
        debug!(package_id = %package.id, "Upserting package");

        sqlx::query(
            r#"
            INSERT INTO packages (id, name, wash_units, validity_days, required_car_class, price_cents)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                wash_units = excluded.wash_units,
                validity_days = excluded.validity_days,
                required_car_class = excluded.required_car_class,
                price_cents = excluded.price_cents
            "#,
        )
        .bind(&package.id)
        .bind(&package.name)
        .bind(package.wash_units)
        .bind(package.validity_days)
        .bind(package.required_car_class)
        .bind(package.price_cents)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Cars
    // =========================================================================

    /// A car, only if it belongs to `owner_user_id`.
    pub async fn find_owned_car(&self, owner_user_id: &str, car_id: &str) -> DbResult<Option<Car>> {
        let car = sqlx::query_as::<_, Car>(
            "SELECT * FROM cars WHERE id = ?1 AND owner_user_id = ?2",
        )
        .bind(car_id)
        .bind(owner_user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(car)
    }

    /// Registers a car. The owner's account row must exist.
    pub async fn register_car(&self, car: &Car) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cars (id, owner_user_id, car_class) VALUES (?1, ?2, ?3)
            ON CONFLICT (id) DO UPDATE SET car_class = excluded.car_class
            "#,
        )
        .bind(&car.id)
        .bind(&car.owner_user_id)
        .bind(car.car_class)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_cars(&self, owner_user_id: &str) -> DbResult<Vec<Car>> {
        let cars = sqlx::query_as::<_, Car>("SELECT * FROM cars WHERE owner_user_id = ?1 ORDER BY id")
            .bind(owner_user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(cars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{seed_basics, test_db};
    use washpass_core::{CarClass, REFERRAL_REWARD_PACKAGE_ID};

    #[tokio::test]
    async fn test_packages() {
        let db = test_db().await;
        let (package, _) = seed_basics(&db).await;
        let repo = db.catalog();

        let found = repo.find_package(&package.id).await.unwrap().unwrap();
        assert_eq!(found.wash_units, 5);
        assert_eq!(found.required_car_class, None);

        let reward = repo.find_package(REFERRAL_REWARD_PACKAGE_ID).await.unwrap().unwrap();
        assert_eq!(reward.wash_units, 2);
        assert_eq!(reward.validity_days, 30);

        let listed = repo.list_packages().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, package.id);

        let mut changed = package.clone();
        changed.required_car_class = Some(CarClass::Large);
        repo.upsert_package(&changed).await.unwrap();
        let found = repo.find_package(&package.id).await.unwrap().unwrap();
        assert_eq!(found.required_car_class, Some(CarClass::Large));
    }

    #[tokio::test]
    async fn test_owned_car_lookup() {
        let db = test_db().await;
        let (_, car) = seed_basics(&db).await;
        let repo = db.catalog();

        assert!(repo.find_owned_car("user-1", &car.id).await.unwrap().is_some());
        assert!(repo.find_owned_car("someone-else", &car.id).await.unwrap().is_none());
        assert_eq!(repo.list_cars("user-1").await.unwrap().len(), 1);
    }
}
