//! # Seed Data Generator
//!
//! Populates the database with catalog packages, demo accounts and cars for
//! local development.
//!
//! ## Usage
//! ```bash
//! cargo run -p washpass-db --bin seed
//!
//! # Specify database path
//! cargo run -p washpass-db --bin seed -- --db ./data/washpass.db
//! ```
//!
//! ## Generated Data
//! - One package per (tier, car class) plus a few class-agnostic packages
//! - Demo accounts `demo-user-1..=N`, each with one car
//! - A referral code for the first demo account

use chrono::Utc;
use std::env;
use washpass_core::validation::validate_package_definition;
use washpass_core::{Car, CarClass, PackageDefinition};
use washpass_db::{Database, DbConfig};

/// (tier id, display name, wash units, validity days, base price in cents)
const TIERS: &[(&str, &str, i64, i64, i64)] = &[
    ("basic", "Basic", 3, 30, 4500),
    ("silver", "Silver", 5, 60, 7000),
    ("gold", "Gold", 10, 90, 12000),
    ("platinum", "Platinum", 20, 180, 21000),
];

/// Price added per car class, in cents.
const CLASS_SURCHARGE: &[(CarClass, i64)] = &[
    (CarClass::Small, 0),
    (CarClass::Medium, 1000),
    (CarClass::Large, 2500),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./washpass_dev.db");
    let mut users: usize = 5;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--users" | "-u" => {
                if i + 1 < args.len() {
                    users = args[i + 1].parse().unwrap_or(5);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("WashPass Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./washpass_dev.db)");
                println!("  -u, --users <N>    Demo accounts to create (default: 5)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 WashPass Seed Data Generator");
    println!("===============================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    // Packages
    let mut packages = 0;
    for (tier, name, units, days, price) in TIERS {
        for (class, surcharge) in CLASS_SURCHARGE {
            let package = PackageDefinition {
                id: format!("{}-{}", tier, class),
                name: format!("{} ({})", name, class),
                wash_units: *units,
                validity_days: *days,
                required_car_class: Some(*class),
                price_cents: price + surcharge,
            };
            validate_package_definition(&package)?;
            db.catalog().upsert_package(&package).await?;
            packages += 1;
        }

        let any_class = PackageDefinition {
            id: format!("{}-any", tier),
            name: format!("{} (any car)", name),
            wash_units: *units,
            validity_days: *days,
            required_car_class: None,
            price_cents: price + 3000,
        };
        validate_package_definition(&any_class)?;
        db.catalog().upsert_package(&any_class).await?;
        packages += 1;
    }
    println!("✓ {} packages", packages);

    // Accounts and cars
    let now = Utc::now();
    for n in 1..=users {
        let user_id = format!("demo-user-{}", n);
        db.accounts().ensure(&user_id, now).await?;

        let (class, _) = CLASS_SURCHARGE[n % CLASS_SURCHARGE.len()];
        let car = Car {
            id: format!("demo-car-{}", n),
            owner_user_id: user_id,
            car_class: class,
        };
        db.catalog().register_car(&car).await?;
    }
    println!("✓ {} demo accounts with cars", users);

    if users > 0 {
        db.accounts()
            .set_referral_code_if_absent("demo-user-1", "d3a0c0de0001")
            .await?;
        println!("✓ Referral code for demo-user-1: d3a0c0de0001");
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
