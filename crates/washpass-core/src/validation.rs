//! # Validation Module
//!
//! Input and compatibility rules applied before any persistence runs.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP extractors (apps/api)                                   │
//! │  └── Type validation (JSON deserialization, x-user-id header)          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Identifier / barcode / referral code shape                        │
//! │  ├── Car class vs package requirement                                  │
//! │  └── Paid amount vs catalog price                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (quota_remaining >= 0)                                      │
//! │  ├── UNIQUE (barcode_token), UNIQUE (external_transaction_id)          │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::{Car, PackageDefinition};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest identifier accepted from a caller.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Longest barcode string accepted from a scanner.
pub const MAX_BARCODE_LEN: usize = 128;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a caller-supplied identifier (user, car, package, station).
///
/// Returns the trimmed value.
///
/// ## Example
/// ```rust
/// use washpass_core::validation::validate_identifier;
///
/// assert_eq!(validate_identifier("car_id", " car-1 ").unwrap(), "car-1");
/// assert!(validate_identifier("car_id", "").is_err());
/// ```
pub fn validate_identifier(field: &str, value: &str) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(value.to_string())
}

/// Normalizes a scanned barcode.
///
/// Scanners add whitespace and some upper-case hex. Anything non-empty and
/// reasonably short is accepted; a value that matches no token is a lookup
/// miss, not a validation failure.
pub fn normalize_barcode(raw: &str) -> ValidationResult<String> {
    let barcode = raw.trim();

    if barcode.is_empty() {
        return Err(ValidationError::Required {
            field: "barcode".to_string(),
        });
    }

    if barcode.len() > MAX_BARCODE_LEN {
        return Err(ValidationError::TooLong {
            field: "barcode".to_string(),
            max: MAX_BARCODE_LEN,
        });
    }

    Ok(barcode.to_ascii_lowercase())
}

/// Normalizes a referral code typed by a user.
pub fn normalize_referral_code(raw: &str) -> ValidationResult<String> {
    let code = raw.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "referral_code".to_string(),
        });
    }

    if code.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: "referral_code".to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    Ok(code.to_ascii_lowercase())
}

// =============================================================================
// Business Rule Validators
// =============================================================================

/// Validates a catalog entry before it is written.
pub fn validate_package_definition(package: &PackageDefinition) -> ValidationResult<()> {
    validate_identifier("package_id", &package.id)?;

    if package.name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }
    if package.wash_units <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "wash_units".to_string(),
        });
    }
    if package.validity_days <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "validity_days".to_string(),
        });
    }
    if package.price_cents < 0 {
        return Err(ValidationError::MustBePositive {
            field: "price_cents".to_string(),
        });
    }
    Ok(())
}

/// Checks that `car` may be bound to `package`.
///
/// ## Example
/// ```rust
/// use washpass_core::validation::check_car_compatibility;
/// use washpass_core::{Car, CarClass, PackageDefinition};
///
/// let package = PackageDefinition {
///     id: "suv-5".into(),
///     name: "SUV five pack".into(),
///     wash_units: 5,
///     validity_days: 30,
///     required_car_class: Some(CarClass::Large),
///     price_cents: 15000,
/// };
/// let car = Car { id: "car-1".into(), owner_user_id: "u1".into(), car_class: CarClass::Small };
///
/// assert!(check_car_compatibility(&package, &car).is_err());
/// ```
pub fn check_car_compatibility(package: &PackageDefinition, car: &Car) -> CoreResult<()> {
    match package.required_car_class {
        Some(required) if required != car.car_class => Err(CoreError::IncompatiblePackage {
            required,
            actual: car.car_class,
        }),
        _ => Ok(()),
    }
}

/// Checks the paid amount against the catalog price.
pub fn check_payment_amount(package: &PackageDefinition, amount_cents: i64) -> CoreResult<()> {
    if amount_cents < 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        }
        .into());
    }
    if amount_cents != package.price_cents {
        return Err(CoreError::AmountMismatch {
            expected: package.price_cents,
            actual: amount_cents,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
