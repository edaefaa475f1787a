//! # Validation Module
//!
//! Input validation for records entering the local store or arriving from
//! the remote store.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: UI (scan screen, edit forms)                                 │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Repositories / remote adapter boundary                       │
//! │  └── THIS MODULE: field and record validation                          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── UNIQUE constraints (barcode, outbox key)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use stockroom_core::validation::{validate_barcode, validate_name};
//!
//! validate_barcode("4006381333931").unwrap();
//! assert!(validate_name("name", "   ").is_err());
//! ```

use uuid::Uuid;

use crate::error::ValidationError;
use crate::types::{CheckoutLog, Item, Staff};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted barcode payload.
pub const MAX_BARCODE_LEN: usize = 64;

/// Longest accepted display name.
pub const MAX_NAME_LEN: usize = 200;

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a required display string (name, category, department).
///
/// ## Rules
/// - Must not be blank
/// - At most 200 characters
pub fn validate_name(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates a scanned barcode.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - ASCII letters, digits, hyphens, dots and underscores only
///
/// ## Example
/// ```rust
/// use stockroom_core::validation::validate_barcode;
///
/// assert!(validate_barcode("CODE128-00042").is_ok());
/// assert!(validate_barcode("").is_err());
/// assert!(validate_barcode("has space").is_err());
/// ```
pub fn validate_barcode(barcode: &str) -> ValidationResult<()> {
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

    if !barcode
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err(ValidationError::InvalidFormat {
            field: "barcode".to_string(),
            reason: "must contain only letters, digits, '-', '.' and '_'".to_string(),
        });
    }

    Ok(())
}

/// Validates a record identifier (hyphenated UUID).
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: e.to_string(),
        })
}

/// Minimal e-mail shape check: `local@domain` with a dot in the domain.
pub fn validate_email(email: &str) -> ValidationResult<()> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    };

    if !valid {
        return Err(ValidationError::InvalidFormat {
            field: "email".to_string(),
            reason: "expected local@domain".to_string(),
        });
    }

    Ok(())
}

/// Validates a search query and returns it trimmed.
pub fn validate_search_query(query: &str) -> ValidationResult<String> {
    let query = query.trim();

    if query.len() > 100 {
        return Err(ValidationError::TooLong {
            field: "query".to_string(),
            max: 100,
        });
    }

    Ok(query.to_string())
}

// =============================================================================
// Record Validators
// =============================================================================

/// Validates every field of an item.
pub fn validate_item(item: &Item) -> ValidationResult<()> {
    validate_id("id", &item.id)?;
    validate_name("name", &item.name)?;
    validate_name("category", &item.category)?;
    if let Some(barcode) = &item.barcode {
        validate_barcode(barcode)?;
    }
    Ok(())
}

/// Validates every field of a staff record.
pub fn validate_staff(staff: &Staff) -> ValidationResult<()> {
    validate_id("id", &staff.id)?;
    validate_name("name", &staff.name)?;
    validate_name("department", &staff.department)?;
    if let Some(email) = &staff.email {
        validate_email(email)?;
    }
    Ok(())
}

/// Validates a checkout log, including timestamp ordering.
pub fn validate_checkout_log(log: &CheckoutLog) -> ValidationResult<()> {
    validate_id("id", &log.id)?;
    validate_id("item_id", &log.item_id)?;
    validate_id("staff_id", &log.staff_id)?;

    if let Some(checkin) = log.checkin_time {
        if checkin < log.checkout_time {
            return Err(ValidationError::TooEarly {
                field: "checkin_time".to_string(),
                earliest: "checkout_time".to_string(),
            });
        }
    }

    if let Some(due) = log.due_time {
        if due < log.checkout_time {
            return Err(ValidationError::TooEarly {
                field: "due_time".to_string(),
                earliest: "checkout_time".to_string(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("name", "Cordless Drill").is_ok());
        assert!(matches!(
            validate_name("name", "  "),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_name("name", &"x".repeat(201)),
            Err(ValidationError::TooLong { max: 200, .. })
        ));
    }

    #[test]
    fn test_validate_barcode() {
        assert!(validate_barcode("4006381333931").is_ok());
        assert!(validate_barcode("ASSET_01.A-2").is_ok());
        assert!(validate_barcode(&"1".repeat(65)).is_err());
        assert!(validate_barcode("ÄBC").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ana@example.org").is_ok());
        assert!(validate_email("ana@localhost").is_err());
        assert!(validate_email("@example.org").is_err());
        assert!(validate_email("nope").is_err());
    }

    #[test]
    fn test_validate_item() {
        let item = Item::new("Projector", "AV");
        assert!(validate_item(&item).is_ok());

        let mut bad = item.clone();
        bad.id = "not-a-uuid".to_string();
        assert!(validate_item(&bad).is_err());

        let mut bad = item;
        bad.barcode = Some(String::new());
        assert!(validate_item(&bad).is_err());
    }

    #[test]
    fn test_validate_checkout_log_ordering() {
        let item = Item::new("Camera", "AV");
        let staff = Staff::new("Kim", "Media");
        let mut log = CheckoutLog::open(&item.id, &staff.id, 10_000, Some(20_000));
        assert!(validate_checkout_log(&log).is_ok());

        log.checkin_time = Some(5_000);
        assert!(matches!(
            validate_checkout_log(&log),
            Err(ValidationError::TooEarly { .. })
        ));
    }

    #[test]
    fn test_validate_search_query_trims() {
        assert_eq!(validate_search_query("  drill ").unwrap(), "drill");
        assert!(validate_search_query(&"q".repeat(101)).is_err());
    }
}
