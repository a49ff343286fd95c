//! SQLite helper utilities for type conversion
//!
//! SQLite has no native UUID, array, or JSON column types. This module
//! converts between Rust types and their TEXT representations.

use anyhow::{Result, anyhow};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

// ============================================================================
// UUID Helpers
// ============================================================================

/// Convert a UUID to a SQLite-compatible string
#[inline]
pub fn uuid_to_str(id: Uuid) -> String {
    id.to_string()
}

/// Parse a SQLite string back to a UUID
#[inline]
pub fn str_to_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| anyhow!("Invalid UUID '{}': {}", s, e))
}

/// Parse an optional SQLite string to an optional UUID
#[inline]
pub fn str_to_uuid_opt(s: Option<&str>) -> Result<Option<Uuid>> {
    match s {
        Some(s) => Ok(Some(str_to_uuid(s)?)),
        None => Ok(None),
    }
}

/// Convert an optional UUID to an optional string for binding
#[inline]
pub fn uuid_opt_to_str(id: Option<Uuid>) -> Option<String> {
    id.map(|u| u.to_string())
}

// ============================================================================
// JSON Helpers (collections stored as TEXT)
// ============================================================================

/// Serialize any serializable value to a JSON string
#[inline]
pub fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Deserialize a JSON string to a value
#[inline]
pub fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| anyhow!("JSON parse error: {}", e))
}

/// Deserialize an optional JSON string, treating empty/`null` as absent
#[inline]
pub fn from_json_opt<T: DeserializeOwned>(s: Option<&str>) -> Result<Option<T>> {
    match s {
        Some(s) if !s.is_empty() && s != "null" => Ok(Some(from_json(s)?)),
        _ => Ok(None),
    }
}

/// Deserialize a JSON string defaulting on absence or parse failure
#[inline]
pub fn from_json_or_default<T: DeserializeOwned + Default>(s: Option<&str>) -> T {
    s.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_round_trip() {
        let id = Uuid::new_v4();
        assert_eq!(str_to_uuid(&uuid_to_str(id)).unwrap(), id);
        assert!(str_to_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_json_opt_treats_null_as_absent() {
        let parsed: Option<Vec<String>> = from_json_opt(Some("null")).unwrap();
        assert_eq!(parsed, None);
        let parsed: Option<Vec<String>> = from_json_opt(Some(r#"["a"]"#)).unwrap();
        assert_eq!(parsed, Some(vec!["a".to_string()]));
    }
}
