//! Role configuration values and their normalization.
//!
//! Guild role configuration is stored as text. Current records hold a JSON
//! array of role ids; legacy records hold a single bare id. Both shapes
//! decode into [`RoleConfigValue`] and normalize to a [`RoleSet`] at the
//! read boundary so nothing downstream branches on the encoding.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::RoleId;

/// Normalized set of role identifiers.
pub type RoleSet = BTreeSet<RoleId>;

/// Stored shape of a role configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleConfigValue {
    Single(RoleId),
    Multiple(Vec<RoleId>),
}

impl RoleConfigValue {
    /// Decode a raw stored value.
    ///
    /// JSON arrays and JSON strings decode as written; anything else is a
    /// legacy bare scalar and becomes a singleton.
    #[must_use]
    pub fn decode(raw: &str) -> Self {
        serde_json::from_str(raw)
            .unwrap_or_else(|_| RoleConfigValue::Single(RoleId::new(raw.trim())))
    }

    /// Normalize to a set, discarding empty ids.
    #[must_use]
    pub fn into_set(self) -> RoleSet {
        let ids = match self {
            RoleConfigValue::Single(id) => vec![id],
            RoleConfigValue::Multiple(ids) => ids,
        };
        ids.into_iter().filter(|id| !id.as_str().is_empty()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_array() {
        let set = RoleConfigValue::decode(r#"["111", "222"]"#).into_set();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&RoleId::from("111")));
        assert!(set.contains(&RoleId::from("222")));
    }

    #[test]
    fn decodes_json_string() {
        let set = RoleConfigValue::decode(r#""333""#).into_set();
        assert_eq!(set, RoleSet::from([RoleId::from("333")]));
    }

    #[test]
    fn legacy_scalar_becomes_singleton() {
        let set = RoleConfigValue::decode("444").into_set();
        assert_eq!(set, RoleSet::from([RoleId::from("444")]));
    }

    #[test]
    fn legacy_scalar_equals_migrated_singleton() {
        let legacy = RoleConfigValue::decode("555").into_set();
        let migrated = RoleConfigValue::decode(r#"["555"]"#).into_set();
        assert_eq!(legacy, migrated);
    }

    #[test]
    fn empty_entries_are_dropped() {
        assert!(RoleConfigValue::decode(r#"[""]"#).into_set().is_empty());
        assert!(RoleConfigValue::decode("   ").into_set().is_empty());
    }
}
