//! Role set to metadata encoding.
//!
//! [`encode`] is pure and deterministic: the same role set and catalog always
//! produce the same payload. Every field the catalog declares is present in
//! the payload, explicitly zeroed when no tracked role contributes to it.

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

use crate::catalog::{Encoding, RoleCatalog};
use crate::types::RoleSet;

/// Attempt to write a key the catalog does not declare.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown metadata field: {0}")]
pub struct UnknownField(pub String);

/// Metadata values keyed by catalog field, in schema order.
///
/// Only constructible from a catalog, so every key is a declared one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPayload {
    fields: Vec<(String, u64)>,
}

impl MetadataPayload {
    /// Every catalog field present and set to `0`.
    pub fn zeroed(catalog: &RoleCatalog) -> Self {
        Self {
            fields: catalog.field_keys().map(|k| (k.to_string(), 0)).collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    pub fn set(&mut self, key: &str, value: u64) -> Result<(), UnknownField> {
        *self.slot(key)? = value;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when every field is `0`.
    pub fn is_zeroed(&self) -> bool {
        self.fields.iter().all(|(_, v)| *v == 0)
    }

    fn slot(&mut self, key: &str) -> Result<&mut u64, UnknownField> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| UnknownField(key.to_string()))
    }
}

impl Serialize for MetadataPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Output of [`encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub payload: MetadataPayload,
    /// Whether the user is eligible for the badge at all
    pub granted: bool,
}

/// Map a role set onto the catalog's metadata fields.
///
/// Boolean entries write `1` or `0` to their own field. Bit flag entries OR
/// their flag into the shared field. `granted` is true when any boolean field
/// is `1` or any bitfield is nonzero.
pub fn encode(roles: &RoleSet, catalog: &RoleCatalog) -> Encoded {
    let mut payload = MetadataPayload::zeroed(catalog);
    let mut granted = false;

    for entry in catalog.entries() {
        if !roles.contains(&entry.role_id) {
            continue;
        }

        // Every entry key is a schema key once the catalog is built.
        let slot = payload.slot(&entry.key);
        debug_assert!(slot.is_ok(), "entry key {:?} missing from schema", entry.key);
        let Ok(slot) = slot else {
            continue;
        };

        match entry.encoding {
            Encoding::Boolean => {
                *slot = 1;
                granted = true;
            }
            Encoding::BitFlag(flag) => *slot |= flag,
        }
    }

    let bitfield_set = catalog
        .metadata_schema()
        .iter()
        .filter(|field| !field.metadata_type.is_boolean())
        .any(|field| payload.get(&field.key).unwrap_or(0) != 0);

    Encoded {
        payload,
        granted: granted || bitfield_set,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RoleEntry;

    fn bitfield_catalog() -> RoleCatalog {
        RoleCatalog::new(vec![
            RoleEntry::bit_flag(1, "Owner", "role_flags", 1),
            RoleEntry::bit_flag(16, "Admin", "role_flags", 16),
        ])
        .unwrap()
    }

    fn boolean_catalog() -> RoleCatalog {
        RoleCatalog::new(vec![
            RoleEntry::boolean("owner", "Owner", "has_owner"),
            RoleEntry::boolean("admin", "Admin", "has_admin"),
        ])
        .unwrap()
    }

    fn roles<const N: usize>(ids: [u64; N]) -> RoleSet {
        ids.into_iter().collect()
    }

    #[test]
    fn test_bitfield_single_roles() {
        let catalog = bitfield_catalog();

        let owner = encode(&roles([1]), &catalog);
        assert_eq!(owner.payload.get("role_flags"), Some(1));
        assert!(owner.granted);

        let admin = encode(&roles([16]), &catalog);
        assert_eq!(admin.payload.get("role_flags"), Some(16));
        assert!(admin.granted);
    }

    #[test]
    fn test_bitfield_combines_flags() {
        let encoded = encode(&roles([1, 16]), &bitfield_catalog());
        assert_eq!(encoded.payload.get("role_flags"), Some(17));
        assert_eq!(encoded.payload.len(), 1);
        assert!(encoded.granted);
    }

    #[test]
    fn test_bitfield_empty_role_set() {
        let encoded = encode(&RoleSet::empty(), &bitfield_catalog());
        assert_eq!(encoded.payload.get("role_flags"), Some(0));
        assert!(!encoded.granted);
    }

    #[test]
    fn test_untracked_roles_ignored() {
        let encoded = encode(&roles([2, 4, 999]), &bitfield_catalog());
        assert_eq!(encoded.payload.get("role_flags"), Some(0));
        assert!(!encoded.granted);
    }

    #[test]
    fn test_boolean_partial_grant() {
        let held: RoleSet = ["owner"].into_iter().collect();
        let encoded = encode(&held, &boolean_catalog());

        assert_eq!(encoded.payload.get("has_owner"), Some(1));
        assert_eq!(encoded.payload.get("has_admin"), Some(0));
        assert!(encoded.granted);
        assert_eq!(
            serde_json::to_value(&encoded.payload).unwrap(),
            serde_json::json!({"has_owner": 1, "has_admin": 0})
        );
    }

    #[test]
    fn test_empty_role_set_zeroes_every_field() {
        let catalog = boolean_catalog();
        let encoded = encode(&RoleSet::empty(), &catalog);

        assert!(!encoded.granted);
        assert!(encoded.payload.is_zeroed());
        for key in catalog.field_keys() {
            assert_eq!(encoded.payload.get(key), Some(0), "{key} missing");
        }
        assert_eq!(
            serde_json::to_string(&encoded.payload).unwrap(),
            r#"{"has_owner":0,"has_admin":0}"#
        );
    }

    #[test]
    fn test_boolean_granted_iff_any_field_set() {
        let catalog = boolean_catalog();
        let subsets: [&[&str]; 4] = [&[], &["owner"], &["admin"], &["owner", "admin"]];

        for subset in subsets {
            let held: RoleSet = subset.iter().copied().collect();
            let encoded = encode(&held, &catalog);
            let any_set = encoded.payload.iter().any(|(_, v)| v == 1);
            assert_eq!(encoded.granted, any_set, "{subset:?}");
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let catalog = bitfield_catalog();
        let held = roles([16, 1]);
        assert_eq!(encode(&held, &catalog), encode(&held, &catalog));
    }

    #[test]
    fn test_mixed_catalog() {
        let catalog = RoleCatalog::new(vec![
            RoleEntry::boolean(100, "Verified", "is_verified"),
            RoleEntry::bit_flag(1, "Owner", "role_flags", 1),
            RoleEntry::bit_flag(16, "Admin", "role_flags", 16),
        ])
        .unwrap();

        let only_flags = encode(&roles([16]), &catalog);
        assert_eq!(only_flags.payload.get("is_verified"), Some(0));
        assert_eq!(only_flags.payload.get("role_flags"), Some(16));
        assert!(only_flags.granted);

        let only_boolean = encode(&roles([100]), &catalog);
        assert_eq!(only_boolean.payload.get("is_verified"), Some(1));
        assert_eq!(only_boolean.payload.get("role_flags"), Some(0));
        assert!(only_boolean.granted);

        assert!(!encode(&RoleSet::empty(), &catalog).granted);
    }

    #[test]
    fn test_payload_rejects_unknown_keys() {
        let mut payload = MetadataPayload::zeroed(&boolean_catalog());
        assert!(payload.set("has_owner", 1).is_ok());
        assert_eq!(
            payload.set("has_ownr", 1),
            Err(UnknownField("has_ownr".to_string()))
        );
    }
}
