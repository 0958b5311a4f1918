use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "historial.read") normalized on
/// construction: surrounding whitespace is trimmed and the name is
/// lower-cased, so `" Historial.Read"` and `"historial.read"` are the same
/// permission.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(String);

impl Permission {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(normalize(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Every permission and role a token carries, merged into one set.
///
/// Roles and permissions share a namespace here: a role name counts as a
/// permission of the same name. Entries are normalized like [`Permission`]
/// and empty names are dropped. Iteration order is sorted, so logs and
/// comparisons are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EffectivePermissionSet(BTreeSet<Permission>);

impl EffectivePermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw claim value. Returns `false` if it normalized to nothing
    /// or was already present.
    pub fn insert(&mut self, raw: impl AsRef<str>) -> bool {
        let permission = Permission::new(raw);
        if permission.is_empty() {
            return false;
        }
        self.0.insert(permission)
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.0.contains(permission)
    }

    pub fn contains_str(&self, raw: &str) -> bool {
        self.0.contains(&Permission::new(raw))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted plain strings, for log fields.
    pub fn to_names(&self) -> Vec<String> {
        self.0.iter().map(|p| p.as_str().to_string()).collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for EffectivePermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_is_trimmed_and_lower_cased() {
        assert_eq!(Permission::new("  Historial.READ ").as_str(), "historial.read");
        assert_eq!(Permission::new("read"), Permission::new("READ"));
    }

    #[test]
    fn set_drops_blank_entries_and_duplicates() {
        let set: EffectivePermissionSet = ["Read", "read ", "  ", "", "write"].into_iter().collect();
        assert_eq!(set.to_names(), vec!["read".to_string(), "write".to_string()]);
    }
}
