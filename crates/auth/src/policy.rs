use serde::Serialize;
use thiserror::Error;
use tollgate_core::AdmissionError;

use crate::{EffectivePermissionSet, Permission, Role};

/// Route-level access rule: one required permission, plus roles that bypass
/// the check entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    required: Permission,
    superusers: Vec<Role>,
}

/// Why access was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    Permission,
    Superuser,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("forbidden: missing permission '{required}'")]
pub struct PolicyDenied {
    pub required: Permission,
}

impl From<PolicyDenied> for AdmissionError {
    fn from(denied: PolicyDenied) -> Self {
        AdmissionError::PermissionDenied {
            required: vec![denied.required.as_str().to_string()],
        }
    }
}

impl AccessPolicy {
    pub fn new(required: Permission) -> Self {
        Self {
            required,
            superusers: Vec::new(),
        }
    }

    pub fn with_superusers(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.superusers.extend(roles.into_iter().filter(|role| !role.is_empty()));
        self
    }

    pub fn required(&self) -> &Permission {
        &self.required
    }

    pub fn superusers(&self) -> &[Role] {
        &self.superusers
    }

    /// Allow iff the set holds a superuser role or the required permission.
    ///
    /// - No IO
    /// - No panics
    pub fn decide(&self, effective: &EffectivePermissionSet) -> Result<Grant, PolicyDenied> {
        if self.superusers.iter().any(|role| effective.contains_str(role.as_str())) {
            return Ok(Grant::Superuser);
        }
        if effective.contains(&self.required) {
            return Ok(Grant::Permission);
        }
        Err(PolicyDenied {
            required: self.required.clone(),
        })
    }

    /// Structured account of a decision, for debug logs.
    pub fn explain(&self, effective: &EffectivePermissionSet) -> PolicyExplanation {
        let outcome = self.decide(effective);
        PolicyExplanation {
            required_permission: self.required.as_str().to_string(),
            granted: outcome.is_ok(),
            grant: outcome.ok(),
            effective_permissions: effective.to_names(),
            matched_superusers: self
                .superusers
                .iter()
                .filter(|role| effective.contains_str(role.as_str()))
                .map(|role| role.as_str().to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyExplanation {
    pub required_permission: String,
    pub granted: bool,
    pub grant: Option<Grant>,
    pub effective_permissions: Vec<String>,
    pub matched_superusers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AccessPolicy {
        AccessPolicy::new(Permission::new("historial.read"))
            .with_superusers([Role::new("GerenteCuenta"), Role::new(" ")])
    }

    #[test]
    fn exact_permission_is_granted() {
        let effective: EffectivePermissionSet = ["historial.read"].into_iter().collect();
        assert_eq!(policy().decide(&effective), Ok(Grant::Permission));
    }

    #[test]
    fn superuser_role_bypasses_the_permission() {
        let effective: EffectivePermissionSet = ["gerentecuenta"].into_iter().collect();
        assert_eq!(policy().decide(&effective), Ok(Grant::Superuser));
        assert_eq!(policy().superusers().len(), 1);
    }

    #[test]
    fn anything_else_is_denied_with_the_required_permission() {
        let effective: EffectivePermissionSet = ["historial.write", "viewer"].into_iter().collect();
        let denied = policy().decide(&effective).unwrap_err();
        assert_eq!(denied.required, Permission::new("historial.read"));

        let admission: AdmissionError = denied.into();
        assert_eq!(
            admission,
            AdmissionError::PermissionDenied {
                required: vec!["historial.read".to_string()]
            }
        );
        assert_eq!(admission.status_code(), 403);
    }

    #[test]
    fn read_permission_or_admin_role() {
        let policy = AccessPolicy::new(Permission::new("read")).with_superusers([Role::new("admin")]);

        let reader: EffectivePermissionSet = ["read"].into_iter().collect();
        assert_eq!(policy.decide(&reader), Ok(Grant::Permission));

        let admin: EffectivePermissionSet = ["admin"].into_iter().collect();
        assert_eq!(policy.decide(&admin), Ok(Grant::Superuser));

        let nobody = EffectivePermissionSet::new();
        let admission: AdmissionError = policy.decide(&nobody).unwrap_err().into();
        assert_eq!(
            admission,
            AdmissionError::PermissionDenied {
                required: vec!["read".to_string()]
            }
        );
    }

    #[test]
    fn no_superusers_by_default() {
        let plain = AccessPolicy::new(Permission::new("historial.read"));
        let effective: EffectivePermissionSet = ["admin", "*"].into_iter().collect();
        assert!(plain.decide(&effective).is_err());
    }

    #[test]
    fn explanation_lists_what_matched() {
        let effective: EffectivePermissionSet = ["GerenteCuenta", "viewer"].into_iter().collect();
        let explanation = policy().explain(&effective);
        assert!(explanation.granted);
        assert_eq!(explanation.grant, Some(Grant::Superuser));
        assert_eq!(explanation.matched_superusers, vec!["gerentecuenta"]);
        assert_eq!(explanation.effective_permissions, vec!["gerentecuenta", "viewer"]);
    }
}
