//! Claim extraction rules.
//!
//! Identity providers spread roles and permissions over differently shaped
//! claims. Each [`ClaimRule`] reads one shape and yields a partial set; the
//! partial sets are unioned in rule order. New shapes are added by pushing a
//! rule, never by touching the verifier.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::{EffectivePermissionSet, Permission, Role};

/// Where in the claim map a rule looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimSource {
    /// Top-level claim holding a single value: `"role": "admin"`.
    Field(String),
    /// Top-level claim holding a list: `"permissions": ["read"]`.
    List(String),
    /// List nested one object deep: `"realm_access": {"roles": [..]}`.
    Nested { object: String, field: String },
    /// List inside every entry of a per-resource object:
    /// `"resource_access": {"<client>": {"roles": [..]}}`.
    PerResource { object: String, field: String },
}

/// What the extracted values grant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GrantKind {
    Role,
    Permission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRule {
    pub source: ClaimSource,
    pub kind: GrantKind,
}

impl ClaimRule {
    pub fn role(source: ClaimSource) -> Self {
        Self {
            source,
            kind: GrantKind::Role,
        }
    }

    pub fn permission(source: ClaimSource) -> Self {
        Self {
            source,
            kind: GrantKind::Permission,
        }
    }

    /// Raw string values this rule finds in `claims`. Missing or oddly typed
    /// claims yield nothing rather than an error.
    pub fn collect(&self, claims: &Map<String, Value>) -> Vec<String> {
        let mut out = Vec::new();
        match &self.source {
            ClaimSource::Field(name) => {
                if let Some(value) = claims.get(name) {
                    push_scalar_or_list(value, &mut out);
                }
            }
            ClaimSource::List(name) => {
                if let Some(Value::Array(items)) = claims.get(name) {
                    items.iter().for_each(|item| push_scalar(item, &mut out));
                }
            }
            ClaimSource::Nested { object, field } => {
                if let Some(Value::Array(items)) = claims.get(object).and_then(|o| o.get(field)) {
                    items.iter().for_each(|item| push_scalar(item, &mut out));
                }
            }
            ClaimSource::PerResource { object, field } => {
                if let Some(Value::Object(resources)) = claims.get(object) {
                    for resource in resources.values() {
                        if let Some(Value::Array(items)) = resource.get(field) {
                            items.iter().for_each(|item| push_scalar(item, &mut out));
                        }
                    }
                }
            }
        }
        out
    }
}

fn push_scalar(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        _ => {}
    }
}

fn push_scalar_or_list(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| push_scalar(item, out)),
        other => push_scalar(other, out),
    }
}

/// Roles and permissions pulled out of one token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grants {
    pub roles: BTreeSet<Role>,
    pub permissions: BTreeSet<Permission>,
}

impl Grants {
    /// Union of roles and permissions.
    pub fn effective(&self) -> EffectivePermissionSet {
        self.roles
            .iter()
            .map(Role::as_str)
            .chain(self.permissions.iter().map(Permission::as_str))
            .collect()
    }
}

/// Ordered list of extraction rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRules(Vec<ClaimRule>);

impl ClaimRules {
    pub fn new(rules: Vec<ClaimRule>) -> Self {
        Self(rules)
    }

    pub fn with_rule(mut self, rule: ClaimRule) -> Self {
        self.0.push(rule);
        self
    }

    pub fn extract(&self, claims: &Map<String, Value>) -> Grants {
        let mut grants = Grants::default();
        for rule in &self.0 {
            for raw in rule.collect(claims) {
                match rule.kind {
                    GrantKind::Role => {
                        let role = Role::new(&raw);
                        if !role.is_empty() {
                            grants.roles.insert(role);
                        }
                    }
                    GrantKind::Permission => {
                        let permission = Permission::new(&raw);
                        if !permission.is_empty() {
                            grants.permissions.insert(permission);
                        }
                    }
                }
            }
        }
        grants
    }
}

impl Default for ClaimRules {
    /// Keycloak realm and client roles, a `role` shortcut, a `roles` list and
    /// an explicit `permissions` list.
    fn default() -> Self {
        Self(vec![
            ClaimRule::role(ClaimSource::Nested {
                object: "realm_access".into(),
                field: "roles".into(),
            }),
            ClaimRule::role(ClaimSource::PerResource {
                object: "resource_access".into(),
                field: "roles".into(),
            }),
            ClaimRule::role(ClaimSource::Field("role".into())),
            ClaimRule::role(ClaimSource::List("roles".into())),
            ClaimRule::permission(ClaimSource::List("permissions".into())),
        ])
    }
}
