#![forbid(unsafe_code)]

//! Declarative permission flags on column metadata.
//!
//! Column catalogs describe `shown` as a boolean, a permission name
//! (optionally negated with a leading `!`), or an array whose members must all
//! hold. [`PermissionFlag`] is the tagged form of that union; evaluation goes
//! through a [`PermissionOracle`].

use std::collections::HashSet;

use serde::Deserialize;

/// Source of truth for permission checks.
pub trait PermissionOracle {
    /// Whether the current user holds `name`.
    fn has_permission(&self, name: &str) -> bool;

    /// Whether `name` is an internal (staff-only) permission.
    fn is_permission_internal(&self, name: &str) -> bool;
}

/// Oracle granting every permission, none of them internal.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionOracle for AllowAll {
    fn has_permission(&self, _name: &str) -> bool {
        true
    }

    fn is_permission_internal(&self, _name: &str) -> bool {
        false
    }
}

/// Oracle backed by fixed permission sets.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    granted: HashSet<String>,
    internal: HashSet<String>,
}

impl StaticPermissions {
    /// Create an oracle granting nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a permission.
    #[must_use]
    pub fn grant(mut self, name: impl Into<String>) -> Self {
        self.granted.insert(name.into());
        self
    }

    /// Grant a permission and mark it internal.
    #[must_use]
    pub fn grant_internal(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.internal.insert(name.clone());
        self.granted.insert(name);
        self
    }
}

impl PermissionOracle for StaticPermissions {
    fn has_permission(&self, name: &str) -> bool {
        self.granted.contains(name)
    }

    fn is_permission_internal(&self, name: &str) -> bool {
        self.internal.contains(name)
    }
}

/// A `bool | "perm" | "!perm" | [..]` flag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawFlag")]
pub enum PermissionFlag {
    /// Constant.
    Bool(bool),
    /// Holds when the permission is granted (or not granted, if negated).
    Permission {
        /// Permission name without the `!` prefix.
        name: String,
        /// Whether the flag was written as `!name`.
        negated: bool,
    },
    /// Holds when every member holds.
    All(Vec<PermissionFlag>),
}

impl Default for PermissionFlag {
    fn default() -> Self {
        Self::Bool(true)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFlag {
    Bool(bool),
    Name(String),
    All(Vec<PermissionFlag>),
}

impl From<RawFlag> for PermissionFlag {
    fn from(raw: RawFlag) -> Self {
        match raw {
            RawFlag::Bool(b) => Self::Bool(b),
            RawFlag::Name(name) => Self::parse(&name),
            RawFlag::All(members) => Self::All(members),
        }
    }
}

impl PermissionFlag {
    /// Parse a permission name, honouring a leading `!`.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('!') {
            Some(name) => Self::Permission {
                name: name.to_owned(),
                negated: true,
            },
            None => Self::Permission {
                name: spec.to_owned(),
                negated: false,
            },
        }
    }

    /// Evaluate the flag. An empty `All` holds.
    #[must_use]
    pub fn evaluate(&self, oracle: &dyn PermissionOracle) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Permission { name, negated } => oracle.has_permission(name) != *negated,
            Self::All(members) => members.iter().all(|m| m.evaluate(oracle)),
        }
    }

    /// Whether any permission referenced by the flag is internal.
    #[must_use]
    pub fn is_internal(&self, oracle: &dyn PermissionOracle) -> bool {
        match self {
            Self::Bool(_) => false,
            Self::Permission { name, .. } => oracle.is_permission_internal(name),
            Self::All(members) => members.iter().any(|m| m.is_internal(oracle)),
        }
    }
}
