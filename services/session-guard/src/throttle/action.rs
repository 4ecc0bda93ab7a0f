// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Action identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Key naming one throttled operation, e.g. `login-form-submit`.
///
/// Built from a logical form/action name and an action-type suffix. A blank
/// name yields an empty identifier, which the engine treats as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Suffix used when the caller does not name an action type.
    pub const DEFAULT_ACTION_TYPE: &'static str = "submit";

    /// Compose `<name>-<action_type>`.
    pub fn new(name: &str, action_type: &str) -> Self {
        let name = name.trim();
        if name.is_empty() {
            return Self(String::new());
        }
        let action_type = match action_type.trim() {
            "" => Self::DEFAULT_ACTION_TYPE,
            t => t,
        };
        Self(format!("{name}-{action_type}"))
    }

    /// Identifier for the default `submit` action of a form.
    pub fn submit(name: &str) -> Self {
        Self::new(name, Self::DEFAULT_ACTION_TYPE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ActionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composition() {
        assert_eq!(ActionId::submit("login-form").as_str(), "login-form-submit");
        assert_eq!(ActionId::new("account", "delete").as_str(), "account-delete");
        assert_eq!(ActionId::new(" profile ", " ").as_str(), "profile-submit");
    }

    #[test]
    fn test_blank_name_is_empty() {
        assert!(ActionId::submit("   ").is_empty());
        assert!(ActionId::new("", "delete").is_empty());
    }
}
