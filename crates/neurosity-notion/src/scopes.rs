//! # OAuth Scope Matrix
//!
//! Static tables mapping every metric, action and device-management function
//! to the OAuth scope a third-party token needs to use it.
//!
//! | Table | Key form | Example |
//! |-------|----------|---------|
//! | metrics | `metric` or `metric/label` | `awareness/calm` → `read:calm` |
//! | actions | `command/action` | `haptics/queue` → `write:haptics` |
//! | functions | function name | `getInfo` → `read:devices-info` |
//!
//! Composite metrics (`awareness`) are keyed per label because each label
//! is licensed separately; an atomic subscription to several labels needs
//! all of them.
//!
//! ## Unknown keys
//!
//! A key outside these tables is governed by [`UnknownScopePolicy`]. The
//! default, [`UnknownScopePolicy::Unrestricted`], treats it as needing no
//! scope at all. That keeps new metrics usable before the table catches up,
//! but it also means a typo'd or newly-added metric is readable by any OAuth
//! token. Deployments that prefer to fail closed should select
//! [`UnknownScopePolicy::Deny`].

use serde::{Deserialize, Serialize};

/// What to do with a key that has no entry in the scope tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownScopePolicy {
    /// Unknown keys require no scope.
    #[default]
    Unrestricted,
    /// Unknown keys can never be satisfied by an OAuth session.
    Deny,
}

/// Result of looking a key up in the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeLookup {
    /// The key maps to this scope.
    Required(&'static str),
    /// No scope needed (unknown key under the permissive policy).
    Unrestricted,
    /// Unknown key under [`UnknownScopePolicy::Deny`]; carries the key.
    Unmapped(String),
}

/// The static scope tables plus the policy for keys outside them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeMatrix {
    policy: UnknownScopePolicy,
}

impl ScopeMatrix {
    /// Create a matrix with the given unknown-key policy.
    pub fn new(policy: UnknownScopePolicy) -> Self {
        Self { policy }
    }

    /// The unknown-key policy in effect.
    pub fn policy(&self) -> UnknownScopePolicy {
        self.policy
    }

    /// Look up a metric key (`metric` or `metric/label`).
    pub fn metric(&self, key: &str) -> ScopeLookup {
        self.resolve(metric_scope(key), key)
    }

    /// Look up an action key (`command/action`).
    pub fn action(&self, key: &str) -> ScopeLookup {
        self.resolve(action_scope(key), key)
    }

    /// Look up a device-management function by name.
    pub fn function(&self, name: &str) -> ScopeLookup {
        self.resolve(function_scope(name), name)
    }

    fn resolve(&self, scope: Option<&'static str>, key: &str) -> ScopeLookup {
        match (scope, self.policy) {
            (Some(scope), _) => ScopeLookup::Required(scope),
            (None, UnknownScopePolicy::Unrestricted) => ScopeLookup::Unrestricted,
            (None, UnknownScopePolicy::Deny) => ScopeLookup::Unmapped(key.to_string()),
        }
    }
}

/// Scope required to read a metric, keyed by `metric` or `metric/label`.
pub fn metric_scope(key: &str) -> Option<&'static str> {
    match key {
        "accelerometer" => Some("read:accelerometer"),
        "brainwaves" => Some("read:brainwaves"),
        "awareness/calm" => Some("read:calm"),
        "awareness/focus" => Some("read:focus"),
        "kinesis" | "predictions" => Some("read:kinesis"),
        "signalQuality" => Some("read:signal-quality"),
        _ => None,
    }
}

/// Scope required to dispatch an action, keyed by `command/action`.
pub fn action_scope(key: &str) -> Option<&'static str> {
    match key {
        "marker/add" => Some("write:brainwave-markers"),
        "brainwaves/record" => Some("write:brainwaves"),
        "haptics/queue" => Some("write:haptics"),
        "training/record" | "training/stop" | "training/stopAll" => Some("write:kinesis"),
        "wifi/reset" => Some("write:wifi-settings"),
        _ => None,
    }
}

/// Scope required to call a device-management function.
pub fn function_scope(name: &str) -> Option<&'static str> {
    match name {
        "getInfo" | "getSelectedDevice" | "selectDevice" | "onDeviceChange"
        | "onUserDevicesChange" => Some("read:devices-info"),
        "settings" => Some("read:devices-settings"),
        "changeSettings" => Some("write:devices-settings"),
        "status" => Some("read:devices-status"),
        _ => None,
    }
}
