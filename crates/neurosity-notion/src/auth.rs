//! # Authorization
//!
//! Scope checks that run in front of every metric read, action write and
//! device-management call.
//!
//! A session's [`Claims`] are derived once from the optional [`OAuthClaims`]
//! supplied at construction. Sessions that did not authenticate through
//! OAuth (a paired device used directly) skip scope checks entirely.
//!
//! ```
//! use neurosity_notion::auth::{AuthRequest, Authorizer, Claims};
//!
//! let claims = Claims::oauth(["read:focus"]);
//! let authorizer = Authorizer::default();
//!
//! let labels = ["focus".to_string(), "calm".to_string()];
//! let err = authorizer
//!     .authorize(&claims, &AuthRequest::metric("awareness", &labels, true))
//!     .unwrap_err();
//! assert_eq!(err.missing_scopes(), ["read:calm"]);
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{NotionError, NotionResult};
use crate::scopes::{ScopeLookup, ScopeMatrix};

/// Claims as carried by a third-party OAuth token.
///
/// `scopes` is a comma-separated list, e.g. `"read:kinesis,read:calm"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClaims {
    /// Whether the session authenticated through OAuth.
    #[serde(default)]
    pub oauth: bool,

    /// Identifier of the OAuth grant.
    #[serde(rename = "authId", alias = "auth_id", default)]
    pub auth_id: Option<String>,

    /// Comma-separated granted scopes.
    #[serde(default)]
    pub scopes: Option<String>,
}

/// The immutable authorization state of one client session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    authenticated: bool,
    auth_id: Option<String>,
    scopes: BTreeSet<String>,
}

impl Claims {
    /// Claims for a session that did not authenticate through OAuth.
    pub fn unauthenticated() -> Self {
        Self::default()
    }

    /// Claims for an OAuth session holding exactly `scopes`.
    pub fn oauth<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            authenticated: true,
            auth_id: None,
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Derive claims from the optional OAuth input. `None` or `oauth: false`
    /// yields unauthenticated claims.
    pub fn from_oauth(claims: Option<&OAuthClaims>) -> Self {
        match claims {
            Some(c) if c.oauth => Self {
                authenticated: true,
                auth_id: c.auth_id.clone(),
                scopes: parse_scopes(c.scopes.as_deref().unwrap_or_default()),
            },
            _ => Self::unauthenticated(),
        }
    }

    /// Whether scope checks apply to this session.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The OAuth grant id, if any.
    pub fn auth_id(&self) -> Option<&str> {
        self.auth_id.as_deref()
    }

    /// Granted scopes.
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    /// Whether `scope` was granted.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// Split a comma-separated scope string, trimming blanks.
fn parse_scopes(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// An operation to be checked against the scope matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRequest<'a> {
    /// Read a metric. Atomic requests need the scope of every label.
    Metric {
        metric: &'a str,
        labels: &'a [String],
        atomic: bool,
    },
    /// Dispatch an action.
    Action { command: &'a str, action: &'a str },
    /// Call a device-management function.
    Function(&'a str),
}

impl<'a> AuthRequest<'a> {
    /// Shorthand for [`AuthRequest::Metric`].
    pub fn metric(metric: &'a str, labels: &'a [String], atomic: bool) -> Self {
        AuthRequest::Metric {
            metric,
            labels,
            atomic,
        }
    }

    /// Shorthand for [`AuthRequest::Action`].
    pub fn action(command: &'a str, action: &'a str) -> Self {
        AuthRequest::Action { command, action }
    }
}

/// Outcome of a scope check: `(denied, missing)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    pub denied: bool,
    /// Missing scopes in evaluation order, without duplicates.
    pub missing: Vec<String>,
}

impl Decision {
    fn allow() -> Self {
        Self::default()
    }

    /// Convert into a `Result`, producing [`NotionError::ScopeDenied`] on denial.
    pub fn into_result(self) -> NotionResult<()> {
        if self.denied {
            Err(NotionError::ScopeDenied {
                missing: self.missing,
            })
        } else {
            Ok(())
        }
    }
}

/// Decides whether a session may perform an operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authorizer {
    matrix: ScopeMatrix,
}

impl Authorizer {
    /// Create an authorizer over the given matrix.
    pub fn new(matrix: ScopeMatrix) -> Self {
        Self { matrix }
    }

    /// The matrix this authorizer consults.
    pub fn matrix(&self) -> &ScopeMatrix {
        &self.matrix
    }

    /// Scope lookups an operation needs, in evaluation order.
    ///
    /// Atomic metric labels are evaluated in canonical (sorted, deduplicated)
    /// order, not the order the caller listed them. A denial for
    /// `["focus", "calm"]` therefore names `read:calm` before `read:focus`,
    /// the same as for `["calm", "focus"]`.
    pub fn requirements(&self, request: &AuthRequest<'_>) -> Vec<ScopeLookup> {
        match *request {
            AuthRequest::Metric {
                metric,
                labels,
                atomic: true,
            } => labels
                .iter()
                .map(String::as_str)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .map(|label| self.matrix.metric(&format!("{metric}/{label}")))
                .collect(),
            AuthRequest::Metric { metric, .. } => vec![self.matrix.metric(metric)],
            AuthRequest::Action { command, action } => {
                vec![self.matrix.action(&format!("{command}/{action}"))]
            }
            AuthRequest::Function(name) => vec![self.matrix.function(name)],
        }
    }

    /// Evaluate a request without converting to an error.
    pub fn check(&self, claims: &Claims, request: &AuthRequest<'_>) -> Decision {
        if !claims.is_authenticated() {
            return Decision::allow();
        }

        let mut missing: Vec<String> = Vec::new();
        for lookup in self.requirements(request) {
            let scope = match lookup {
                ScopeLookup::Unrestricted => continue,
                ScopeLookup::Required(scope) if claims.has_scope(scope) => continue,
                ScopeLookup::Required(scope) => scope.to_string(),
                ScopeLookup::Unmapped(key) => format!("unmapped:{key}"),
            };
            if !missing.contains(&scope) {
                missing.push(scope);
            }
        }

        let decision = Decision {
            denied: !missing.is_empty(),
            missing,
        };
        tracing::debug!(
            ?request,
            denied = decision.denied,
            missing = ?decision.missing,
            "Scope check"
        );
        decision
    }

    /// Allow or deny a request.
    ///
    /// # Errors
    /// Returns [`NotionError::ScopeDenied`] naming every missing scope.
    pub fn authorize(&self, claims: &Claims, request: &AuthRequest<'_>) -> NotionResult<()> {
        self.check(claims, request).into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scopes::UnknownScopePolicy;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unauthenticated_bypasses_every_check() {
        let claims = Claims::from_oauth(Some(&OAuthClaims {
            oauth: false,
            auth_id: Some("ignored".into()),
            scopes: Some(String::new()),
        }));
        let authorizer = Authorizer::new(ScopeMatrix::new(UnknownScopePolicy::Deny));
        let l = labels(&["focus", "calm"]);

        assert!(!claims.is_authenticated());
        assert!(authorizer
            .authorize(&claims, &AuthRequest::metric("awareness", &l, true))
            .is_ok());
        assert!(authorizer
            .authorize(&claims, &AuthRequest::action("wifi", "reset"))
            .is_ok());
        assert!(authorizer
            .authorize(&claims, &AuthRequest::Function("changeSettings"))
            .is_ok());
        assert!(authorizer
            .authorize(&claims, &AuthRequest::Function("neverHeardOfIt"))
            .is_ok());
        assert!(Claims::from_oauth(None) == Claims::unauthenticated());
    }

    #[test]
    fn test_atomic_metric_requires_every_label() {
        let claims = Claims::oauth(["read:focus"]);
        let l = labels(&["focus", "calm"]);
        let decision =
            Authorizer::default().check(&claims, &AuthRequest::metric("awareness", &l, true));

        assert!(decision.denied);
        assert_eq!(decision.missing, vec!["read:calm"]);

        let full = Claims::oauth(["read:focus", "read:calm"]);
        assert!(Authorizer::default()
            .authorize(&full, &AuthRequest::metric("awareness", &l, true))
            .is_ok());
    }

    #[test]
    fn test_atomic_denial_lists_missing_in_sorted_label_order() {
        let claims = Claims::oauth(["read:kinesis"]);
        let l = labels(&["focus", "calm", "focus"]);
        let err = Authorizer::default()
            .authorize(&claims, &AuthRequest::metric("awareness", &l, true))
            .unwrap_err();

        assert_eq!(err.missing_scopes(), ["read:calm", "read:focus"]);
        assert!(err.to_string().ends_with("read:calm, read:focus."));

        let sorted = labels(&["calm", "focus"]);
        let same = Authorizer::default()
            .authorize(&claims, &AuthRequest::metric("awareness", &sorted, true))
            .unwrap_err();
        assert_eq!(same.to_string(), err.to_string());
    }

    #[test]
    fn test_non_atomic_metric_uses_unlabeled_key() {
        let claims = Claims::oauth(["read:kinesis"]);
        let l = labels(&["push", "pull"]);
        let authorizer = Authorizer::default();

        assert!(authorizer
            .authorize(&claims, &AuthRequest::metric("kinesis", &l, false))
            .is_ok());
        assert!(authorizer
            .authorize(&claims, &AuthRequest::metric("predictions", &l, false))
            .is_ok());

        let err = authorizer
            .authorize(&claims, &AuthRequest::metric("brainwaves", &labels(&["raw"]), false))
            .unwrap_err();
        assert_eq!(err.missing_scopes(), ["read:brainwaves"]);
    }

    #[test]
    fn test_action_and_function_need_one_scope() {
        let claims = Claims::oauth(["write:haptics", "read:devices-info"]);
        let authorizer = Authorizer::default();

        assert!(authorizer
            .authorize(&claims, &AuthRequest::action("haptics", "queue"))
            .is_ok());
        let err = authorizer
            .authorize(&claims, &AuthRequest::action("training", "record"))
            .unwrap_err();
        assert_eq!(err.missing_scopes(), ["write:kinesis"]);

        assert!(authorizer
            .authorize(&claims, &AuthRequest::Function("getInfo"))
            .is_ok());
        let err = authorizer
            .authorize(&claims, &AuthRequest::Function("status"))
            .unwrap_err();
        assert_eq!(err.missing_scopes(), ["read:devices-status"]);
    }

    #[test]
    fn test_unknown_keys_follow_policy() {
        let claims = Claims::oauth(Vec::<String>::new());
        let l = labels(&[]);

        let open = Authorizer::default();
        assert!(open
            .authorize(&claims, &AuthRequest::metric("heartRate", &l, false))
            .is_ok());

        let closed = Authorizer::new(ScopeMatrix::new(UnknownScopePolicy::Deny));
        let err = closed
            .authorize(&claims, &AuthRequest::metric("heartRate", &l, false))
            .unwrap_err();
        assert_eq!(err.missing_scopes(), ["unmapped:heartRate"]);
    }

    #[test]
    fn test_atomic_without_labels_requires_nothing() {
        let claims = Claims::oauth(Vec::<String>::new());
        assert!(Authorizer::default()
            .authorize(&claims, &AuthRequest::metric("awareness", &[], true))
            .is_ok());
    }

    #[test]
    fn test_from_oauth_parses_comma_separated_scopes() {
        let claims = Claims::from_oauth(Some(&OAuthClaims {
            oauth: true,
            auth_id: Some("grant-1".into()),
            scopes: Some("read:kinesis, read:calm,,read:focus ".into()),
        }));

        assert!(claims.is_authenticated());
        assert_eq!(claims.auth_id(), Some("grant-1"));
        assert_eq!(claims.scopes().len(), 3);
        assert!(claims.has_scope("read:calm"));
        assert!(claims.has_scope("read:focus"));
    }

    #[test]
    fn test_oauth_claims_deserialize_both_key_styles() {
        let camel: OAuthClaims =
            serde_json::from_str(r#"{"oauth": true, "authId": "a", "scopes": "read:calm"}"#)
                .unwrap();
        let snake: OAuthClaims =
            serde_json::from_str(r#"{"oauth": true, "auth_id": "a", "scopes": "read:calm"}"#)
                .unwrap();
        assert_eq!(camel, snake);
    }
}
