//! Authorization evaluation
//!
//! Applies an issuer's configured policy to validated claims. An issuer with
//! no policy authorizes every validated token, with the outcome marked as
//! bypassed so downstream consumers can tell the two apart.

use crate::config::{AuthorizationPolicy, RoleMatch};
use crate::validation::TokenClaims;

/// Result of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationOutcome {
    pub authorized: bool,
    /// True when authorization passed because no policy is configured.
    pub bypassed: bool,
    pub reason: Option<String>,
}

impl AuthorizationOutcome {
    fn authorized() -> Self {
        Self {
            authorized: true,
            bypassed: false,
            reason: None,
        }
    }

    fn bypassed() -> Self {
        Self {
            authorized: true,
            bypassed: true,
            reason: None,
        }
    }

    fn denied(reason: String) -> Self {
        Self {
            authorized: false,
            bypassed: false,
            reason: Some(reason),
        }
    }
}

/// Evaluate the policy against the claims. Checks run in a fixed order and
/// the first failing requirement produces the denial reason.
pub fn evaluate(policy: Option<&AuthorizationPolicy>, claims: &TokenClaims) -> AuthorizationOutcome {
    let Some(policy) = policy else {
        return AuthorizationOutcome::bypassed();
    };

    let scopes = claims.scopes();
    for required in &policy.required_scopes {
        if !scopes.contains(required) {
            return AuthorizationOutcome::denied(format!("missing required scope '{required}'"));
        }
    }

    if !policy.required_audiences.is_empty() {
        let audiences = claims.audiences();
        let matched = audiences
            .iter()
            .any(|aud| policy.required_audiences.contains(aud));
        if !matched {
            return AuthorizationOutcome::denied("no required audience present".to_string());
        }
    }

    if !policy.required_roles.is_empty() {
        let roles = claims.roles();
        let satisfied = match policy.role_match {
            RoleMatch::Any => policy.required_roles.iter().any(|r| roles.contains(r)),
            RoleMatch::All => policy.required_roles.iter().all(|r| roles.contains(r)),
        };
        if !satisfied {
            return AuthorizationOutcome::denied(format!(
                "role requirement not met ({:?} of {:?})",
                policy.role_match, policy.required_roles
            ));
        }
    }

    for required in &policy.required_groups {
        if !claims.groups().contains(required) {
            return AuthorizationOutcome::denied(format!("missing required group '{required}'"));
        }
    }

    AuthorizationOutcome::authorized()
}
