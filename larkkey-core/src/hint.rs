//! Missing-scope hints for failed API calls.
//!
//! [`ScopeHintEnricher::enrich`] turns a permission-denied [`ApiError`] into
//! [`AuthError::ScopeInsufficient`] naming the scopes to add and the login
//! command that adds them. Rate-limit errors and everything that is not a
//! permission error pass through untouched.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::error::{ApiError, AuthError};
use crate::model::{OFFLINE_ACCESS, TokenType};
use crate::registry::AuthRegistry;
use crate::user::scopes::relogin_command;

/// Platform codes for "the token lacks a scope".
const PERMISSION_DENIED_CODES: &[i64] = &[99991672, 99991679];

const RATE_LIMIT_CODE: i64 = 99991400;

const PERMISSION_PHRASES: &[&str] = &[
    "permission denied",
    "no permission",
    "access denied",
    "insufficient scope",
    "missing scope",
    "scope required",
    "required scope",
];

const RATE_LIMIT_PHRASES: &[&str] = &["frequency limit", "rate limit", "too many requests"];

static BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]*)\]").unwrap_or_else(|e| panic!("invalid bracket pattern: {e}"))
});

/// `service:resource[:access]`; each segment starts with a letter so URLs
/// and clock times do not match.
static SCOPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-z][a-z0-9_]*(?::[a-z][A-Za-z0-9_.]*)+")
        .unwrap_or_else(|e| panic!("invalid scope pattern: {e}"))
});

pub fn is_rate_limited(error: &ApiError) -> bool {
    if error.code == Some(RATE_LIMIT_CODE) || error.http_status == Some(429) {
        return true;
    }
    let text = error.text().to_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|p| text.contains(p))
}

pub fn is_permission_denied(error: &ApiError) -> bool {
    if error
        .code
        .is_some_and(|code| PERMISSION_DENIED_CODES.contains(&code))
        || error.http_status == Some(403)
    {
        return true;
    }
    let text = error.text().to_lowercase();
    PERMISSION_PHRASES.iter().any(|p| text.contains(p))
}

/// Scopes named in error text, preferring bracketed lists.
pub fn extract_scopes(text: &str) -> Vec<String> {
    let collect = |haystack: &str, into: &mut BTreeSet<String>| {
        for m in SCOPE.find_iter(haystack) {
            let scope = m.as_str().trim_end_matches('.');
            if scope != OFFLINE_ACCESS {
                into.insert(scope.to_string());
            }
        }
    };

    let mut scopes = BTreeSet::new();
    for caps in BRACKETED.captures_iter(text) {
        if let Some(inner) = caps.get(1) {
            collect(inner.as_str(), &mut scopes);
        }
    }
    if scopes.is_empty() {
        collect(text, &mut scopes);
    }
    scopes.into_iter().collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeHintEnricher {
    registry: AuthRegistry,
}

impl ScopeHintEnricher {
    pub fn new(registry: AuthRegistry) -> Self {
        Self { registry }
    }

    /// Decorate a permission error from `command_path`.
    ///
    /// Scopes come from the error text first, then from the registry. When
    /// neither yields anything, or the command never takes user tokens, the
    /// error is returned as is.
    pub fn enrich(&self, command_path: &str, error: AuthError) -> AuthError {
        let AuthError::Api(api) = &error else {
            return error;
        };
        if is_rate_limited(api) || !is_permission_denied(api) {
            return error;
        }

        let requirement = self
            .registry
            .requirements_for_command(command_path)
            .ok()
            .flatten();
        if requirement
            .as_ref()
            .is_some_and(|r| !r.accepts(TokenType::User))
        {
            return error;
        }

        let mut missing = extract_scopes(&api.text());
        if missing.is_empty() {
            if let Some(requirement) = &requirement {
                missing = requirement.required_user_scopes();
            }
        }
        if missing.is_empty() {
            return error;
        }

        tracing::debug!(
            "Permission error for '{}' points at scopes {:?}",
            command_path,
            missing
        );
        AuthError::ScopeInsufficient {
            context: api.to_string(),
            login_command: relogin_command(&missing),
            missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enricher() -> ScopeHintEnricher {
        ScopeHintEnricher::new(AuthRegistry::builtin())
    }

    #[test]
    fn test_permission_error_falls_back_to_registry() {
        let err = AuthError::Api(ApiError::new(99991679, "Unauthorized. Permission denied"));
        let enriched = enricher().enrich("drive search", err);

        let AuthError::ScopeInsufficient { missing, .. } = &enriched else {
            panic!("expected ScopeInsufficient, got {enriched:?}");
        };
        assert_eq!(missing, &vec!["drive:drive".to_string()]);

        let text = enriched.to_string();
        assert!(text.contains("Missing user OAuth scopes"));
        assert!(text.contains("drive:drive"));
        assert!(text.contains(
            "auth user login --scopes \"offline_access drive:drive\" --force-consent"
        ));
    }

    #[test]
    fn test_scopes_from_error_text_win() {
        let api = ApiError::new(
            99991679,
            "Unauthorized. You do not have permission to perform the requested operation \
             on the resource. Please request user re-authorization and try again. \
             required one of these privileges under the user identity: \
             [docx:document, docx:document:readonly]",
        );
        let enriched = enricher().enrich("drive search", AuthError::Api(api));
        let AuthError::ScopeInsufficient { missing, .. } = enriched else {
            panic!("expected ScopeInsufficient");
        };
        assert_eq!(missing, vec!["docx:document", "docx:document:readonly"]);
    }

    #[test]
    fn test_rate_limit_passes_through() {
        let api = ApiError::new(99991400, "request trigger frequency limit");
        let enriched = enricher().enrich("drive search", AuthError::Api(api.clone()));
        assert!(matches!(enriched, AuthError::Api(ref e) if *e == api));

        let http = ApiError {
            msg: "Too Many Requests".to_string(),
            http_status: Some(429),
            ..Default::default()
        };
        assert!(matches!(
            enricher().enrich("drive search", AuthError::Api(http)),
            AuthError::Api(_)
        ));
    }

    #[test]
    fn test_unrelated_errors_pass_through() {
        let api = ApiError::new(1061002, "params error");
        assert!(matches!(
            enricher().enrich("drive search", AuthError::Api(api)),
            AuthError::Api(_)
        ));

        let other = AuthError::SelectionCanceled;
        assert!(matches!(
            enricher().enrich("drive search", other),
            AuthError::SelectionCanceled
        ));
    }

    #[test]
    fn test_tenant_only_command_is_not_enriched() {
        let api = ApiError::new(99991672, "Access denied. One of the following scopes is required: [im:chat]");
        assert!(matches!(
            enricher().enrich("chats list", AuthError::Api(api)),
            AuthError::Api(_)
        ));
    }

    #[test]
    fn test_extract_scopes_ignores_urls_and_times() {
        let text = "see https://open.feishu.cn/document at 12:30; need drive:drive.";
        assert_eq!(extract_scopes(text), vec!["drive:drive"]);
        assert!(extract_scopes("Missing user OAuth scopes: none").is_empty());
    }
}
