//! Scope set canonicalization and relogin hints.

use std::collections::BTreeSet;

use crate::model::OFFLINE_ACCESS;

/// Canonical form of a scope set: trimmed, deduplicated, sorted, with
/// `offline_access` first when present or forced.
///
/// Canonicalizing a canonical list returns it unchanged.
pub fn canonicalize_scopes<I, S>(scopes: I, force_offline: bool) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut offline = force_offline;
    let mut set = BTreeSet::new();

    for scope in scopes {
        let scope = scope.as_ref().trim();
        if scope.is_empty() {
            continue;
        }
        if scope == OFFLINE_ACCESS {
            offline = true;
        } else {
            set.insert(scope.to_string());
        }
    }

    let mut canonical = Vec::with_capacity(set.len() + 1);
    if offline {
        canonical.push(OFFLINE_ACCESS.to_string());
    }
    canonical.extend(set);
    canonical
}

/// Split a `--scopes` value or a granted-scope string.
///
/// Accepts whitespace and comma separators.
pub fn parse_scope_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scopes in `required` not contained in `granted`.
pub fn missing_scopes(required: &[String], granted: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|scope| !granted.contains(scope))
        .cloned()
        .collect()
}

/// Copy-pasteable login command requesting `scopes` plus `offline_access`.
pub fn relogin_command<S: AsRef<str>>(scopes: &[S]) -> String {
    let scopes = canonicalize_scopes(scopes.iter().map(|s| s.as_ref()), true);
    format!(
        "lark auth user login --scopes \"{}\" --force-consent",
        scopes.join(" ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_dedupes_and_sorts() {
        let scopes = canonicalize_scopes(["drive:drive", " im:message ", "drive:drive", ""], false);
        assert_eq!(scopes, vec!["drive:drive", "im:message"]);
    }

    #[test]
    fn test_canonicalize_puts_offline_first() {
        let scopes = canonicalize_scopes(["wiki:wiki", "offline_access", "docx:document"], false);
        assert_eq!(scopes, vec!["offline_access", "docx:document", "wiki:wiki"]);

        let forced = canonicalize_scopes(["wiki:wiki"], true);
        assert_eq!(forced, vec!["offline_access", "wiki:wiki"]);
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let once = canonicalize_scopes(["task:task:write", "offline_access", "task:task:read"], false);
        let twice = canonicalize_scopes(&once, false);
        assert_eq!(once, twice);

        let forced_once = canonicalize_scopes(["drive:drive"], true);
        assert_eq!(canonicalize_scopes(&forced_once, true), forced_once);
        // A canonical list that already carries offline_access keeps it unforced.
        assert_eq!(canonicalize_scopes(&forced_once, false), forced_once);
    }

    #[test]
    fn test_parse_scope_list() {
        assert_eq!(
            parse_scope_list("drive:drive, docx:document\toffline_access"),
            vec!["drive:drive", "docx:document", "offline_access"]
        );
        assert!(parse_scope_list("  ").is_empty());
    }

    #[test]
    fn test_relogin_command() {
        assert_eq!(
            relogin_command(&["drive:drive"]),
            "lark auth user login --scopes \"offline_access drive:drive\" --force-consent"
        );
    }

    #[test]
    fn test_missing_scopes() {
        let required = vec!["drive:drive".to_string(), "docx:document".to_string()];
        let granted = vec!["docx:document".to_string()];
        assert_eq!(missing_scopes(&required, &granted), vec!["drive:drive"]);
    }
}
