//! Deduplication fingerprints.
//!
//! A fingerprint identifies one logical issue. It is derived from the
//! message and the originating component/function of an entry (or the
//! filename and line for raw script errors that carry no component
//! context). Timestamps never take part, so recurrences collapse onto the
//! same key. Missing optional fields contribute an empty string.
//!
//! The key is hashed into a name-based UUID (v5), which is deterministic
//! across runs as well as within one.

use uuid::Uuid;

use crate::entry::EntryKind;

const SEPARATOR: char = '\u{1f}';

/// Derive the deduplication key for an entry payload.
///
/// # Example
///
/// ```
/// use territory_telemetry::entry::EntryKind;
/// use territory_telemetry::fingerprint::fingerprint;
///
/// let kind = EntryKind::PromiseRejection {
///     reason: "quota exceeded".into(),
///     component: Some("AssignmentForm".into()),
/// };
/// assert_eq!(fingerprint(&kind), fingerprint(&kind.clone()));
/// ```
#[must_use]
pub fn fingerprint(kind: &EntryKind) -> String {
    let key = fingerprint_key(kind);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
        .simple()
        .to_string()
}

/// The raw, unhashed key. Useful when debugging grouping decisions.
#[must_use]
pub fn fingerprint_key(kind: &EntryKind) -> String {
    let parts: Vec<String> = match kind {
        EntryKind::ScriptError {
            message,
            filename,
            line,
            component: None,
            function: None,
            ..
        } => vec![
            message.trim().to_string(),
            opt(filename.as_ref()),
            line.map(|l| l.to_string()).unwrap_or_default(),
        ],
        EntryKind::ScriptError {
            message,
            component,
            function,
            ..
        } => vec![message.trim().to_string(), opt(component.as_ref()), opt(function.as_ref())],
        EntryKind::PromiseRejection { reason, component } => {
            vec![reason.trim().to_string(), opt(component.as_ref())]
        }
        EntryKind::NetworkFailure {
            url, method, status, ..
        } => vec![
            method.to_ascii_uppercase(),
            strip_query(url).to_string(),
            status.map(|s| s.to_string()).unwrap_or_default(),
        ],
        EntryKind::UserInteraction {
            action,
            target,
            component,
        } => vec![action.clone(), target.clone(), opt(component.as_ref())],
        EntryKind::Navigation { to, .. } => vec![to.clone()],
        EntryKind::Custom {
            name,
            message,
            component,
            ..
        } => vec![name.clone(), opt(message.as_ref()), opt(component.as_ref())],
    };

    let mut key = String::from(kind.category().as_str());
    for part in &parts {
        key.push(SEPARATOR);
        key.push_str(part);
    }
    key
}

/// URL without its query string or fragment.
pub(crate) fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or_default()
}

fn opt(value: Option<&String>) -> String {
    value.cloned().unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn script(message: &str, component: Option<&str>, function: Option<&str>) -> EntryKind {
        EntryKind::ScriptError {
            message: message.to_string(),
            error_type: None,
            filename: Some("bundle.js".to_string()),
            line: Some(42),
            column: Some(7),
            stack: None,
            component: component.map(String::from),
            function: function.map(String::from),
        }
    }

    #[test]
    fn test_deterministic() {
        let kind = script("boom", Some("MapView"), Some("draw"));
        assert_eq!(fingerprint(&kind), fingerprint(&kind));
    }

    #[test]
    fn test_message_component_function_distinguish() {
        let base = fingerprint(&script("boom", Some("MapView"), Some("draw")));
        assert_ne!(base, fingerprint(&script("bang", Some("MapView"), Some("draw"))));
        assert_ne!(base, fingerprint(&script("boom", Some("ListView"), Some("draw"))));
        assert_ne!(base, fingerprint(&script("boom", Some("MapView"), Some("layout"))));
    }

    #[test]
    fn test_stack_and_column_ignored() {
        let a = script("boom", Some("MapView"), Some("draw"));
        let mut b = a.clone();
        if let EntryKind::ScriptError { stack, column, .. } = &mut b {
            *stack = Some("at draw (bundle.js:42:7)".to_string());
            *column = Some(99);
        }
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_raw_error_uses_filename_and_line() {
        let a = script("boom", None, None);
        let mut b = a.clone();
        if let EntryKind::ScriptError { line, .. } = &mut b {
            *line = Some(43);
        }
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert!(fingerprint_key(&a).ends_with("bundle.js\u{1f}42"));
    }

    #[test]
    fn test_missing_fields_tolerated() {
        let kind = EntryKind::ScriptError {
            message: String::new(),
            error_type: None,
            filename: None,
            line: None,
            column: None,
            stack: None,
            component: None,
            function: None,
        };
        assert_eq!(fingerprint_key(&kind), "javascript\u{1f}\u{1f}\u{1f}");
        assert_eq!(fingerprint(&kind).len(), 32);
    }

    #[test]
    fn test_network_ignores_query_and_duration() {
        let a = EntryKind::NetworkFailure {
            url: "/api/territories?page=1".to_string(),
            method: "GET".to_string(),
            status: Some(500),
            duration_ms: Some(10),
            message: None,
        };
        let b = EntryKind::NetworkFailure {
            url: "/api/territories?page=2".to_string(),
            method: "GET".to_string(),
            status: Some(500),
            duration_ms: Some(900),
            message: Some("Internal".to_string()),
        };
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_categories_never_collide() {
        let custom = EntryKind::Custom {
            name: "boom".to_string(),
            message: None,
            component: None,
            properties: BTreeMap::new(),
        };
        let rejection = EntryKind::PromiseRejection {
            reason: "boom".to_string(),
            component: None,
        };
        assert_ne!(fingerprint(&custom), fingerprint(&rejection));
    }

    proptest! {
        #[test]
        fn prop_fingerprint_is_pure(
            message in ".{0,40}",
            component in proptest::option::of("[A-Za-z]{1,12}"),
            function in proptest::option::of("[a-z_]{1,12}"),
        ) {
            let kind = EntryKind::ScriptError {
                message,
                error_type: None,
                filename: None,
                line: None,
                column: None,
                stack: None,
                component,
                function,
            };
            prop_assert_eq!(fingerprint(&kind), fingerprint(&kind.clone()));
        }
    }
}
