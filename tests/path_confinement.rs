//! Property-based coverage for the path-confinement rules.

use proptest::prelude::*;
use tempfile::TempDir;

use appforge::confine::{check_relative_path, sanitize};

/// A single safe path component: allowed charset, no leading dot.
fn safe_component() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_][A-Za-z0-9_.-]{0,12}"
}

/// A safe relative path of 1..=5 components.
fn safe_path() -> impl Strategy<Value = String> {
    prop::collection::vec(safe_component(), 1..=5).prop_map(|parts| parts.join("/"))
}

proptest! {
    #[test]
    fn safe_paths_pass_the_shape_check(path in safe_path()) {
        prop_assert!(check_relative_path(&path).is_ok());
    }

    #[test]
    fn sanitized_paths_stay_inside_the_base(path in safe_path()) {
        let base = TempDir::new().unwrap();
        let resolved = sanitize(base.path(), &path).unwrap();
        let canonical_base = base.path().canonicalize().unwrap();
        prop_assert!(resolved.starts_with(&canonical_base));
    }

    #[test]
    fn sanitize_is_idempotent(path in safe_path()) {
        let base = TempDir::new().unwrap();
        let first = sanitize(base.path(), &path).unwrap();
        let second = sanitize(base.path(), &path).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn parent_references_are_always_rejected(
        prefix in safe_path(),
        suffix in safe_path(),
    ) {
        let path = format!("{prefix}/../{suffix}");
        prop_assert!(check_relative_path(&path).is_err());
    }

    #[test]
    fn absolute_paths_are_always_rejected(path in safe_path()) {
        let absolute = format!("/{path}");
        prop_assert!(check_relative_path(&absolute).is_err());
    }

    #[test]
    fn control_bytes_are_always_rejected(
        path in safe_path(),
        control in prop::sample::select(vec!['\0', '\r', '\n']),
    ) {
        let mut corrupted = path;
        corrupted.push(control);
        corrupted.push('x');
        prop_assert!(check_relative_path(&corrupted).is_err());
    }
}

#[test]
fn component_charset_is_exactly_the_documented_set() {
    for ch in ['*', '?', ' ', '$', '~', '#', '%', '\\'] {
        let path = format!("bad{ch}name");
        assert!(
            check_relative_path(&path).is_err(),
            "expected rejection for {ch:?}"
        );
    }
    assert!(check_relative_path("Good_name-1.kt").is_ok());
}

#[test]
fn length_limit_is_512() {
    let at_limit = format!("{}/{}", "a".repeat(255), "b".repeat(256));
    assert_eq!(at_limit.len(), 512);
    assert!(check_relative_path(&at_limit).is_ok());

    let over = format!("{}x", at_limit);
    assert!(check_relative_path(&over).is_err());
}
