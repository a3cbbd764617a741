//! Input validation for task specs and plans.
//!
//! Rejects inputs whose semantics the downstream pipeline cannot recover
//! from. All violations surface as `AppForgeError::Validation` with a
//! human-readable message; validation failures are fatal, never retried.

use std::collections::HashSet;

use crate::confine::check_relative_path;
use crate::error::{AppForgeError, Result};
use crate::types::{Plan, TaskSpec};

/// Bounds from the data model.
pub const MAX_APP_NAME_LEN: usize = 256;
pub const MAX_FEATURE_LEN: usize = 128;
pub const MIN_FEATURES: usize = 1;
pub const MAX_FEATURES: usize = 10;
pub const MIN_SDK_FLOOR: u32 = 21;
pub const TARGET_SDK_CEILING: u32 = 34;
pub const MIN_PLAN_STEPS: usize = 1;
pub const MAX_PLAN_STEPS: usize = 25;

/// Kotlin hard keywords. Generated artifacts are Kotlin sources, so an
/// identifier colliding with one of these cannot be used verbatim.
const RESERVED_WORDS: &[&str] = &[
    "as", "break", "class", "continue", "do", "else", "false", "for", "fun", "if", "in",
    "interface", "is", "null", "object", "package", "return", "super", "this", "throw", "true",
    "try", "typealias", "typeof", "val", "var", "when", "while",
];

/// Validate a task spec against the data-model contract.
///
/// # Errors
///
/// Returns `AppForgeError::Validation` on the first violated rule.
pub fn validate_task_spec(spec: &TaskSpec) -> Result<()> {
    validate_identifier("app_name", &spec.app_name, MAX_APP_NAME_LEN)?;

    if spec.features.len() < MIN_FEATURES || spec.features.len() > MAX_FEATURES {
        return Err(AppForgeError::Validation(format!(
            "features must contain {MIN_FEATURES}..={MAX_FEATURES} entries, got {}",
            spec.features.len()
        )));
    }
    let mut seen = HashSet::new();
    for feature in &spec.features {
        validate_identifier("feature", feature, MAX_FEATURE_LEN)?;
        if !seen.insert(feature.as_str()) {
            return Err(AppForgeError::Validation(format!(
                "duplicate feature: '{feature}'"
            )));
        }
    }

    if spec.min_sdk < MIN_SDK_FLOOR {
        return Err(AppForgeError::Validation(format!(
            "min_sdk must be at least {MIN_SDK_FLOOR}, got {}",
            spec.min_sdk
        )));
    }
    if spec.target_sdk > TARGET_SDK_CEILING {
        return Err(AppForgeError::Validation(format!(
            "target_sdk must be at most {TARGET_SDK_CEILING}, got {}",
            spec.target_sdk
        )));
    }
    if spec.min_sdk > spec.target_sdk {
        return Err(AppForgeError::Validation(format!(
            "min_sdk ({}) must not exceed target_sdk ({})",
            spec.min_sdk, spec.target_sdk
        )));
    }

    validate_semver("gradle_version", &spec.gradle_version)?;
    validate_semver("kotlin_version", &spec.kotlin_version)?;

    Ok(())
}

/// Validate a plan: size bounds, unique positive step numbers, safe file
/// paths, and a closed dependency graph in valid topological order
/// (every dependency refers to an earlier step).
///
/// # Errors
///
/// Returns `AppForgeError::Validation` on the first violated rule.
pub fn validate_plan(plan: &Plan) -> Result<()> {
    if plan.len() < MIN_PLAN_STEPS || plan.len() > MAX_PLAN_STEPS {
        return Err(AppForgeError::Validation(format!(
            "plan must contain {MIN_PLAN_STEPS}..={MAX_PLAN_STEPS} steps, got {}",
            plan.len()
        )));
    }

    let mut numbers = HashSet::new();
    for step in &plan.steps {
        if step.step_number == 0 {
            return Err(AppForgeError::Validation(
                "step_number must be positive".into(),
            ));
        }
        if !numbers.insert(step.step_number) {
            return Err(AppForgeError::Validation(format!(
                "duplicate step_number: {}",
                step.step_number
            )));
        }
        check_relative_path(&step.file_path)?;
    }

    for step in &plan.steps {
        for dep in &step.dependencies {
            if !numbers.contains(dep) {
                return Err(AppForgeError::Validation(format!(
                    "step {} depends on absent step {dep}",
                    step.step_number
                )));
            }
            // Execution runs in step_number order; a forward or self
            // dependency would make that order invalid.
            if *dep >= step.step_number {
                return Err(AppForgeError::Validation(format!(
                    "step {} depends on step {dep}, which does not precede it",
                    step.step_number
                )));
            }
        }
    }

    Ok(())
}

fn validate_identifier(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.is_empty() {
        return Err(AppForgeError::Validation(format!("{field} is empty")));
    }
    if value.len() > max_len {
        return Err(AppForgeError::Validation(format!(
            "{field} exceeds {max_len} characters: {} chars",
            value.len()
        )));
    }
    let mut chars = value.chars();
    let first = chars.next().unwrap_or('\0');
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(AppForgeError::Validation(format!(
            "{field} must start with a letter or underscore: '{value}'"
        )));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppForgeError::Validation(format!(
            "{field} has an invalid character: '{value}'"
        )));
    }
    // Kotlin keyword matching is case-sensitive: `Object` or `When` are
    // legal identifiers, only the exact keyword spelling is denied.
    if RESERVED_WORDS.contains(&value) {
        return Err(AppForgeError::Validation(format!(
            "{field} is a reserved word: '{value}'"
        )));
    }
    Ok(())
}

fn validate_semver(field: &str, value: &str) -> Result<()> {
    let parts: Vec<&str> = value.split('.').collect();
    let ok = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if ok {
        Ok(())
    } else {
        Err(AppForgeError::Validation(format!(
            "{field} must be a semantic version triple, got '{value}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Architecture, Step, StepFileType, StepPhase, UiSystem};

    fn spec() -> TaskSpec {
        TaskSpec {
            app_name: "TodoApp".into(),
            features: vec!["add_task".into(), "list_tasks".into(), "complete_task".into()],
            architecture: Architecture::Mvvm,
            ui_system: UiSystem::Compose,
            min_sdk: 24,
            target_sdk: 34,
            gradle_version: "8.2.0".into(),
            kotlin_version: "1.9.20".into(),
        }
    }

    fn step(n: u32, path: &str, deps: Vec<u32>) -> Step {
        Step {
            step_number: n,
            phase: StepPhase::Scaffold,
            file_path: path.into(),
            file_type: StepFileType::Kotlin,
            dependencies: deps,
            description: format!("step {n}"),
        }
    }

    #[test]
    fn happy_path_spec_is_valid_and_validation_is_idempotent() {
        let s = spec();
        validate_task_spec(&s).unwrap();
        validate_task_spec(&s).unwrap();
    }

    #[test]
    fn sdk_boundaries() {
        let mut s = spec();
        s.min_sdk = 21;
        s.target_sdk = 21;
        validate_task_spec(&s).unwrap();

        s.min_sdk = 20;
        assert!(validate_task_spec(&s).is_err());

        s.min_sdk = 21;
        s.target_sdk = 35;
        assert!(validate_task_spec(&s).is_err());

        s.min_sdk = 30;
        s.target_sdk = 24;
        assert!(validate_task_spec(&s).is_err());
    }

    #[test]
    fn feature_count_boundaries() {
        let mut s = spec();
        s.features = (0..10).map(|i| format!("feature_{i}")).collect();
        validate_task_spec(&s).unwrap();

        s.features = (0..11).map(|i| format!("feature_{i}")).collect();
        assert!(validate_task_spec(&s).is_err());

        s.features = vec![];
        assert!(validate_task_spec(&s).is_err());
    }

    #[test]
    fn duplicate_features_rejected() {
        let mut s = spec();
        s.features = vec!["sync".into(), "sync".into()];
        assert!(validate_task_spec(&s).is_err());
    }

    #[test]
    fn reserved_words_rejected() {
        let mut s = spec();
        s.app_name = "object".into();
        assert!(validate_task_spec(&s).is_err());

        let mut s = spec();
        s.features = vec!["when".into()];
        assert!(validate_task_spec(&s).is_err());
    }

    #[test]
    fn keyword_spellings_in_other_case_are_valid_identifiers() {
        let mut s = spec();
        s.app_name = "Object".into();
        validate_task_spec(&s).unwrap();

        let mut s = spec();
        s.features = vec!["When".into(), "Fun".into()];
        validate_task_spec(&s).unwrap();
    }

    #[test]
    fn version_triples_enforced() {
        let mut s = spec();
        s.gradle_version = "8.2".into();
        assert!(validate_task_spec(&s).is_err());

        let mut s = spec();
        s.kotlin_version = "1.9.x".into();
        assert!(validate_task_spec(&s).is_err());
    }

    #[test]
    fn plan_size_boundaries() {
        let plan = Plan {
            steps: (1..=25).map(|n| step(n, &format!("f{n}.kt"), vec![])).collect(),
        };
        validate_plan(&plan).unwrap();

        let plan = Plan {
            steps: (1..=26).map(|n| step(n, &format!("f{n}.kt"), vec![])).collect(),
        };
        assert!(validate_plan(&plan).is_err());

        let plan = Plan { steps: vec![] };
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn duplicate_step_numbers_rejected() {
        let plan = Plan {
            steps: vec![step(1, "a.kt", vec![]), step(1, "b.kt", vec![])],
        };
        assert!(validate_plan(&plan).is_err());
    }

    #[test]
    fn absent_and_forward_dependencies_rejected() {
        let plan = Plan {
            steps: vec![step(1, "a.kt", vec![7])],
        };
        assert!(validate_plan(&plan).is_err());

        let plan = Plan {
            steps: vec![step(1, "a.kt", vec![2]), step(2, "b.kt", vec![])],
        };
        assert!(validate_plan(&plan).is_err());

        let plan = Plan {
            steps: vec![step(1, "a.kt", vec![]), step(2, "b.kt", vec![1])],
        };
        validate_plan(&plan).unwrap();
    }

    #[test]
    fn unsafe_step_paths_rejected() {
        for bad in ["../x", "/abs", "a//b", ".hidden"] {
            let plan = Plan {
                steps: vec![step(1, bad, vec![])],
            };
            assert!(validate_plan(&plan).is_err(), "expected rejection: {bad}");
        }
    }
}
